//! Object store: immutable blobs addressed by SHA-256, sharded two hex
//! characters deep, inserted atomically via stage-then-hardlink.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest as _, Sha256};
use tracing::debug;

use crate::digest::Digest;
use crate::error::{CasError, Result};
use crate::Cas;

/// Chunk size used when streaming file contents through the hasher.
const CHUNK_SIZE: usize = 4096;

/// Where the bytes for a new object come from.
pub enum Source<'a> {
    /// Read an existing file's contents and stage a private copy before
    /// linking it into the store.
    Path(&'a Path),
    /// Hash and stage an in-memory buffer.
    Buffer(&'a [u8]),
    /// Hash a file the caller guarantees will not be modified, and link it
    /// directly into the store without staging a copy first.
    AdoptPath(&'a Path),
}

impl Cas {
    /// Returns the path an object with `digest` would be stored at. Does not
    /// imply the object exists.
    pub fn objpath(&self, digest: &Digest) -> PathBuf {
        let hex = digest.hash_hex();
        self.objects_dir().join(&hex[..2]).join(&hex[2..])
    }

    /// Returns the object's path if it's present in the store, else `None`.
    pub fn check_blob(&self, digest: &Digest) -> Option<PathBuf> {
        let path = self.objpath(digest);
        path.exists().then_some(path)
    }

    /// Hash and insert `source` into the store, returning its digest.
    ///
    /// Inserting content that is already present is not an error: the
    /// hardlink race is resolved by treating "destination exists" as
    /// success, since both writers are hashing the same bytes and so would
    /// have produced the same object regardless of who got there first.
    pub fn add_object(&self, source: Source<'_>) -> Result<Digest> {
        match source {
            Source::Path(path) => self.add_object_staged(|hasher, tmp| {
                let mut file = File::open(path)?;
                copy_hashing(&mut file, tmp, hasher)
            }),
            Source::Buffer(buf) => self.add_object_staged(|hasher, tmp| {
                hasher.update(buf);
                tmp.write_all(buf)?;
                Ok(())
            }),
            Source::AdoptPath(path) => self.add_object_adopt(path),
        }
    }

    fn add_object_staged(
        &self,
        write: impl FnOnce(&mut Sha256, &mut File) -> io::Result<()>,
    ) -> Result<Digest> {
        let mut tmp = tempfile::NamedTempFile::new_in(self.tmp_dir())?;
        set_mode_0644(tmp.path())?;

        let mut hasher = Sha256::new();
        write(&mut hasher, tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;

        let size_bytes = tmp.as_file().metadata()?.len();
        let digest = Digest::new(hasher.finalize().into(), size_bytes);

        self.link_into_store(tmp.path(), &digest)?;
        debug!(digest = %digest, "added object");
        Ok(digest)
    }

    fn add_object_adopt(&self, path: &Path) -> Result<Digest> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; CHUNK_SIZE];
        let mut size_bytes = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size_bytes += n as u64;
        }
        let digest = Digest::new(hasher.finalize().into(), size_bytes);

        self.link_into_store(path, &digest)?;
        debug!(digest = %digest, path = %path.display(), "adopted object");
        Ok(digest)
    }

    fn link_into_store(&self, from: &Path, digest: &Digest) -> Result<()> {
        let objpath = self.objpath(digest);
        if let Some(parent) = objpath.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::hard_link(from, &objpath) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(CasError::Io(e)),
        }
    }

    /// Walk the object store, returning `(mtime, path)` pairs sorted oldest
    /// first. Entries that disappear mid-walk (e.g. a concurrent `prune`)
    /// are silently skipped.
    pub fn list_objects(&self) -> Result<Vec<(SystemTime, PathBuf)>> {
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(self.objects_dir())
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            match meta.modified() {
                Ok(mtime) => entries.push((mtime, entry.path().to_path_buf())),
                Err(_) => continue,
            }
        }
        entries.sort_by_key(|(mtime, _)| *mtime);
        Ok(entries)
    }
}

fn copy_hashing(src: &mut File, dst: &mut File, hasher: &mut Sha256) -> io::Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        dst.write_all(&buf[..n])?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode_0644(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_mode_0644(_path: &Path) -> io::Result<()> {
    Ok(())
}
