//! Directory codec and tree operations: canonical serialization of a
//! directory listing, committing a filesystem subtree into the store,
//! checking a tree back out, resolving sub-paths, and structural diffing.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::digest::Digest;
use crate::error::{CasError, Result};
use crate::store::Source;
use crate::Cas;

/// A regular file entry: `(name, digest, is_executable)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub digest: Digest,
    pub is_executable: bool,
}

/// A subdirectory entry: `(name, digest)` of the child directory blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    pub digest: Digest,
}

/// A symlink entry: `(name, target)`. The target is stored raw, unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkNode {
    pub name: String,
    pub target: String,
}

/// A directory listing: three name-sorted, name-disjoint sequences.
///
/// The serialized form of this struct is itself a blob; its digest names
/// the directory. Two directories with equal content always serialize to
/// identical bytes, which is the property the GC and tree-diff rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub files: Vec<FileNode>,
    pub directories: Vec<DirectoryNode>,
    pub symlinks: Vec<SymlinkNode>,
}

impl Directory {
    fn sort(&mut self) {
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
        self.directories.sort_by(|a, b| a.name.cmp(&b.name));
        self.symlinks.sort_by(|a, b| a.name.cmp(&b.name));
    }

    fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Directory serialization is infallible")
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| CasError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

impl Cas {
    fn read_directory(&self, digest: &Digest) -> Result<Directory> {
        let bytes = fs::read(self.objpath(digest))?;
        Directory::decode(&bytes)
    }

    /// Recursively imports the filesystem subtree rooted at `path`, returning
    /// the digest of its serialized directory blob.
    ///
    /// Entries are processed in sorted name order; a socket is skipped
    /// (unreachable build artifact) and any other unsupported file type
    /// (block/char device, fifo) is an error.
    pub fn commit_directory(&self, path: &Path) -> Result<Digest> {
        debug!(path = %path.display(), "committing directory");
        let mut dir = Directory::default();

        let mut names: Vec<_> = fs::read_dir(path)?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<std::io::Result<_>>()?;
        names.sort();

        for name in names {
            let full_path = path.join(&name);
            let name = name.to_string_lossy().into_owned();
            let meta = fs::symlink_metadata(&full_path)?;
            let mode = meta.mode();
            let file_type = meta.file_type();

            if file_type.is_dir() {
                let digest = self.commit_directory(&full_path)?;
                dir.directories.push(DirectoryNode { name, digest });
            } else if file_type.is_file() {
                let digest = self.add_object(Source::Path(&full_path))?;
                let is_executable = mode & 0o100 != 0;
                dir.files.push(FileNode {
                    name,
                    digest,
                    is_executable,
                });
            } else if file_type.is_symlink() {
                let target = fs::read_link(&full_path)?
                    .to_string_lossy()
                    .into_owned();
                dir.symlinks.push(SymlinkNode { name, target });
            } else if is_socket(mode) {
                // unreachable build artifact; silently dropped.
                continue;
            } else {
                return Err(CasError::UnsupportedFileType { path: full_path });
            }
        }

        dir.sort();
        let bytes = dir.encode();
        self.add_object(Source::Buffer(&bytes))
    }

    /// Materializes the tree named by `tree_digest` into `dest` using
    /// hardlinks: checked-out files share an inode with the canonical
    /// object, so storage cost stays at one copy regardless of how many
    /// places extract it.
    pub fn checkout(&self, dest: &Path, tree_digest: &Digest) -> Result<()> {
        fs::create_dir_all(dest)?;
        let dir = self.read_directory(tree_digest)?;

        for file in &dir.files {
            let target = dest.join(&file.name);
            fs::hard_link(self.objpath(&file.digest), &target)?;
            if file.is_executable {
                fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
            }
        }

        for subdir in &dir.directories {
            if self.check_blob(&subdir.digest).is_some() {
                self.checkout(&dest.join(&subdir.name), &subdir.digest)?;
            } else {
                warn!(
                    name = %subdir.name,
                    digest = %subdir.digest,
                    "checkout: dangling subdirectory reference, skipping subtree"
                );
            }
        }

        for link in &dir.symlinks {
            std::os::unix::fs::symlink(&link.target, dest.join(&link.name))?;
        }

        Ok(())
    }

    /// Walks `path`'s components left-to-right under `tree_digest`, failing
    /// with `SubdirectoryNotFound` if any component is absent.
    pub fn resolve_subdir(&self, tree_digest: &Digest, path: &str) -> Result<Digest> {
        let mut current = *tree_digest;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let dir = self.read_directory(&current)?;
            let found = dir
                .directories
                .iter()
                .find(|d| d.name == component)
                .ok_or_else(|| CasError::SubdirectoryNotFound {
                    name: component.to_string(),
                })?;
            current = found.digest;
        }
        Ok(current)
    }

    /// Structural, name-ordered diff of two trees, returning
    /// `(modified, removed, added)` paths relative to the diff root.
    ///
    /// Symlinks are not diffed (see the open question in the design notes):
    /// only files and subdirectories are compared, matching the source
    /// system's current behavior.
    pub fn diff_trees(&self, a: Option<&Digest>, b: Option<&Digest>) -> Result<DiffResult> {
        let mut result = DiffResult::default();
        self.diff_trees_at(a, b, "", &mut result)?;
        Ok(result)
    }

    fn diff_trees_at(
        &self,
        a: Option<&Digest>,
        b: Option<&Digest>,
        path: &str,
        result: &mut DiffResult,
    ) -> Result<()> {
        let dir_a = match a {
            Some(d) => self.read_directory(d)?,
            None => Directory::default(),
        };
        let dir_b = match b {
            Some(d) => self.read_directory(d)?,
            None => Directory::default(),
        };

        let mut ai = 0;
        let mut bi = 0;
        while ai < dir_a.files.len() || bi < dir_b.files.len() {
            let cmp = match (dir_a.files.get(ai), dir_b.files.get(bi)) {
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(_), None) => std::cmp::Ordering::Less,
                (Some(fa), Some(fb)) => fa.name.cmp(&fb.name),
                (None, None) => unreachable!(),
            };
            match cmp {
                std::cmp::Ordering::Greater => {
                    result.added.push(join(path, &dir_b.files[bi].name));
                    bi += 1;
                }
                std::cmp::Ordering::Less => {
                    result.removed.push(join(path, &dir_a.files[ai].name));
                    ai += 1;
                }
                std::cmp::Ordering::Equal => {
                    if dir_a.files[ai].digest.hash_hex() != dir_b.files[bi].digest.hash_hex() {
                        result.modified.push(join(path, &dir_a.files[ai].name));
                    }
                    ai += 1;
                    bi += 1;
                }
            }
        }

        let mut ai = 0;
        let mut bi = 0;
        while ai < dir_a.directories.len() || bi < dir_b.directories.len() {
            let cmp = match (dir_a.directories.get(ai), dir_b.directories.get(bi)) {
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(_), None) => std::cmp::Ordering::Less,
                (Some(da), Some(db)) => da.name.cmp(&db.name),
                (None, None) => unreachable!(),
            };
            match cmp {
                std::cmp::Ordering::Greater => {
                    let db = &dir_b.directories[bi];
                    self.diff_trees_at(None, Some(&db.digest), &join(path, &db.name), result)?;
                    bi += 1;
                }
                std::cmp::Ordering::Less => {
                    let da = &dir_a.directories[ai];
                    self.diff_trees_at(Some(&da.digest), None, &join(path, &da.name), result)?;
                    ai += 1;
                }
                std::cmp::Ordering::Equal => {
                    let da = &dir_a.directories[ai];
                    let db = &dir_b.directories[bi];
                    if da.digest.hash_hex() != db.digest.hash_hex() {
                        self.diff_trees_at(
                            Some(&da.digest),
                            Some(&db.digest),
                            &join(path, &da.name),
                            result,
                        )?;
                    }
                    ai += 1;
                    bi += 1;
                }
            }
        }

        Ok(())
    }

    /// Transitive closure of object hashes reachable from `tree_digest`:
    /// the directory blob itself, every file digest it references, every
    /// subdirectory, recursively. Already-visited hashes short-circuit the
    /// walk (shared subtrees are not revisited; cycles are impossible by
    /// construction).
    pub fn reachable(&self, tree_digest: &Digest) -> Result<HashSet<String>> {
        let mut acc = HashSet::new();
        self.reachable_into(tree_digest, &mut acc, false)?;
        Ok(acc)
    }

    /// Same as `reachable`, but also bumps the mtime of every object visited
    /// (used for LRU accounting when extracting a tree).
    pub fn reachable_touch(&self, tree_digest: &Digest) -> Result<HashSet<String>> {
        let mut acc = HashSet::new();
        self.reachable_into(tree_digest, &mut acc, true)?;
        Ok(acc)
    }

    fn reachable_into(
        &self,
        tree_digest: &Digest,
        acc: &mut HashSet<String>,
        touch: bool,
    ) -> Result<()> {
        let hash = tree_digest.hash_hex();
        if acc.contains(&hash) {
            return Ok(());
        }

        let Some(objpath) = self.check_blob(tree_digest) else {
            // dangling reference: contributes nothing beyond itself
            acc.insert(hash);
            return Ok(());
        };
        if touch {
            touch_mtime(&objpath)?;
        }
        acc.insert(hash);

        let dir = self.read_directory(tree_digest)?;
        for file in &dir.files {
            let fhash = file.digest.hash_hex();
            if acc.insert(fhash) {
                if touch {
                    if let Some(p) = self.check_blob(&file.digest) {
                        touch_mtime(&p)?;
                    }
                }
            }
        }
        for subdir in &dir.directories {
            self.reachable_into(&subdir.digest, acc, touch)?;
        }

        Ok(())
    }
}

/// The result of a `diff_trees` call: three flat lists of paths relative to
/// the diff root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}/{name}")
    }
}

fn touch_mtime(path: &Path) -> Result<()> {
    let now = filetime::FileTime::now();
    filetime::set_file_mtime(path, now).map_err(CasError::Io)
}

#[cfg(unix)]
fn is_socket(mode: u32) -> bool {
    mode & libc_sflags::S_IFMT == libc_sflags::S_IFSOCK
}

#[cfg(not(unix))]
fn is_socket(_mode: u32) -> bool {
    false
}

/// Minimal POSIX mode-bit constants, avoiding a dependency on `libc` for a
/// single pair of mask values.
mod libc_sflags {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFSOCK: u32 = 0o140000;
}
