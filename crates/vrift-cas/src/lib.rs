//! # vrift-cas
//!
//! A content-addressable store for build artifacts: a local, on-disk
//! repository that stores immutable blobs keyed by their SHA-256 digest,
//! organizes blobs into directory trees whose serialized form is itself a
//! blob, and maintains named refs pointing at tree roots.
//!
//! ## Directory layout
//!
//! ```text
//! <root>/cas/objects/<hh>/<remaining 62 hex chars>   # one blob per object
//! <root>/cas/refs/heads/<ref-path>                   # serialized Digest
//! <root>/tmp/                                        # staging area
//! ```
//!
//! ## Scope
//!
//! This crate is a synchronous, thread-safe library with no internal
//! worker pool and no network transport: every operation blocks on the
//! filesystem and returns. There is no compression, no signing, no access
//! control and no quota enforcement — callers compute sizes with
//! [`Cas::calculate_cache_size`] and decide when to prune.
//!
//! Multiple processes may read and insert concurrently (the object store
//! resolves concurrent writers of the same digest via hardlink/EEXIST, and
//! ref writes are atomic rename-into-place). [`Cas::prune`] is the one
//! operation that is **not** safe to run concurrently with writers; callers
//! must serialize it externally, e.g. with a process-level advisory lock
//! on the store root.

mod digest;
mod directory;
mod error;
mod gc;
mod refs;
mod store;

pub use digest::Digest;
pub use directory::{DiffResult, Directory, DirectoryNode, FileNode, SymlinkNode};
pub use error::{CasError, Result};
pub use store::Source;

use std::fs;
use std::path::{Path, PathBuf};

/// Handle to an on-disk content-addressable store.
///
/// `Cas` holds only a root path, not file handles, so it is cheap to clone
/// and share across threads the caller manages itself.
#[derive(Debug, Clone)]
pub struct Cas {
    root: PathBuf,
}

impl Cas {
    /// Opens (creating if necessary) a store rooted at `root`. Creates
    /// `<root>/cas/objects`, `<root>/cas/refs/heads`, and `<root>/tmp` if
    /// they don't already exist; never deletes anything.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let cas = Self { root };
        fs::create_dir_all(cas.objects_dir())?;
        fs::create_dir_all(cas.refs_heads_dir())?;
        fs::create_dir_all(cas.tmp_dir())?;
        Ok(cas)
    }

    /// Checks that the required on-disk directories are present. Returns
    /// `CasError::StoreUninitialized` if `root` exists but was only
    /// partially set up (e.g. a directory was deleted out-of-band).
    pub fn preflight(&self) -> Result<()> {
        if self.objects_dir().is_dir() && self.refs_heads_dir().is_dir() {
            Ok(())
        } else {
            Err(CasError::StoreUninitialized {
                path: self.root.clone(),
            })
        }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("cas").join("objects")
    }

    fn refs_heads_dir(&self) -> PathBuf {
        self.root.join("cas").join("refs").join("heads")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Resolves `ref_name` to a tree digest (bumping its mtime for LRU) and
    /// materializes it under `dest_root/<tree_hash>` (or, when `subdir` is
    /// given and the whole tree hasn't already been extracted,
    /// `dest_root/<tree_hash>/<subdir>`).
    ///
    /// If the target directory already exists, it is returned as-is.
    /// Otherwise the tree is checked out into a temporary directory under
    /// the store's `tmp/` and atomically renamed into place; if the rename
    /// races with another process extracting the same tree, the existing
    /// directory wins and is returned.
    pub fn extract(
        &self,
        ref_name: &str,
        dest_root: &Path,
        subdir: Option<&str>,
    ) -> Result<PathBuf> {
        let mut tree = self.resolve_ref(ref_name, true)?;
        let original_dest = dest_root.join(tree.hash_hex());
        let mut dest = original_dest.clone();

        if dest.is_dir() {
            if let Some(subdir) = subdir {
                let with_subdir = dest.join(subdir);
                if with_subdir.is_dir() {
                    return Ok(original_dest);
                }
                dest = with_subdir;
                tree = self.resolve_subdir(&tree, subdir)?;
            } else {
                return Ok(original_dest);
            }
        }

        let staging = tempfile::TempDir::new_in(self.tmp_dir())?;
        let checkout_dir = staging.path().join(ref_name.replace('/', "_"));
        self.checkout(&checkout_dir, &tree)?;

        match atomic_rename_dir(&checkout_dir, &dest) {
            Ok(()) => {}
            Err(_) if dest.is_dir() => {
                // another process raced us to the same destination; its
                // result is just as valid as ours.
            }
            Err(source) => {
                return Err(CasError::ExtractFailure {
                    ref_name: ref_name.to_string(),
                    source,
                })
            }
        }

        Ok(original_dest)
    }
}

fn atomic_rename_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)
}
