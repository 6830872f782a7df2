//! Ref store: a filename-indexed map from ref strings to a serialized
//! `Digest` naming a root directory blob, with file mtime doubling as an
//! LRU timestamp.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::digest::Digest;
use crate::error::{CasError, Result};
use crate::Cas;

impl Cas {
    fn refpath(&self, ref_name: &str) -> PathBuf {
        self.refs_heads_dir().join(ref_name)
    }

    /// Creates or replaces `ref_name`, pointing it at `digest`. The write is
    /// atomic: write-to-temp-then-rename under the store's `tmp/` directory,
    /// so any observer sees the file wholly old or wholly new.
    pub fn set_ref(&self, ref_name: &str, digest: &Digest) -> Result<()> {
        let refpath = self.refpath(ref_name);
        if let Some(parent) = refpath.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp = tempfile::NamedTempFile::new_in(self.tmp_dir())?;
        let bytes = bincode::serialize(digest).expect("Digest serialization is infallible");
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&refpath)
            .map_err(|e| CasError::Io(e.error))?;

        debug!(ref_name, digest = %digest, "set ref");
        Ok(())
    }

    /// Reads and deserializes `ref_name`. Fails with `RefNotFound` if absent.
    /// If `update_mtime` is set, the ref's mtime is bumped before reading.
    pub fn resolve_ref(&self, ref_name: &str, update_mtime: bool) -> Result<Digest> {
        let refpath = self.refpath(ref_name);
        if update_mtime {
            self.touch_ref_path(&refpath, ref_name)?;
        }

        let bytes = fs::read(&refpath).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CasError::RefNotFound {
                    ref_name: ref_name.to_string(),
                }
            } else {
                CasError::Io(e)
            }
        })?;
        bincode::deserialize(&bytes)
            .map_err(|e| CasError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Bumps `ref_name`'s mtime without reading it.
    pub fn update_mtime(&self, ref_name: &str) -> Result<()> {
        self.touch_ref_path(&self.refpath(ref_name), ref_name)
    }

    fn touch_ref_path(&self, path: &std::path::Path, ref_name: &str) -> Result<()> {
        let now = filetime::FileTime::now();
        filetime::set_file_mtime(path, now).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CasError::RefNotFound {
                    ref_name: ref_name.to_string(),
                }
            } else {
                CasError::Io(e)
            }
        })
    }

    /// Equivalent to `set_ref(new_ref, resolve_ref(old_ref))`. This copies
    /// the digest by value: if `old_ref` is later updated, `new_ref` does
    /// not follow (see the design notes on alias vs. snapshot semantics).
    pub fn link_ref(&self, old_ref: &str, new_ref: &str) -> Result<()> {
        let digest = self.resolve_ref(old_ref, false)?;
        self.set_ref(new_ref, &digest)
    }

    /// File-existence test for a ref.
    pub fn contains(&self, ref_name: &str) -> bool {
        self.refpath(ref_name).exists()
    }

    /// True iff the subdirectory digest named by `subdir` inside the tree
    /// named by `ref_name` is present as an object (not dangling).
    pub fn contains_subdir_artifact(&self, ref_name: &str, subdir: &str) -> Result<bool> {
        let tree = self.resolve_ref(ref_name, false)?;
        let subdigest = self.resolve_subdir(&tree, subdir)?;
        Ok(self.check_blob(&subdigest).is_some())
    }

    /// Deletes `ref_name`. If `defer_prune` is false, immediately runs
    /// `prune` and returns bytes freed; otherwise returns `None` and leaves
    /// the freed space for a later `prune` call.
    pub fn remove(&self, ref_name: &str, defer_prune: bool) -> Result<Option<u64>> {
        let refpath = self.refpath(ref_name);
        if !refpath.exists() {
            return Err(CasError::RefNotFound {
                ref_name: ref_name.to_string(),
            });
        }
        fs::remove_file(&refpath)?;

        if defer_prune {
            Ok(None)
        } else {
            Ok(Some(self.prune()?))
        }
    }

    /// Lists all ref names, sorted by mtime ascending (least-recently
    /// modified first) — the canonical LRU eviction order.
    pub fn list_refs(&self) -> Result<Vec<String>> {
        let heads = self.refs_heads_dir();
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&heads)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let mtime = meta.modified()?;
            let rel = entry
                .path()
                .strip_prefix(&heads)
                .expect("walked entry is under heads dir")
                .to_string_lossy()
                .into_owned();
            entries.push((mtime, rel));
        }
        entries.sort_by_key(|(mtime, _)| *mtime);
        Ok(entries.into_iter().map(|(_, name)| name).collect())
    }

    /// Deletes every ref whose mtime is older than `t`. Objects referenced
    /// only by deleted refs are not freed here; call `prune` afterwards.
    pub fn clean_refs_until(&self, t: std::time::SystemTime) -> Result<()> {
        let heads = self.refs_heads_dir();
        for entry in walkdir::WalkDir::new(&heads)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.modified()? < t {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::TempDir;

    fn cas() -> (TempDir, Cas) {
        let dir = TempDir::new().unwrap();
        let cas = Cas::open(dir.path()).unwrap();
        (dir, cas)
    }

    #[test]
    fn set_and_resolve_ref() {
        let (_dir, cas) = cas();
        let digest = Digest::new([7u8; 32], 42);
        cas.set_ref("release/v1", &digest).unwrap();
        assert_eq!(cas.resolve_ref("release/v1", false).unwrap(), digest);
    }

    #[test]
    fn resolve_missing_ref_errors() {
        let (_dir, cas) = cas();
        let err = cas.resolve_ref("nope", false).unwrap_err();
        assert!(matches!(err, CasError::RefNotFound { .. }));
    }

    #[test]
    fn link_ref_copies_by_value() {
        let (_dir, cas) = cas();
        let d1 = Digest::new([1u8; 32], 1);
        cas.set_ref("r", &d1).unwrap();
        cas.link_ref("r", "s").unwrap();
        assert_eq!(cas.resolve_ref("s", false).unwrap(), d1);

        let d2 = Digest::new([2u8; 32], 2);
        cas.set_ref("r", &d2).unwrap();
        // s does not follow r's update
        assert_eq!(cas.resolve_ref("s", false).unwrap(), d1);
    }

    #[test]
    fn contains_reflects_presence() {
        let (_dir, cas) = cas();
        assert!(!cas.contains("missing"));
        cas.set_ref("present", &Digest::new([3u8; 32], 1)).unwrap();
        assert!(cas.contains("present"));
    }

    #[test]
    fn list_refs_orders_by_mtime_ascending() {
        let (_dir, cas) = cas();
        cas.set_ref("a", &Digest::new([1u8; 32], 1)).unwrap();
        sleep(Duration::from_millis(20));
        cas.set_ref("b", &Digest::new([2u8; 32], 1)).unwrap();
        sleep(Duration::from_millis(20));
        cas.set_ref("c", &Digest::new([3u8; 32], 1)).unwrap();
        sleep(Duration::from_millis(20));

        cas.resolve_ref("a", true).unwrap();

        let order = cas.list_refs().unwrap();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn remove_missing_ref_errors() {
        let (_dir, cas) = cas();
        let err = cas.remove("nope", false).unwrap_err();
        assert!(matches!(err, CasError::RefNotFound { .. }));
    }

    #[test]
    fn clean_refs_until_deletes_only_stale_refs() {
        let (_dir, cas) = cas();
        cas.set_ref("old", &Digest::new([1u8; 32], 1)).unwrap();
        sleep(Duration::from_millis(20));
        let cutoff = std::time::SystemTime::now();
        sleep(Duration::from_millis(20));
        cas.set_ref("new", &Digest::new([2u8; 32], 1)).unwrap();

        cas.clean_refs_until(cutoff).unwrap();
        assert!(!cas.contains("old"));
        assert!(cas.contains("new"));
    }
}
