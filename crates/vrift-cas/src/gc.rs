//! Garbage collector: computes the set of objects reachable from every ref
//! and deletes everything else.

use std::collections::HashSet;
use std::fs;

use tracing::info;

use crate::error::Result;
use crate::Cas;

impl Cas {
    /// Deletes every object unreachable from any ref, returning the number
    /// of bytes freed.
    ///
    /// Callers must ensure no writer is concurrently inserting refs or
    /// objects while `prune` runs — this crate does not take an internal
    /// lock; serialize externally (e.g. a process-level advisory lock on
    /// the store root) if multiple processes share one store.
    ///
    /// A ref whose root object is missing (dangling) contributes no
    /// reachable objects beyond itself; this is not an error, and makes
    /// `prune` idempotent and recoverable.
    pub fn prune(&self) -> Result<u64> {
        let mut reachable = HashSet::new();
        for ref_name in self.list_refs()? {
            let tree = self.resolve_ref(&ref_name, false)?;
            reachable.extend(self.reachable(&tree)?);
        }

        let mut bytes_freed = 0u64;
        let mut objects_removed = 0u64;
        for entry in walkdir::WalkDir::new(self.objects_dir())
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let hash = object_hash_from_path(self.objects_dir(), entry.path());
            let Some(hash) = hash else { continue };
            if reachable.contains(&hash) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if fs::remove_file(entry.path()).is_ok() {
                bytes_freed += meta.len();
                objects_removed += 1;
            }
        }

        info!(objects_removed, bytes_freed, "prune complete");
        Ok(bytes_freed)
    }

    /// Sum of sizes of every regular file under the store root, used by
    /// callers to enforce their own quotas; the store itself enforces none.
    pub fn calculate_cache_size(&self) -> Result<u64> {
        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() {
                if let Ok(meta) = entry.metadata() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}

/// Reconstructs a hex hash from an object's shard path
/// (`objects/<shard>/<tail>` -> `<shard><tail>`).
fn object_hash_from_path(objects_dir: &std::path::Path, path: &std::path::Path) -> Option<String> {
    let rel = path.strip_prefix(objects_dir).ok()?;
    let mut components = rel.components();
    let shard = components.next()?.as_os_str().to_str()?;
    let tail = components.next()?.as_os_str().to_str()?;
    if components.next().is_some() {
        return None;
    }
    Some(format!("{shard}{tail}"))
}
