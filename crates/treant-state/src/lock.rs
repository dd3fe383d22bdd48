//! Advisory locks on a proxy file beside each record.
//!
//! The record file itself is never locked: codecs replace it by rename on
//! every store, so a lock on its inode would not survive a write. Instead
//! every record `dir/Name.uuid.ext` has a hidden proxy `dir/.Name.uuid.ext.proxy`
//! which is created once and then only ever locked.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::StateError;
use crate::Result;

/// Strength of an advisory lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    /// Any number of concurrent holders; excludes `Exclusive`.
    Shared,
    /// Excludes every other holder.
    Exclusive,
}

impl LockMode {
    /// Whether a lock held in `self` mode is strong enough for `wanted`.
    pub fn covers(self, wanted: LockMode) -> bool {
        self >= wanted
    }
}

/// Path of the proxy file used to lock `record`.
pub fn proxy_path(record: &Path) -> PathBuf {
    let name = record
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let proxy = format!(".{name}.proxy");
    match record.parent() {
        Some(dir) => dir.join(proxy),
        None => PathBuf::from(proxy),
    }
}

/// Create the proxy file if it does not exist yet.
///
/// Losing a creation race to another process is fine; any other failure is
/// reported.
fn ensure_proxy(proxy: &Path) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(proxy) {
        Ok(_) => {
            debug!(proxy = %proxy.display(), "created proxy file");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(StateError::Lock {
            path: proxy.to_path_buf(),
            source: e,
        }),
    }
}

/// RAII guard for a held advisory lock. The lock is released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    proxy: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    /// Block until `mode` is granted on the proxy file of `record`.
    pub fn acquire(record: &Path, mode: LockMode) -> Result<Self> {
        let proxy = proxy_path(record);
        ensure_proxy(&proxy)?;

        let file = OpenOptions::new()
            .read(true)
            .open(&proxy)
            .map_err(|e| StateError::Lock {
                path: proxy.clone(),
                source: e,
            })?;

        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|e| StateError::Lock {
            path: proxy.clone(),
            source: e,
        })?;

        debug!(proxy = %proxy.display(), ?mode, "lock acquired");
        Ok(Self { file, proxy, mode })
    }

    /// Mode this guard holds.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release the lock now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(proxy = %self.proxy.display(), error = %e, "failed to release lock");
        } else {
            debug!(proxy = %self.proxy.display(), mode = ?self.mode, "lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_sits_beside_record_and_is_hidden() {
        let p = proxy_path(Path::new("/data/sims/Sim.abc.json"));
        assert_eq!(p, PathBuf::from("/data/sims/.Sim.abc.json.proxy"));
    }

    #[test]
    fn exclusive_covers_shared_but_not_reverse() {
        assert!(LockMode::Exclusive.covers(LockMode::Shared));
        assert!(LockMode::Exclusive.covers(LockMode::Exclusive));
        assert!(LockMode::Shared.covers(LockMode::Shared));
        assert!(!LockMode::Shared.covers(LockMode::Exclusive));
    }

    #[test]
    fn acquire_creates_proxy_once() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("Treant.x.json");

        let guard = LockGuard::acquire(&record, LockMode::Exclusive).unwrap();
        assert!(proxy_path(&record).exists());
        assert!(!record.exists());
        guard.release();

        // Second acquire hits the AlreadyExists path.
        let guard = LockGuard::acquire(&record, LockMode::Shared).unwrap();
        assert_eq!(guard.mode(), LockMode::Shared);
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("Treant.x.json");

        let a = LockGuard::acquire(&record, LockMode::Shared).unwrap();
        let b = LockGuard::acquire(&record, LockMode::Shared).unwrap();
        assert_eq!(a.mode(), b.mode());
    }

    #[test]
    fn missing_directory_is_lock_error() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("nope").join("Treant.x.json");

        let err = LockGuard::acquire(&record, LockMode::Shared).unwrap_err();
        assert!(matches!(err, StateError::Lock { .. }));
    }
}
