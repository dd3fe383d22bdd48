//! Scoped read/write transactions over one state file.
//!
//! Every top-level call follows the same shape:
//!
//! 1. take the proxy lock (shared for reads, exclusive for writes)
//! 2. load the whole record through the backend
//! 3. run the caller's closure against a [`Transaction`]
//! 4. for writes, store the record if the closure succeeded
//! 5. release the lock, whatever happened
//!
//! Composite operations call further field-level operations on the same
//! `Transaction` instead of opening a new one, so a single top-level write
//! stores exactly once.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::backend::{BackendFormat, RecordBackend};
use crate::error::StateError;
use crate::lock::{LockGuard, LockMode};
use crate::options::{LengthPolicy, StateOptions};
use crate::paths::absolutize;
use crate::record::{Record, RecordKind};
use crate::Result;

/// A record file plus the codec used to read and write it.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    kind: RecordKind,
    backend: Box<dyn RecordBackend>,
    options: StateOptions,
}

impl StateFile {
    /// Open the state file at `path`, creating it if absent.
    ///
    /// The codec is chosen from the extension; anything other than the
    /// legacy extension is treated as JSON.
    pub fn open(path: impl AsRef<Path>, kind: RecordKind, options: StateOptions) -> Result<Self> {
        let format = BackendFormat::from_path(path.as_ref()).unwrap_or(BackendFormat::Json);
        Self::with_backend(path, kind, format.backend(&options), options)
    }

    /// Open with an explicit codec, creating the file if absent.
    pub fn with_backend(
        path: impl AsRef<Path>,
        kind: RecordKind,
        backend: Box<dyn RecordBackend>,
        options: StateOptions,
    ) -> Result<Self> {
        let state = Self {
            path: absolutize(path.as_ref())?,
            kind,
            backend,
            options,
        };
        if !state.path.exists() {
            debug!(path = %state.path.display(), %kind, "creating state file");
            state.write(|_| Ok(()))?;
        }
        Ok(state)
    }

    /// Open `{kind}.{uuid}.*` in `dir`, preferring an existing JSON file,
    /// then an existing legacy file, else creating a JSON file.
    pub fn discover(
        dir: impl AsRef<Path>,
        kind: RecordKind,
        uuid: &str,
        options: StateOptions,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let json = dir.join(kind.filename(uuid, BackendFormat::Json.extension()));
        let legacy = dir.join(kind.filename(uuid, BackendFormat::Legacy.extension()));
        let path = if !json.exists() && legacy.exists() {
            legacy
        } else {
            json
        };
        Self::open(path, kind, options)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn format(&self) -> BackendFormat {
        self.backend.format()
    }

    pub fn options(&self) -> &StateOptions {
        &self.options
    }

    /// Directory holding the record; relative paths are computed against it.
    pub fn location(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Run `op` under a shared lock against a freshly loaded record.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub fn read<T>(&self, op: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let guard = LockGuard::acquire(&self.path, LockMode::Shared)?;
        let record = self.backend.load(&self.path, self.kind)?;
        let mut txn = Transaction {
            file: self,
            mode: guard.mode(),
            record,
        };
        let out = op(&mut txn);
        drop(guard);
        out
    }

    /// Run `op` under an exclusive lock and store the record if it succeeds.
    ///
    /// On error nothing is stored; the loaded record is discarded.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub fn write<T>(&self, op: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let guard = LockGuard::acquire(&self.path, LockMode::Exclusive)?;
        let record = self.backend.load(&self.path, self.kind)?;
        let mut txn = Transaction {
            file: self,
            mode: guard.mode(),
            record,
        };
        let out = op(&mut txn)?;
        self.backend.store(&self.path, &txn.record)?;
        drop(guard);
        Ok(out)
    }

    /// Snapshot of the whole record.
    pub fn load(&self) -> Result<Record> {
        self.read(|txn| Ok(txn.record().clone()))
    }
}

/// The loaded record and the lock it is held under.
///
/// Passed to transaction closures; nested operations reuse it.
#[derive(Debug)]
pub struct Transaction<'a> {
    file: &'a StateFile,
    mode: LockMode,
    record: Record,
}

impl<'a> Transaction<'a> {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn kind(&self) -> RecordKind {
        self.file.kind
    }

    pub fn location(&self) -> &'a Path {
        self.file.location()
    }

    pub fn policy(&self) -> LengthPolicy {
        self.file.options.length_policy
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Mutable record; only inside a write transaction.
    pub fn record_mut(&mut self) -> Result<&mut Record> {
        if !self.mode.covers(LockMode::Exclusive) {
            return Err(StateError::LockUpgrade(self.file.path.clone()));
        }
        Ok(&mut self.record)
    }

    /// Nested read: any held lock suffices, nothing is reloaded.
    pub fn read<T>(&mut self, op: impl FnOnce(&mut Transaction<'a>) -> Result<T>) -> Result<T> {
        op(self)
    }

    /// Nested write: requires the exclusive lock to be held already.
    /// The outermost write stores the result.
    pub fn write<T>(&mut self, op: impl FnOnce(&mut Transaction<'a>) -> Result<T>) -> Result<T> {
        if !self.mode.covers(LockMode::Exclusive) {
            return Err(StateError::LockUpgrade(self.file.path.clone()));
        }
        op(self)
    }

    pub(crate) fn require_kind(&self, expected: RecordKind) -> Result<()> {
        if self.file.kind != expected {
            return Err(StateError::KindMismatch {
                expected,
                found: self.file.kind,
            });
        }
        Ok(())
    }
}
