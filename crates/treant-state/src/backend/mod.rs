//! Persisted representations of a [`Record`].
//!
//! Two formats share one interface:
//! - `json`: the current format, one JSON document per record
//! - `legacy`: the deprecated tabular binary format (see [`tables`])
//!
//! Both load and store whole records. Stores go through a temp file in the
//! record's directory and an atomic rename.

pub mod json;
pub mod legacy;
pub mod tables;

use std::fmt;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::StateError;
use crate::options::StateOptions;
use crate::record::{Record, RecordKind, CURRENT_EXTENSION, LEGACY_EXTENSION};
use crate::Result;

pub use json::JsonBackend;
pub use legacy::LegacyBackend;

/// Physical format of a state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFormat {
    Legacy,
    Json,
}

impl BackendFormat {
    pub fn extension(self) -> &'static str {
        match self {
            BackendFormat::Legacy => LEGACY_EXTENSION,
            BackendFormat::Json => CURRENT_EXTENSION,
        }
    }

    /// Format implied by a file's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            LEGACY_EXTENSION => Some(BackendFormat::Legacy),
            CURRENT_EXTENSION => Some(BackendFormat::Json),
            _ => None,
        }
    }

    /// Codec for this format.
    pub fn backend(self, options: &StateOptions) -> Box<dyn RecordBackend> {
        match self {
            BackendFormat::Legacy => Box::new(LegacyBackend),
            BackendFormat::Json => Box::new(JsonBackend {
                pretty: options.pretty,
            }),
        }
    }
}

impl fmt::Display for BackendFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Load and store whole records in one physical format.
///
/// Implementations do no locking; callers hold the record's lock.
pub trait RecordBackend: Send + Sync + fmt::Debug {
    fn format(&self) -> BackendFormat;

    /// Read the record at `path`. A file that does not exist yet yields an
    /// empty record of `kind`.
    fn load(&self, path: &Path, kind: RecordKind) -> Result<Record>;

    /// Replace the record at `path`.
    fn store(&self, path: &Path, record: &Record) -> Result<()>;
}

/// Write `data` to a temp file beside `path`, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StateError::io(dir, e))?;
    tmp.write_all(data).map_err(|e| StateError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StateError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StateError::io(path, e.error))?;
    Ok(())
}
