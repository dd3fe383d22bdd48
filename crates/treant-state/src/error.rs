//! Error types for treant-state

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or mutating a state file
#[derive(Error, Debug)]
pub enum StateError {
    /// Named universe is not defined in the record
    #[error("No such universe '{0}'; add it first")]
    UniverseNotFound(String),

    /// Named selection is not defined for the universe
    #[error("No such selection '{selection}' in universe '{universe}'")]
    SelectionNotFound { universe: String, selection: String },

    /// Member uuid is not present in the group
    #[error("No such member: {0}")]
    MemberNotFound(String),

    /// Rename target already taken
    #[error("Universe '{0}' already exists")]
    UniverseExists(String),

    /// A legacy node path is occupied by a node of the wrong shape
    #[error("Node '{path}' already exists and is not a {expected}")]
    NodeConflict { path: String, expected: &'static str },

    /// Universe or selection name cannot be used as a node name
    #[error("Invalid {field} name '{name}': must be non-empty and contain no '/'")]
    InvalidName { field: &'static str, name: String },

    /// Member uuid is not a canonical 36 character uuid
    #[error("Invalid uuid: {0}")]
    InvalidUuid(String),

    /// Value does not fit the fixed width of its legacy field
    #[error("Value for '{field}' exceeds {limit} bytes: {value}")]
    FieldTooLong {
        field: String,
        limit: usize,
        value: String,
    },

    /// Operation belongs to a different record kind
    #[error("Operation needs a {expected} record, this is a {found} record")]
    KindMismatch {
        expected: crate::record::RecordKind,
        found: crate::record::RecordKind,
    },

    /// A write was requested from inside a read transaction
    #[error("Cannot write inside a read transaction on {0}")]
    LockUpgrade(PathBuf),

    /// Proxy file could not be created or locked
    #[error("Lock failed on {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record file could not be read or written
    #[error("I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Legacy tabular file is truncated, has a bad checksum or bad layout
    #[error("Corrupt legacy state file {path}: {reason}")]
    CorruptLegacyFile { path: PathBuf, reason: String },
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StateError::CorruptLegacyFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the lookup failures (universe, selection, member).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StateError::UniverseNotFound(_)
                | StateError::SelectionNotFound { .. }
                | StateError::MemberNotFound(_)
        )
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}
