//! Treant-State: synchronized state files for datreant records
//!
//! Every Treant, Group and Sim keeps its metadata in one state file beside
//! its directory. Several processes may open the same file at once; this
//! crate makes whole-record reads and writes safe under that sharing.
//!
//! ## Key Components
//!
//! - `LockGuard`: shared/exclusive advisory lock on a hidden proxy file
//! - `StateFile` / `Transaction`: scoped read and write transactions with
//!   nested reuse and a single store per top-level write
//! - `Record`: tags, categories, group members and simulation universes
//! - `JsonBackend` / `LegacyBackend`: current and legacy on-disk formats
//! - `TreantFile`, `GroupFile`, `SimFile`: one-call accessors per kind
//! - `Migrator`: legacy to JSON conversion, single file or batch

pub mod backend;
mod error;
pub mod facade;
pub mod lock;
pub mod migrate;
pub mod options;
pub mod paths;
pub mod record;
pub mod telemetry;
pub mod transaction;
pub mod universe;

pub use backend::{BackendFormat, JsonBackend, LegacyBackend, RecordBackend};
pub use error::StateError;
pub use facade::{GroupFile, SimFile, StateHandle, TreantFile};
pub use lock::{LockGuard, LockMode};
pub use migrate::{
    FilenameError, LegacyName, MigrationOutcome, MigrationReporter, MigrationSummary, Migrator,
    SkipReason, TracingReporter,
};
pub use options::{LengthPolicy, StateOptions};
pub use paths::PathPair;
pub use record::{MemberRef, Record, RecordKind};
pub use telemetry::init_tracing;
pub use transaction::{StateFile, Transaction};
pub use universe::{SelectionValue, SimState, UniverseDef};

/// Result type for treant-state operations
pub type Result<T> = std::result::Result<T, StateError>;
