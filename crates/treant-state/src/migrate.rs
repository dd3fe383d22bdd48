//! One-shot conversion of legacy tabular state files to JSON.
//!
//! A legacy file named `{Kind}.{uuid}.h5` becomes `{Kind}.{uuid}.json` in the
//! same directory. The new record is built through the ordinary field-level
//! operations, so it goes through the same validation as any other write and
//! relative paths are recomputed rather than copied.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::backend::{BackendFormat, JsonBackend, LegacyBackend};
use crate::error::StateError;
use crate::options::{StateOptions, UUID_LEN};
use crate::record::{RecordKind, LEGACY_EXTENSION};
use crate::transaction::{StateFile, Transaction};
use crate::Result;

/// Why a path does not look like a legacy state file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    #[error("'{0}' is not a valid file name")]
    NotAFileName(PathBuf),

    #[error("'{name}' has {found} dot-separated parts, expected 3")]
    Segments { name: String, found: usize },

    #[error("'{0}' is not a known record kind")]
    UnknownKind(String),

    #[error("extension '{0}' is not 'h5'")]
    Extension(String),

    #[error("uuid '{uuid}' has {len} characters, expected 36")]
    UuidLength { uuid: String, len: usize },
}

/// Kind and uuid encoded in a legacy file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyName {
    pub kind: RecordKind,
    pub uuid: String,
}

impl LegacyName {
    /// Parse `{Kind}.{uuid}.h5`. Only the file name is looked at.
    pub fn parse(path: &Path) -> std::result::Result<Self, FilenameError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FilenameError::NotAFileName(path.to_path_buf()))?;

        let parts: Vec<&str> = name.split('.').collect();
        let [prefix, uuid, extension] = parts[..] else {
            return Err(FilenameError::Segments {
                name: name.to_string(),
                found: parts.len(),
            });
        };

        let kind = RecordKind::from_prefix(prefix)
            .ok_or_else(|| FilenameError::UnknownKind(prefix.to_string()))?;
        if extension != LEGACY_EXTENSION {
            return Err(FilenameError::Extension(extension.to_string()));
        }
        let len = uuid.chars().count();
        if len != UUID_LEN {
            return Err(FilenameError::UuidLength {
                uuid: uuid.to_string(),
                len,
            });
        }

        Ok(Self {
            kind,
            uuid: uuid.to_string(),
        })
    }

    /// Name of the converted file.
    pub fn output_name(&self) -> String {
        self.kind
            .filename(&self.uuid, BackendFormat::Json.extension())
    }
}

/// Why a file was left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Filename(FilenameError),
    OutputExists(PathBuf),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Filename(e) => write!(f, "{e}"),
            SkipReason::OutputExists(p) => write!(f, "{} already exists", p.display()),
        }
    }
}

/// Result of migrating one file.
#[derive(Debug)]
pub enum MigrationOutcome {
    Converted { output: PathBuf },
    Skipped(SkipReason),
    Failed(StateError),
}

impl MigrationOutcome {
    pub fn is_converted(&self) -> bool {
        matches!(self, MigrationOutcome::Converted { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, MigrationOutcome::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MigrationOutcome::Failed(_))
    }
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOutcome::Converted { output } => {
                write!(f, "converted -> {}", output.display())
            }
            MigrationOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
            MigrationOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Receives per-file progress from [`Migrator::migrate_batch`].
pub trait MigrationReporter {
    fn started(&mut self, _path: &Path) {}

    fn finished(&mut self, path: &Path, outcome: &MigrationOutcome);
}

/// Writes progress as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl MigrationReporter for TracingReporter {
    fn started(&mut self, path: &Path) {
        info!(path = %path.display(), "migrating");
    }

    fn finished(&mut self, path: &Path, outcome: &MigrationOutcome) {
        match outcome {
            MigrationOutcome::Converted { output } => {
                info!(path = %path.display(), output = %output.display(), "converted")
            }
            MigrationOutcome::Skipped(reason) => {
                warn!(path = %path.display(), %reason, "skipped")
            }
            MigrationOutcome::Failed(e) => {
                error!(path = %path.display(), error = %e, "migration failed")
            }
        }
    }
}

/// Per-file outcomes of a batch run.
#[derive(Debug)]
pub struct MigrationSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<(PathBuf, MigrationOutcome)>,
}

impl MigrationSummary {
    pub fn converted(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_converted()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_failed()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        write!(
            f,
            "{} file(s): {} converted, {} skipped, {} failed in {}ms",
            self.results.len(),
            self.converted(),
            self.skipped(),
            self.failed(),
            elapsed.num_milliseconds()
        )
    }
}

/// Converts legacy state files.
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    options: StateOptions,
    overwrite: bool,
}

impl Migrator {
    pub fn new(options: StateOptions) -> Self {
        Self {
            options,
            overwrite: false,
        }
    }

    /// Replace existing JSON outputs instead of skipping them.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Migrate every path in order. A failure on one file does not stop the
    /// rest.
    pub fn migrate_batch<I, P>(&self, paths: I, reporter: &mut dyn MigrationReporter) -> MigrationSummary
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let started_at = Utc::now();
        let mut results = Vec::new();
        for path in paths {
            let path = path.as_ref();
            reporter.started(path);
            let outcome = self.migrate_file(path);
            reporter.finished(path, &outcome);
            results.push((path.to_path_buf(), outcome));
        }
        MigrationSummary {
            started_at,
            finished_at: Utc::now(),
            results,
        }
    }

    /// Migrate a single legacy file.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn migrate_file(&self, path: &Path) -> MigrationOutcome {
        let name = match LegacyName::parse(path) {
            Ok(name) => name,
            Err(e) => return MigrationOutcome::Skipped(SkipReason::Filename(e)),
        };
        let output = path.with_file_name(name.output_name());

        if output.exists() {
            if !self.overwrite {
                return MigrationOutcome::Skipped(SkipReason::OutputExists(output));
            }
            if let Err(e) = std::fs::remove_file(&output) {
                return MigrationOutcome::Failed(StateError::io(&output, e));
            }
        }

        match self.convert(path, &output, name.kind) {
            Ok(()) => MigrationOutcome::Converted { output },
            Err(e) => {
                if output.exists() {
                    if let Err(cleanup) = std::fs::remove_file(&output) {
                        warn!(output = %output.display(), error = %cleanup, "could not remove partial output");
                    }
                }
                MigrationOutcome::Failed(e)
            }
        }
    }

    fn convert(&self, path: &Path, output: &Path, kind: RecordKind) -> Result<()> {
        if !path.exists() {
            return Err(StateError::io(
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        let source = StateFile::with_backend(path, kind, Box::new(LegacyBackend), self.options)?;
        let target = StateFile::with_backend(
            output,
            kind,
            Box::new(JsonBackend {
                pretty: self.options.pretty,
            }),
            self.options,
        )?;

        source.read(|src| target.write(|dst| copy_record(src, dst)))
    }
}

/// Rebuild everything in `src` on `dst` through field-level operations.
fn copy_record(src: &Transaction<'_>, dst: &mut Transaction<'_>) -> Result<()> {
    dst.add_tags(src.tags().iter().cloned())?;
    dst.add_categories(src.categories())?;
    dst.set_coordinator(src.record().coordinator.as_deref().map(Path::new))?;

    match src.kind() {
        RecordKind::Treant => {}
        RecordKind::Group => {
            for member in src.members()? {
                dst.add_member(&member.uuid, &member.kind, &member.abspath)?;
            }
        }
        RecordKind::Sim => {
            let sim = src.sim()?;
            for name in sim.list_universes() {
                let universe = sim.universe(&name)?;
                let trajectory: Vec<&str> = universe
                    .trajectory
                    .iter()
                    .map(|t| t.abspath.as_str())
                    .collect();
                dst.add_universe(&name, &universe.topology.abspath, &trajectory)?;

                for (selection, value) in &universe.selections {
                    dst.add_selection(&name, selection, value.clone())?;
                }
                if let Some(resnums) = &universe.resnums {
                    dst.update_resnums(&name, Some(resnums.clone()))?;
                }
            }
            dst.set_default(sim.default_universe())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";

    #[test]
    fn parses_valid_name() {
        let name = LegacyName::parse(Path::new(&format!("/x/Sim.{UUID}.h5"))).unwrap();
        assert_eq!(name.kind, RecordKind::Sim);
        assert_eq!(name.output_name(), format!("Sim.{UUID}.json"));
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(
            LegacyName::parse(Path::new("Foo.123.h5")),
            Err(FilenameError::UnknownKind("Foo".into()))
        );
        assert!(matches!(
            LegacyName::parse(Path::new("Group.short-uuid.h5")),
            Err(FilenameError::UuidLength { len: 10, .. })
        ));
        assert!(matches!(
            LegacyName::parse(Path::new(&format!("sim.{UUID}.h5"))),
            Err(FilenameError::UnknownKind(_))
        ));
        assert!(matches!(
            LegacyName::parse(Path::new(&format!("Sim.{UUID}.json"))),
            Err(FilenameError::Extension(_))
        ));
        assert!(matches!(
            LegacyName::parse(Path::new("Sim.h5")),
            Err(FilenameError::Segments { found: 2, .. })
        ));
    }

    #[test]
    fn missing_source_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("Treant.{UUID}.h5"));
        let outcome = Migrator::default().migrate_file(&path);
        assert!(outcome.is_failed(), "{outcome}");
        assert!(!dir.path().join(format!("Treant.{UUID}.json")).exists());
        assert!(!path.exists());
    }

    #[test]
    fn summary_counts() {
        let now = Utc::now();
        let summary = MigrationSummary {
            started_at: now,
            finished_at: now,
            results: vec![
                (
                    PathBuf::from("a"),
                    MigrationOutcome::Converted {
                        output: PathBuf::from("a.json"),
                    },
                ),
                (
                    PathBuf::from("b"),
                    MigrationOutcome::Skipped(SkipReason::OutputExists(PathBuf::from("b.json"))),
                ),
            ],
        };
        assert_eq!((summary.converted(), summary.skipped(), summary.failed()), (1, 1, 0));
        assert!(summary.is_success());
        assert_eq!(
            summary.to_string(),
            "2 file(s): 1 converted, 1 skipped, 0 failed in 0ms"
        );
    }
}
