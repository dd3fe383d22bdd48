//! treant-migrate - convert legacy Treant state files to JSON
//!
//! Each `{Kind}.{uuid}.h5` argument is rebuilt as `{Kind}.{uuid}.json` in the
//! same directory. Files with unrecognised names are skipped with a warning;
//! a failure on one file does not stop the others.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, Level};

use treant_state::{MigrationOutcome, MigrationSummary, Migrator, StateOptions, TracingReporter};

#[derive(Parser, Debug)]
#[command(name = "treant-migrate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Migrate legacy Treant/Group/Sim state files to JSON", long_about = None)]
struct Cli {
    /// Legacy state files to convert
    #[arg(value_name = "STATEFILE", required = true)]
    statefiles: Vec<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON summary
    #[arg(long, env = "TREANT_LOG_JSON")]
    json: bool,

    /// Replace JSON files that already exist instead of skipping them
    #[arg(long)]
    overwrite: bool,

    /// Do not enforce legacy field widths on the JSON output
    #[arg(long)]
    unbounded: bool,
}

impl Cli {
    fn options(&self) -> StateOptions {
        let options = StateOptions::default();
        if self.unbounded {
            options.unbounded()
        } else {
            options
        }
    }
}

/// Machine-readable form of a [`MigrationSummary`].
#[derive(Serialize, Debug)]
struct SummaryReport {
    started_at: String,
    finished_at: String,
    converted: usize,
    skipped: usize,
    failed: usize,
    files: Vec<FileReport>,
}

#[derive(Serialize, Debug)]
struct FileReport {
    path: String,
    status: &'static str,
    detail: String,
}

impl From<&MigrationSummary> for SummaryReport {
    fn from(summary: &MigrationSummary) -> Self {
        let files = summary
            .results
            .iter()
            .map(|(path, outcome)| {
                let (status, detail) = match outcome {
                    MigrationOutcome::Converted { output } => {
                        ("converted", output.display().to_string())
                    }
                    MigrationOutcome::Skipped(reason) => ("skipped", reason.to_string()),
                    MigrationOutcome::Failed(e) => ("failed", e.to_string()),
                };
                FileReport {
                    path: path.display().to_string(),
                    status,
                    detail,
                }
            })
            .collect();
        Self {
            started_at: summary.started_at.to_rfc3339(),
            finished_at: summary.finished_at.to_rfc3339(),
            converted: summary.converted(),
            skipped: summary.skipped(),
            failed: summary.failed(),
            files,
        }
    }
}

fn render(summary: &MigrationSummary, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string(&SummaryReport::from(summary))?)
    } else {
        let mut out = String::new();
        for (path, outcome) in &summary.results {
            out.push_str(&format!("{}: {}\n", path.display(), outcome));
        }
        out.push_str(&summary.to_string());
        Ok(out)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    treant_state::init_tracing(cli.json, level);

    let migrator = Migrator::new(cli.options()).overwrite(cli.overwrite);
    info!(files = cli.statefiles.len(), "starting migration");
    let summary = migrator.migrate_batch(&cli.statefiles, &mut TracingReporter);

    println!("{}", render(&summary, cli.json)?);

    if !summary.is_success() {
        bail!("{} of {} file(s) failed to migrate", summary.failed(), summary.results.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_files_and_flags() {
        let cli = Cli::try_parse_from([
            "treant-migrate",
            "-v",
            "--overwrite",
            "Sim.a.h5",
            "Group.b.h5",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.overwrite);
        assert_eq!(
            cli.statefiles,
            vec![PathBuf::from("Sim.a.h5"), PathBuf::from("Group.b.h5")]
        );
        assert_eq!(cli.options(), StateOptions::default());
    }

    #[test]
    fn requires_at_least_one_file() {
        assert!(Cli::try_parse_from(["treant-migrate"]).is_err());
    }

    #[test]
    fn unbounded_flag_relaxes_widths() {
        let cli = Cli::try_parse_from(["treant-migrate", "--unbounded", "x.h5"]).unwrap();
        assert_eq!(cli.options(), StateOptions::default().unbounded());
    }

    #[test]
    fn bad_names_are_skipped_and_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("Foo.123.h5");
        let summary = Migrator::default().migrate_batch([&bogus], &mut TracingReporter);
        assert_eq!(summary.skipped(), 1);
        assert!(summary.is_success());

        let text = render(&summary, false).unwrap();
        assert!(text.contains("skipped: 'Foo' is not a known record kind"), "{text}");
        assert!(text.contains("1 file(s): 0 converted, 1 skipped, 0 failed"), "{text}");

        let json: serde_json::Value =
            serde_json::from_str(&render(&summary, true).unwrap()).unwrap();
        assert_eq!(json["skipped"], 1);
        assert_eq!(json["files"][0]["status"], "skipped");
    }
}
