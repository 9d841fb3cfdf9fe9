//! Audit binary: validate captured snapshot files.
//!
//! ```text
//! exclave-audit ./snapshots
//! ```
//!
//! Prints a per-round report and exits non-zero when any invariant is
//! violated.

use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use exclave_audit::{AuditError, GlobalSnapshot, load_dir};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "exclave-audit", about = "Snapshot invariant checker")]
struct Args {
    /// Directory containing the snapshot record files.
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// File-name prefix of the record files.
    #[arg(long, default_value = "snapshot")]
    prefix: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let snapshots = match load_dir(&args.dir, &args.prefix) {
        Ok(snapshots) => snapshots,
        Err(err) => {
            error!(error = %err, "failed to load snapshots");
            return ExitCode::FAILURE;
        },
    };

    let mut out = io::stdout().lock();
    match report(&mut out, &snapshots) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %err, "failed to write report");
            ExitCode::FAILURE
        },
    }
}

/// Write the per-round report; returns the total violation count.
fn report(out: &mut impl Write, snapshots: &[GlobalSnapshot]) -> Result<usize, AuditError> {
    if snapshots.is_empty() {
        writeln!(out, "no snapshots found").map_err(write_error)?;
        return Ok(0);
    }

    let mut total = 0;
    for snapshot in snapshots {
        writeln!(out, "--- round {} ---", snapshot.round).map_err(write_error)?;
        for (process, record) in snapshot.processes.iter().enumerate() {
            writeln!(out, "  process {process}: {}", record.to_line()).map_err(write_error)?;
        }

        let violations = snapshot.check();
        if violations.is_empty() {
            writeln!(out, "  ok: all invariants satisfied").map_err(write_error)?;
        } else {
            for violation in &violations {
                writeln!(out, "  violation: {violation}").map_err(write_error)?;
            }
            total += violations.len();
        }
    }

    writeln!(out, "{} round(s) checked, {total} violation(s)", snapshots.len())
        .map_err(write_error)?;
    Ok(total)
}

fn write_error(source: io::Error) -> AuditError {
    AuditError::Io { path: "<stdout>".to_owned(), source }
}
