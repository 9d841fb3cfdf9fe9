//! Loading and regrouping of snapshot record files.

use std::{fs, io, path::Path};

use exclave_proto::{ProcessRecord, ProtocolError};
use thiserror::Error;
use tracing::debug;

/// Errors produced while loading snapshot files.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A file or directory could not be read.
    #[error("failed to read {path}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A record line failed to parse.
    #[error("{file}:{line}: malformed record")]
    Malformed {
        /// File containing the bad line.
        file: String,
        /// 1-based line number.
        line: usize,
        /// Underlying parse error.
        #[source]
        source: ProtocolError,
    },
}

/// All process records captured for one snapshot round.
#[derive(Debug, Clone)]
pub struct GlobalSnapshot {
    /// Shared round id.
    pub round: u64,
    /// Records indexed by process id (file order, sorted by file name).
    pub processes: Vec<ProcessRecord>,
}

impl GlobalSnapshot {
    /// Membership size implied by this snapshot.
    pub fn membership_size(&self) -> usize {
        self.processes.len()
    }
}

/// Read every `<prefix>*` file under `dir` and regroup the records by
/// round.
///
/// File names are sorted so that `snapshot0`, `snapshot1`, ... map to
/// process ids 0, 1, ... deterministically. Line `k` of each file is
/// that process's record for the `k`-th completed round; rounds missing
/// a record from some process (a capture still in progress when the
/// node stopped) are grouped from the records that do exist.
///
/// # Errors
///
/// Fails on unreadable files or malformed record lines.
pub fn load_dir(dir: &Path, prefix: &str) -> Result<Vec<GlobalSnapshot>, AuditError> {
    let read_dir = fs::read_dir(dir)
        .map_err(|source| AuditError::Io { path: dir.display().to_string(), source })?;

    let mut files: Vec<_> = read_dir
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(prefix))
        })
        .collect();
    files.sort();

    // rows[k] collects every process's record for round k.
    let mut rows: Vec<Vec<ProcessRecord>> = Vec::new();
    for path in &files {
        let display_path = path.display().to_string();
        debug!(file = %display_path, "reading snapshot file");
        let contents = fs::read_to_string(path)
            .map_err(|source| AuditError::Io { path: display_path.clone(), source })?;

        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = ProcessRecord::parse_line(line).map_err(|source| {
                AuditError::Malformed { file: display_path.clone(), line: index + 1, source }
            })?;
            if rows.len() <= index {
                rows.resize_with(index + 1, Vec::new);
            }
            rows[index].push(record);
        }
    }

    Ok(rows
        .into_iter()
        .filter(|processes| !processes.is_empty())
        .map(|processes| GlobalSnapshot { round: processes[0].round, processes })
        .collect())
}
