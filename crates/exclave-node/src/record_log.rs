//! Append-only snapshot record log.
//!
//! Each process writes one file; line `k` holds the process's record for
//! round `k + 1`. The offline audit tool reassembles a global snapshot
//! by reading the same line across every process's file.

use std::path::{Path, PathBuf};

use exclave_proto::ProcessRecord;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// Writer for one process's snapshot record file.
#[derive(Debug, Clone)]
pub struct RecordLog {
    path: PathBuf,
}

impl RecordLog {
    /// Log writing to `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional file name for process `id` under `dir`.
    pub fn in_dir(dir: &Path, id: usize) -> Self {
        Self::new(dir.join(format!("snapshot{id}")))
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub async fn append(&self, record: &ProcessRecord) -> std::io::Result<()> {
        let mut file =
            OpenOptions::new().create(true).append(true).open(&self.path).await?;
        let mut line = record.to_line();
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
