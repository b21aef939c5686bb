// JSONL call log
//
// One file per UTC day, one JSON record per line. Writes run on the
// blocking pool so the request path never waits on disk.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::types::CallRecord;
use super::CallLogSink;

#[derive(Clone)]
pub struct JsonlCallLog {
    log_dir: Arc<PathBuf>,
}

impl JsonlCallLog {
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).with_context(|| {
            format!("Failed to create call log directory: {}", log_dir.display())
        })?;

        Ok(Self {
            log_dir: Arc::new(log_dir),
        })
    }

    /// Default location: ~/.intellid/calls
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".intellid").join("calls"))
    }

    pub fn dir(&self) -> &Path {
        &self.log_dir
    }

    /// Append a record to today's file, synchronously.
    pub fn append(&self, record: &CallRecord) -> Result<()> {
        append_to(&self.log_dir, record)
    }

    /// Read every record for a date (`YYYY-MM-DD`).
    pub fn read_records(&self, date: &str) -> Result<Vec<CallRecord>> {
        let log_file = self.log_dir.join(format!("{}.jsonl", date));

        if !log_file.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&log_file)
            .with_context(|| format!("Failed to read call log: {}", log_file.display()))?;

        contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to parse call log")
    }
}

fn append_to(dir: &Path, record: &CallRecord) -> Result<()> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let log_file = dir.join(format!("{}.jsonl", today));

    let json = serde_json::to_string(record).context("Failed to serialize call record")?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open call log: {}", log_file.display()))?;

    writeln!(file, "{}", json).context("Failed to write call record")?;
    Ok(())
}

impl CallLogSink for JsonlCallLog {
    fn record(&self, record: CallRecord) {
        let dir = Arc::clone(&self.log_dir);
        let write = move || {
            if let Err(e) = append_to(&dir, &record) {
                tracing::warn!(
                    request_id = %record.request_id,
                    error = %e,
                    "Failed to append call record"
                );
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }
}
