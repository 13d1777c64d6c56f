//! Destinations for a collector run's output.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use repeat_core::FieldMapping;
use repeat_queue::{split_row, InsertRecord, RecordError, WriteQueue};

use crate::error::SinkError;

const FILE_TIMESTAMP: &str = "%Y-%m-%d-%H:%M:%S";

/// Persists the combined output of one run.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, collector: &str, output: &[u8]) -> Result<(), SinkError>;
}

// ── FileSink ─────────────────────────────────────────────────────────

/// Writes each run's output to its own file in the work directory.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ResultSink for FileSink {
    async fn store(&self, collector: &str, output: &[u8]) -> Result<(), SinkError> {
        let base = format!("{collector}-{}", Local::now().format(FILE_TIMESTAMP));

        // create_new so two runs landing in the same second never share a file.
        let mut attempt = 0usize;
        let (path, mut file) = loop {
            let path = numbered_path(&self.dir, &base, "", attempt);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };

        file.write_all(output).await?;
        file.flush().await?;
        debug!(collector, path = %path.display(), bytes = output.len(), "stored output");
        Ok(())
    }
}

/// `dir/base[-n]ext`, with no suffix for attempt zero.
pub(crate) fn numbered_path(dir: &Path, base: &str, ext: &str, attempt: usize) -> PathBuf {
    if attempt == 0 {
        dir.join(format!("{base}{ext}"))
    } else {
        dir.join(format!("{base}-{attempt}{ext}"))
    }
}

// ── DatabaseSink ─────────────────────────────────────────────────────

/// Parses output lines into records for the collector's table.
pub struct DatabaseSink {
    table: String,
    mapping: FieldMapping,
    queue: WriteQueue,
}

impl DatabaseSink {
    pub fn new(table: impl Into<String>, mapping: FieldMapping, queue: WriteQueue) -> Self {
        Self {
            table: table.into(),
            mapping,
            queue,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Records for every usable line of `output`. Rejected lines are logged.
    pub fn parse(&self, collector: &str, output: &[u8]) -> Vec<InsertRecord> {
        let text = String::from_utf8_lossy(output);
        let mut records = Vec::new();

        for line in text.lines() {
            if let Some(ignore) = &self.mapping.ignore {
                if ignore.is_match(line) {
                    debug!(collector, line, "line matches ignore-regex, skipping");
                    continue;
                }
            }

            let row = split_row(line, &self.mapping.separator);
            match InsertRecord::from_row(&self.table, &self.mapping, &row) {
                Ok(record) => records.push(record),
                Err(RecordError::EmptyRow) => {
                    debug!(collector, "empty set of values returned, skipping");
                }
                Err(e) => warn!(collector, line, error = %e, "dropping line"),
            }
        }
        records
    }
}

#[async_trait]
impl ResultSink for DatabaseSink {
    async fn store(&self, collector: &str, output: &[u8]) -> Result<(), SinkError> {
        if !self.queue.ensure_table(&self.table, &self.mapping.fields) {
            return Err(SinkError::QueueClosed);
        }

        let records = self.parse(collector, output);
        let count = records.len();
        for record in records {
            if !self.queue.enqueue(record) {
                return Err(SinkError::QueueClosed);
            }
        }
        debug!(collector, table = %self.table, records = count, "enqueued records");
        Ok(())
    }
}
