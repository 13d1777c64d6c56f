//! Single consumer that applies queued writes to the store.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::batcher::TableBatcher;
use crate::record::InsertRecord;
use crate::schema::{quote_ident, SchemaManager};
use crate::store::StoreBackend;
use crate::writer::WriteOp;

/// Running totals kept by the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub flushes: u64,
    pub rows_written: u64,
    pub rows_dropped: u64,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueStats {{ flushes: {}, written: {}, dropped: {} }}",
            self.flushes, self.rows_written, self.rows_dropped
        )
    }
}

pub struct WriteConsumer<B> {
    backend: B,
    batcher: TableBatcher,
    schema: SchemaManager,
    rx: mpsc::UnboundedReceiver<WriteOp>,
    shutdown: Arc<Notify>,
    stats: QueueStats,
}

impl<B: StoreBackend> WriteConsumer<B> {
    pub(crate) fn new(
        backend: B,
        batcher: TableBatcher,
        rx: mpsc::UnboundedReceiver<WriteOp>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            backend,
            batcher,
            schema: SchemaManager::new(),
            rx,
            shutdown,
            stats: QueueStats::default(),
        }
    }

    /// Apply operations until the queue is closed, then flush what is left
    /// and close the backend.
    pub async fn run(mut self) -> QueueStats {
        loop {
            tokio::select! {
                biased;
                op = self.rx.recv() => match op {
                    Some(op) => self.process(op).await,
                    None => break,
                },
                _ = self.shutdown.notified() => break,
            }
        }

        self.process_pending().await;
        self.flush_all().await;
        self.backend.close().await;

        info!(stats = %self.stats, "write queue drained");
        self.stats
    }

    pub async fn process(&mut self, op: WriteOp) {
        match op {
            WriteOp::EnsureTable { table, fields } => {
                if let Err(e) = self.schema.ensure_table(&self.backend, &table, &fields).await {
                    error!(table = %table, error = %e, "cannot ensure table");
                }
            }
            WriteOp::Insert(record) => {
                if let Some(batch) = self.batcher.push(record) {
                    self.flush(batch).await;
                }
            }
        }
    }

    /// Apply every operation already sitting in the channel without waiting
    /// for more.
    pub async fn process_pending(&mut self) {
        while let Ok(op) = self.rx.try_recv() {
            self.process(op).await;
        }
    }

    /// Flush every partially filled table buffer.
    pub async fn flush_all(&mut self) {
        for (table, batch) in self.batcher.drain() {
            debug!(table = %table, rows = batch.len(), "flushing remaining records");
            self.flush(batch).await;
        }
    }

    async fn flush(&mut self, batch: Vec<InsertRecord>) {
        let Some(statement) = insert_statement(&batch) else {
            return;
        };
        let rows = batch.len() as u64;
        match self.backend.execute(&statement).await {
            Ok(_) => {
                self.stats.flushes += 1;
                self.stats.rows_written += rows;
            }
            Err(e) => {
                self.stats.rows_dropped += rows;
                warn!(table = %batch[0].table, rows, error = %e, "batch insert failed, dropping batch");
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// One multi-row INSERT for a batch. All records must target the same table
/// with the same columns.
pub fn insert_statement(batch: &[InsertRecord]) -> Option<String> {
    let first = batch.first()?;
    let columns: Vec<String> = first.field_names.iter().map(|c| quote_ident(c)).collect();
    let rows: Vec<String> = batch
        .iter()
        .map(|r| format!("({})", r.values.join(", ")))
        .collect();
    Some(format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(&first.table),
        columns.join(", "),
        rows.join(", ")
    ))
}
