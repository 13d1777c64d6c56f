//! Producer side of the write queue.
//!
//! Any number of tasks hold a cloned [`WriteQueue`] and push operations into
//! it; exactly one [`WriteConsumer`] applies them to the database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::debug;

use repeat_core::FieldSpec;

use crate::batcher::TableBatcher;
use crate::consumer::WriteConsumer;
use crate::record::InsertRecord;
use crate::store::StoreBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Create or widen a table before records for it arrive.
    EnsureTable { table: String, fields: Vec<FieldSpec> },
    Insert(InsertRecord),
}

/// Cloneable handle for enqueueing writes.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteOp>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

/// Build a queue whose consumer owns `backend`.
pub fn write_queue<B: StoreBackend>(backend: B, batcher: TableBatcher) -> (WriteQueue, WriteConsumer<B>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(Notify::new());
    let queue = WriteQueue {
        tx,
        closed: Arc::new(AtomicBool::new(false)),
        shutdown: shutdown.clone(),
    };
    (queue, WriteConsumer::new(backend, batcher, rx, shutdown))
}

impl WriteQueue {
    /// Ask the consumer to create or widen `table`. Returns `false` once closed.
    pub fn ensure_table(&self, table: &str, fields: &[FieldSpec]) -> bool {
        self.send(WriteOp::EnsureTable {
            table: table.to_string(),
            fields: fields.to_vec(),
        })
    }

    /// Enqueue one record. Returns `false` once closed.
    pub fn enqueue(&self, record: InsertRecord) -> bool {
        self.send(WriteOp::Insert(record))
    }

    fn send(&self, op: WriteOp) -> bool {
        if self.is_closed() {
            debug!("write queue closed, dropping operation");
            return false;
        }
        self.tx.send(op).is_ok()
    }

    /// Stop accepting writes and wake the consumer for its final flush.
    ///
    /// Calling this more than once is harmless.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
