//! Batched, single-writer persistence for collector output.

pub mod batcher;
pub mod consumer;
pub mod error;
pub mod record;
pub mod schema;
pub mod store;
pub mod writer;

pub use batcher::TableBatcher;
pub use consumer::{QueueStats, WriteConsumer};
pub use error::{RecordError, StoreError};
pub use record::{split_row, InsertRecord};
pub use schema::SchemaManager;
pub use store::{SqliteStore, StoreBackend, DATABASE_FILE};
pub use writer::{write_queue, WriteOp, WriteQueue};
