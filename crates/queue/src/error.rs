//! Store and record error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema error on table {table}: {reason}")]
    Schema { table: String, reason: String },
}

/// Why one output line did not become a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("empty set of values returned, skipping")]
    EmptyRow,

    #[error("not found value that matches field: {field} with idx: {index} in returned values (length: {len})")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },
}
