//! Per-table batch accumulator for insert records.
//!
//! Records are buffered under their destination table and released as a
//! batch once that table's threshold is reached. Whatever is left at
//! shutdown comes out through [`TableBatcher::drain`].

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::record::InsertRecord;

pub struct TableBatcher {
    buffers: IndexMap<String, Vec<InsertRecord>>,
    sizes: HashMap<String, usize>,
    default_size: usize,
}

impl TableBatcher {
    pub fn new(default_size: usize) -> Self {
        Self {
            buffers: IndexMap::new(),
            sizes: HashMap::new(),
            default_size: default_size.max(1),
        }
    }

    /// Set the threshold for one table. Zero is treated as one.
    pub fn with_batch_size(mut self, table: impl Into<String>, size: usize) -> Self {
        self.sizes.insert(table.into(), size.max(1));
        self
    }

    pub fn batch_size(&self, table: &str) -> usize {
        self.sizes.get(table).copied().unwrap_or(self.default_size)
    }

    /// Buffer `record`, returning its table's batch when the threshold is hit.
    pub fn push(&mut self, record: InsertRecord) -> Option<Vec<InsertRecord>> {
        let threshold = self.batch_size(&record.table);
        let buffer = self.buffers.entry(record.table.clone()).or_default();
        buffer.push(record);
        if buffer.len() >= threshold {
            Some(std::mem::take(buffer))
        } else {
            None
        }
    }

    /// Take every non-empty buffer, in the order tables were first seen.
    pub fn drain(&mut self) -> Vec<(String, Vec<InsertRecord>)> {
        self.buffers
            .iter_mut()
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(table, buffer)| (table.clone(), std::mem::take(buffer)))
            .collect()
    }

    /// Number of records buffered for `table`.
    pub fn len(&self, table: &str) -> usize {
        self.buffers.get(table).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.values().all(Vec::is_empty)
    }
}
