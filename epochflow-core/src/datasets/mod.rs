//! Datasets and the batch streams they provide.
//!
//! A dataset owns its examples and hands out a fresh [`Stream`] per epoch for
//! each named stream (`train`, `valid`, `test`, ...).

pub mod synthetic;

pub use synthetic::LinearSynthetic;

use crate::error::DatasetError;
use crate::types::{Batch, batch_size};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One epoch worth of batches.
pub type Stream = Box<dyn Iterator<Item = Batch>>;

/// A source of named batch streams.
pub trait Dataset {
    /// Names of the streams this dataset can provide.
    fn stream_names(&self) -> Vec<String>;

    /// Create an iterator over one epoch of the named stream.
    fn stream(&self, name: &str, batch_size: usize) -> Result<Stream, DatasetError>;
}

/// Dataset backed by fully materialized, column-oriented tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    tables: BTreeMap<String, Arc<Batch>>,
}

impl InMemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream. All columns of `table` must have the same length.
    pub fn with_stream(
        mut self,
        name: impl Into<String>,
        table: Batch,
    ) -> Result<Self, DatasetError> {
        let name = name.into();
        let len = batch_size(&table);
        if let Some((column, values)) = table.iter().find(|(_, values)| values.len() != len) {
            return Err(DatasetError::Invalid {
                message: format!(
                    "column `{column}` of stream `{name}` has {} values, expected {len}",
                    values.len()
                ),
            });
        }
        self.tables.insert(name, Arc::new(table));
        Ok(self)
    }

    /// Number of examples in the named stream.
    pub fn len(&self, name: &str) -> Option<usize> {
        self.tables.get(name).map(|table| batch_size(table))
    }
}

impl Dataset for InMemoryDataset {
    fn stream_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn stream(&self, name: &str, batch_size: usize) -> Result<Stream, DatasetError> {
        if batch_size == 0 {
            return Err(DatasetError::ZeroBatchSize);
        }
        let table = self
            .tables
            .get(name)
            .ok_or_else(|| DatasetError::UnknownStream {
                name: name.to_string(),
            })?;
        Ok(Box::new(ColumnChunks::new(Arc::clone(table), batch_size)))
    }
}

/// Splits a table into consecutive batches; the last one may be shorter.
struct ColumnChunks {
    table: Arc<Batch>,
    batch_size: usize,
    offset: usize,
    len: usize,
}

impl ColumnChunks {
    fn new(table: Arc<Batch>, size: usize) -> Self {
        let len = batch_size(&table);
        Self {
            table,
            batch_size: size,
            offset: 0,
            len,
        }
    }
}

impl Iterator for ColumnChunks {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.offset >= self.len {
            return None;
        }
        let end = (self.offset + self.batch_size).min(self.len);
        let batch = self
            .table
            .iter()
            .map(|(name, values)| (name.clone(), values[self.offset..end].to_vec()))
            .collect();
        self.offset = end;
        Some(batch)
    }
}
