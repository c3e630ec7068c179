pub mod access;
pub mod keys;
pub mod sqlite;

use crate::app::Result;

pub use access::{StoreAccess, NO_ETAG};
pub use sqlite::SqliteStore;

/// Inclusive key range, optionally reversed and limited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub gte: Vec<u8>,
    pub lte: Vec<u8>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl KeyRange {
    pub fn new(gte: Vec<u8>, lte: Vec<u8>) -> Self {
        Self {
            gte,
            lte,
            reverse: false,
            limit: None,
        }
    }

    pub fn reverse(self) -> Self {
        Self {
            reverse: true,
            ..self
        }
    }

    pub fn limit(self, limit: Option<usize>) -> Self {
        Self { limit, ..self }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.gte.as_slice() && key <= self.lte.as_slice()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

/// Mutations applied together or not at all, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key,
            value: value.into(),
        });
    }

    pub fn del(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Del { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Ordered key-value store over byte-string keys.
///
/// A missing key is `Ok(None)`. `write` must be atomic, and a single scan
/// must see a consistent snapshot.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn write(&self, batch: Batch) -> Result<()>;
    fn scan(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn scan_keys(&self, range: &KeyRange) -> Result<Vec<Vec<u8>>> {
        Ok(self.scan(range)?.into_iter().map(|(key, _)| key).collect())
    }

    fn scan_values(&self, range: &KeyRange) -> Result<Vec<Vec<u8>>> {
        Ok(self.scan(range)?.into_iter().map(|(_, value)| value).collect())
    }
}
