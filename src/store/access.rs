use std::sync::Arc;

use crate::app::{Result, RunnelError};
use crate::domain::{Entry, Feed};
use crate::store::keys::{self, KeyKind};
use crate::store::{Batch, KvStore};

/// Stored in place of an ETag when the server sent none.
pub const NO_ETAG: &str = "NO_ETAG";

/// Feed, ETag, entry and rank records on top of a [`KvStore`].
#[derive(Clone)]
pub struct StoreAccess {
    db: Arc<dyn KvStore>,
}

impl StoreAccess {
    pub fn new(db: Arc<dyn KvStore>) -> Self {
        Self { db }
    }

    pub fn feed(&self, uri: &str) -> Result<Option<Feed>> {
        match self.db.get(&keys::feed_key(uri)?)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn etag(&self, uri: &str) -> Result<Option<String>> {
        let value = self.db.get(&keys::etag_key(uri)?)?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    pub fn has(&self, uri: &str) -> Result<bool> {
        Ok(self.db.get(&keys::feed_key(uri)?)?.is_some())
    }

    /// Entries of `uri` with `since < updated <= until`, oldest first.
    pub fn entries(&self, uri: &str, since: i64, until: i64) -> Result<Vec<Entry>> {
        let range = keys::entry_range(uri, since, until)?;
        self.db
            .scan_values(&range)?
            .iter()
            .map(|value| serde_json::from_slice(value).map_err(RunnelError::from))
            .collect()
    }

    /// URIs of every stored feed, in key order.
    pub fn list(&self) -> Result<Vec<String>> {
        let keys = self.db.scan_keys(&KeyKind::Feed.range())?;
        Ok(keys.iter().filter_map(|k| keys::uri_from_feed_key(k)).collect())
    }

    /// Last count recorded for `uri` by a ranking flush.
    pub fn ranked_count(&self, uri: &str) -> Result<Option<u64>> {
        let value = self.db.get(&keys::ranked_key(uri)?)?;
        Ok(value.and_then(|v| String::from_utf8_lossy(&v).parse().ok()))
    }

    /// `(count, uri)` pairs from the rank index, most popular first.
    pub fn ranks(&self, limit: Option<usize>) -> Result<Vec<(u64, String)>> {
        let range = KeyKind::Rank.range().reverse().limit(limit);
        let keys = self.db.scan_keys(&range)?;
        Ok(keys.iter().filter_map(|k| keys::rank_from_key(k)).collect())
    }

    /// Deletions for every record filed under `uri`, appended to `batch`.
    pub fn remove_ops(&self, uri: &str, batch: &mut Batch) -> Result<()> {
        batch.del(keys::feed_key(uri)?);
        batch.del(keys::etag_key(uri)?);
        for key in self.db.scan_keys(&keys::all_entries_range(uri)?)? {
            batch.del(key);
        }
        if let Some(count) = self.ranked_count(uri)? {
            batch.del(keys::rank_key(count, uri)?);
        }
        batch.del(keys::ranked_key(uri)?);
        Ok(())
    }

    pub fn remove(&self, uri: &str) -> Result<()> {
        let mut batch = Batch::new();
        self.remove_ops(uri, &mut batch)?;
        self.write(batch)
    }

    pub fn write(&self, batch: Batch) -> Result<()> {
        self.db.write(batch)
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.db
    }
}
