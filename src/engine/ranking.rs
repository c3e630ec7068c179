//! Query popularity: an in-memory hit counter merged into the rank index.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::app::Result;
use crate::store::keys::{self, KeyKind};
use crate::store::{Batch, StoreAccess};

pub struct Ranking {
    store: StoreAccess,
    counter_max: usize,
    counter: Mutex<HashMap<String, u64>>,
    flushing: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock_kind = "mutex", "Recovered from poisoned ranking lock");
            poisoned.into_inner()
        }
    }
}

impl Ranking {
    pub fn new(store: StoreAccess, counter_max: usize) -> Self {
        Self {
            store,
            counter_max,
            counter: Mutex::new(HashMap::new()),
            flushing: Mutex::new(()),
        }
    }

    /// Count one query for `uri`. Returns true once the counter tracks more
    /// than `counter_max` feeds and should be flushed.
    pub fn hit(&self, uri: &str) -> bool {
        let mut counter = lock(&self.counter);
        *counter.entry(uri.to_string()).or_insert(0) += 1;
        counter.len() > self.counter_max
    }

    /// Hits recorded since the last successful flush.
    pub fn counter(&self) -> HashMap<String, u64> {
        lock(&self.counter).clone()
    }

    /// Merge the counter into the rank index.
    ///
    /// Every stored feed gets exactly one rank key afterwards, seeded at 0
    /// when it has never been ranked. The old index is deleted and the new
    /// one written in the same batch. Hits are only taken off the counter
    /// once that batch is written; hits arriving meanwhile are kept.
    /// Returns the number of feeds ranked.
    pub fn flush(&self) -> Result<usize> {
        let _flushing = lock(&self.flushing);
        let snapshot = self.counter();

        let persisted: HashMap<String, u64> = self
            .store
            .ranks(None)?
            .into_iter()
            .map(|(count, uri)| (uri, count))
            .collect();

        let mut batch = Batch::new();
        for key in self.store.kv().scan_keys(&KeyKind::Rank.range())? {
            batch.del(key);
        }

        let uris = self.store.list()?;
        for uri in &uris {
            let count = persisted.get(uri).copied().unwrap_or(0)
                + snapshot.get(uri).copied().unwrap_or(0);
            batch.put(keys::rank_key(count, uri)?, "");
            batch.put(keys::ranked_key(uri)?, count.to_string());
        }

        self.store.write(batch)?;

        let mut counter = lock(&self.counter);
        for (uri, hits) in snapshot {
            if let Some(current) = counter.get_mut(&uri) {
                *current = current.saturating_sub(hits);
                if *current == 0 {
                    counter.remove(&uri);
                }
            }
        }
        info!(count = uris.len(), "Rank index flushed");
        Ok(uris.len())
    }

    /// Feed URIs by descending rank.
    pub fn ranks(&self, limit: Option<usize>) -> Result<Vec<String>> {
        let ranked = self.store.ranks(limit)?;
        debug!(count = ranked.len(), "Read rank index");
        Ok(ranked.into_iter().map(|(_, uri)| uri).collect())
    }

    /// Drop the whole rank index. The counter is left alone.
    pub fn reset(&self) -> Result<()> {
        let _flushing = lock(&self.flushing);
        let mut batch = Batch::new();
        for kind in [KeyKind::Rank, KeyKind::Ranked] {
            for key in self.store.kv().scan_keys(&kind.range())? {
                batch.del(key);
            }
        }
        let removed = batch.len();
        self.store.write(batch)?;
        info!(count = removed, "Rank index reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::domain::Feed;
    use crate::engine::tests::Flaky;
    use crate::store::SqliteStore;

    fn add_feed(store: &StoreAccess, uri: &str) {
        let mut batch = Batch::new();
        let feed = Feed {
            url: uri.into(),
            updated: 1,
            ..Default::default()
        };
        batch.put(keys::feed_key(uri).unwrap(), serde_json::to_vec(&feed).unwrap());
        store.write(batch).unwrap();
    }

    const X: &str = "http://x.com/feed";
    const Y: &str = "http://y.com/feed";

    #[test]
    fn test_flush_merges_counter_with_persisted_ranks() {
        let store = StoreAccess::new(Arc::new(SqliteStore::in_memory().unwrap()));
        add_feed(&store, X);
        add_feed(&store, Y);

        let ranking = Ranking::new(store.clone(), 500);
        for _ in 0..2 {
            ranking.hit(Y);
        }
        ranking.flush().unwrap();
        assert_eq!(store.ranks(None).unwrap(), vec![(2, Y.to_string()), (0, X.to_string())]);

        for _ in 0..3 {
            ranking.hit(X);
        }
        assert_eq!(ranking.flush().unwrap(), 2);

        assert_eq!(store.ranks(None).unwrap(), vec![(3, X.to_string()), (2, Y.to_string())]);
        assert_eq!(store.ranked_count(X).unwrap(), Some(3));
        assert_eq!(store.ranked_count(Y).unwrap(), Some(2));
        assert!(ranking.counter().is_empty());
        // one rank key per feed
        assert_eq!(store.kv().scan_keys(&KeyKind::Rank.range()).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_flush_keeps_counter() {
        let kv = Flaky::new();
        let store = StoreAccess::new(kv.clone());
        add_feed(&store, X);

        let ranking = Ranking::new(store.clone(), 500);
        ranking.hit(X);
        ranking.hit(X);

        kv.fail_writes.store(true, Ordering::SeqCst);
        assert!(ranking.flush().is_err());
        assert_eq!(ranking.counter().get(X), Some(&2));
        assert!(store.ranks(None).unwrap().is_empty());

        kv.fail_writes.store(false, Ordering::SeqCst);
        ranking.flush().unwrap();
        assert!(ranking.counter().is_empty());
        assert_eq!(ranking.ranks(None).unwrap(), vec![X.to_string()]);
    }

    #[test]
    fn test_unknown_uris_are_dropped() {
        let store = StoreAccess::new(Arc::new(SqliteStore::in_memory().unwrap()));
        add_feed(&store, X);
        let ranking = Ranking::new(store.clone(), 500);
        ranking.hit("http://nowhere.com/feed");
        ranking.flush().unwrap();
        assert_eq!(ranking.ranks(None).unwrap(), vec![X.to_string()]);
        assert!(ranking.counter().is_empty());
    }

    #[test]
    fn test_hit_signals_counter_max() {
        let store = StoreAccess::new(Arc::new(SqliteStore::in_memory().unwrap()));
        let ranking = Ranking::new(store, 2);
        assert!(!ranking.hit(X));
        assert!(!ranking.hit(X));
        assert!(!ranking.hit(Y));
        assert!(ranking.hit("http://z.com/feed"));
    }

    #[test]
    fn test_ranks_limit_and_reset() {
        let store = StoreAccess::new(Arc::new(SqliteStore::in_memory().unwrap()));
        add_feed(&store, X);
        add_feed(&store, Y);
        let ranking = Ranking::new(store.clone(), 500);
        ranking.hit(Y);
        ranking.flush().unwrap();

        assert_eq!(ranking.ranks(Some(1)).unwrap(), vec![Y.to_string()]);

        ranking.reset().unwrap();
        assert!(ranking.ranks(None).unwrap().is_empty());
        assert!(store.ranked_count(Y).unwrap().is_none());
        assert!(store.has(Y).unwrap());
    }
}
