//! In-memory negative caches with time-bounded entries.
//!
//! Both caches are advisory: a hit means "skip the network for now", a miss
//! says nothing about whether a fetch would succeed.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tracing::warn;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_CAPACITY: usize = 1000;

/// Map with expiring entries.
pub trait TtlMap<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V);
    fn remove(&self, key: &str);

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// LRU-bounded [`TtlMap`]; expired entries are dropped when read.
pub struct LruTtlMap<V> {
    ttl: Duration,
    entries: Mutex<LruCache<String, (Instant, V)>>,
}

impl<V: Clone + Send> LruTtlMap<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, (Instant, V)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(lock_kind = "mutex", "Recovered from poisoned cache lock");
                poisoned.into_inner()
            }
        }
    }
}

impl<V: Clone + Send> TtlMap<V> for LruTtlMap<V> {
    fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some((expires, value)) if Instant::now() < *expires => return Some(value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn set(&self, key: &str, value: V) {
        let expires = Instant::now() + self.ttl;
        self.lock().put(key.to_string(), (expires, value));
    }

    fn remove(&self, key: &str) {
        self.lock().pop(key);
    }
}

/// Where a URI was last redirected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub code: u16,
    pub url: String,
}

pub fn failure_key(method: &str, uri: &str) -> String {
    format!("{method}-{uri}")
}

/// The negative caches one engine instance consults.
#[derive(Clone)]
pub struct Caches {
    /// Keyed by the URL that answered with the redirect.
    pub redirects: Arc<dyn TtlMap<Redirect>>,
    /// Error messages keyed by [`failure_key`].
    pub failures: Arc<dyn TtlMap<String>>,
}

impl Caches {
    pub fn new(redirect_ttl: Duration, failure_ttl: Duration, capacity: usize) -> Self {
        Self {
            redirects: Arc::new(LruTtlMap::new(redirect_ttl, capacity)),
            failures: Arc::new(LruTtlMap::new(failure_ttl, capacity)),
        }
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let map = LruTtlMap::new(Duration::from_secs(60), 10);
        map.set("GET-http://a.com/", "boom".to_string());
        assert_eq!(map.get("GET-http://a.com/").as_deref(), Some("boom"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(map.has("GET-http://a.com/"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!map.has("GET-http://a.com/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_refreshes_ttl() {
        let map = LruTtlMap::new(Duration::from_secs(10), 10);
        map.set("k", 1u16);
        tokio::time::advance(Duration::from_secs(8)).await;
        map.set("k", 2u16);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(map.get("k"), Some(2));
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let map = LruTtlMap::new(DEFAULT_TTL, 2);
        map.set("a", 1u8);
        map.set("b", 2u8);
        assert_eq!(map.get("a"), Some(1));
        map.set("c", 3u8);
        assert!(map.has("a"));
        assert!(!map.has("b"));
        assert!(map.has("c"));
    }

    #[test]
    fn test_remove() {
        let map = LruTtlMap::new(DEFAULT_TTL, 2);
        map.set("a", 1u8);
        map.remove("a");
        assert!(!map.has("a"));
    }

    #[test]
    fn test_failure_key() {
        assert_eq!(failure_key("HEAD", "http://a.com/"), "HEAD-http://a.com/");
    }

    #[test]
    fn test_caches_are_independent() {
        let caches = Caches::default();
        caches.redirects.set(
            "http://a.com/",
            Redirect {
                code: 301,
                url: "http://b.com/".into(),
            },
        );
        assert!(caches.redirects.has("http://a.com/"));
        assert!(!caches.failures.has("http://a.com/"));
    }
}
