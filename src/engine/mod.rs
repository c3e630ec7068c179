//! The caching engine.
//!
//! [`Cache`] ties the store, the HTTP client, the negative caches and the
//! rank counter together and hands out [`Pipeline`]s:
//!
//! ```text
//! input → decode → redirect cache → fetch (HEAD/GET) → persist → emit
//!                                                         ↘ rank counter
//! ```

pub mod fetch;
pub mod persist;
pub mod pipeline;
pub mod ranking;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::{Result, RunnelError};
use crate::cache::{Caches, DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::config::Config;
use crate::domain::{Entry, Feed, Query};
use crate::fetcher::HttpClient;
use crate::normalizer::{FeedParser, FeedRsParser};
use crate::store::{KvStore, StoreAccess};

pub use fetch::{Fetcher, Outcome, Phase, Resolution};
pub use pipeline::{EntriesMode, FeedsMode, Mode, Output, Pipeline, PipelineSender};
pub use ranking::Ranking;

/// Decides whether a feed is emitted.
pub type FeedPredicate = Arc<dyn Fn(&Feed) -> bool + Send + Sync>;
/// Decides whether an entry is emitted.
pub type EntryPredicate = Arc<dyn Fn(&Entry) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Options {
    /// Distinct feeds the hit counter may track before it is flushed.
    pub counter_max: usize,
    /// Skip conditional requests and always GET.
    pub force: bool,
    /// Capacity of each pipeline channel.
    pub high_water_mark: usize,
    /// Pause before every request.
    pub delay: Duration,
    /// Emit [`Output::Record`] instead of [`Output::Json`].
    pub object_mode: bool,
    pub is_feed: FeedPredicate,
    pub is_entry: EntryPredicate,
    pub redirect_ttl: Duration,
    pub failure_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            counter_max: 500,
            force: false,
            high_water_mark: 16,
            delay: Duration::ZERO,
            object_mode: true,
            is_feed: Arc::new(|_: &Feed| true),
            is_entry: Arc::new(|_: &Entry| true),
            redirect_ttl: DEFAULT_TTL,
            failure_ttl: DEFAULT_TTL,
            cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&Config> for Options {
    fn from(config: &Config) -> Self {
        Self {
            counter_max: config.cache.counter_max,
            force: config.cache.force,
            high_water_mark: config.cache.high_water_mark,
            delay: Duration::from_millis(config.cache.delay_ms),
            object_mode: config.cache.object_mode,
            redirect_ttl: Duration::from_secs(config.negative_cache.redirect_ttl_secs),
            failure_ttl: Duration::from_secs(config.negative_cache.failure_ttl_secs),
            cache_capacity: config.negative_cache.capacity,
            ..Self::default()
        }
    }
}

/// Feed cache over a [`KvStore`].
pub struct Cache {
    store: StoreAccess,
    fetcher: Fetcher,
    ranking: Arc<Ranking>,
    options: Options,
}

impl Cache {
    pub fn new(db: Arc<dyn KvStore>, http: Arc<dyn HttpClient>, options: Options) -> Self {
        let caches = Caches::new(options.redirect_ttl, options.failure_ttl, options.cache_capacity);
        Self::with_parts(db, http, Arc::new(FeedRsParser::new()), caches, options)
    }

    pub fn with_parts(
        db: Arc<dyn KvStore>,
        http: Arc<dyn HttpClient>,
        parser: Arc<dyn FeedParser>,
        caches: Caches,
        options: Options,
    ) -> Self {
        let store = StoreAccess::new(db);
        let fetcher = Fetcher::new(store.clone(), http, parser, caches, options.delay);
        let ranking = Arc::new(Ranking::new(store.clone(), options.counter_max));
        Self {
            store,
            fetcher,
            ranking,
            options,
        }
    }

    /// Pipeline emitting feed documents.
    pub fn feeds(&self) -> Pipeline {
        self.pipeline(FeedsMode::new(self.options.is_feed.clone()))
    }

    /// Pipeline emitting entries newer than each query's `since`.
    ///
    /// Every query resolved here counts as a hit for its feed.
    pub fn entries(&self) -> Pipeline {
        self.pipeline(EntriesMode::new(self.options.is_entry.clone()))
    }

    fn pipeline<M: Mode>(&self, mode: M) -> Pipeline {
        Pipeline::spawn(
            mode,
            self.fetcher.clone(),
            self.store.clone(),
            self.ranking.clone(),
            &self.options,
        )
    }

    /// Feed URIs, most popular first, as of the last flush.
    pub fn ranks(&self, limit: Option<usize>) -> Result<Vec<String>> {
        self.ranking.ranks(limit)
    }

    pub fn flush_counter(&self) -> Result<usize> {
        self.ranking.flush()
    }

    pub fn reset_ranks(&self) -> Result<()> {
        self.ranking.reset()
    }

    /// Refetch every ranked feed, most popular first.
    ///
    /// Conditional requests are skipped. Returns the feeds that were
    /// actually fetched and stored.
    pub async fn update(&self) -> Result<Vec<Feed>> {
        let uris = self.ranking.ranks(None)?;
        let mut seen = HashSet::new();
        let mut updated = Vec::new();

        for uri in uris {
            if !seen.insert(uri.clone()) {
                continue;
            }
            let query = match Query::new(&uri) {
                Ok(query) => query.with_force(true),
                Err(e) => {
                    warn!(url = %uri, error = %e, "Skipping invalid ranked URI");
                    continue;
                }
            };
            let query = self.fetcher.follow_cached_redirect(query);

            let resolution = self.fetcher.resolve(query).await;
            let mut fatal = None;
            for e in resolution.errors {
                if resolution.fatal && e.is_store() && fatal.is_none() {
                    fatal = Some(e);
                } else {
                    warn!(url = %uri, error = %e, "Update failed");
                }
            }
            if resolution.fatal {
                return Err(fatal.unwrap_or_else(|| RunnelError::Other("store failed".into())));
            }

            if let Outcome::Stored {
                feed: Some(feed), ..
            } = resolution.outcome
            {
                updated.push(feed);
            }
        }

        info!(count = updated.len(), "Update finished");
        Ok(updated)
    }

    /// URIs of every stored feed.
    pub fn list(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    pub fn has(&self, uri: &str) -> Result<bool> {
        self.store.has(uri)
    }

    /// Delete everything stored for `uri` in one batch.
    pub fn remove(&self, uri: &str) -> Result<()> {
        self.store.remove(uri)?;
        info!(url = uri, "Feed removed");
        Ok(())
    }

    pub fn feed(&self, uri: &str) -> Result<Option<Feed>> {
        self.store.feed(uri)
    }

    /// Stored entries of `uri` with `updated > since`, up to now.
    pub fn entries_for(&self, uri: &str, since: i64) -> Result<Vec<Entry>> {
        let now = chrono::Utc::now().timestamp_millis();
        self.store.entries(uri, since, now)
    }
}
