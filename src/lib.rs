//! # Runnel
//!
//! A caching feed fetcher: feeds are fetched over HTTP with conditional
//! requests, parsed, and kept in an ordered key-value store so that
//! repeated queries cost nothing while upstream is unchanged.
//!
//! ## Architecture
//!
//! ```text
//! Query → Fetch (HEAD/GET) → Normalizer → Store → Pipeline output
//!                                           ↑
//!                                 Ranking (hit counter → rank index)
//! ```
//!
//! - [`engine`]: the [`Cache`](engine::Cache) API, fetch state machine, pipelines and ranking
//! - [`store`]: order-preserving key schema over a SQLite key-value table
//! - [`fetcher`]: HTTP client seam with a reqwest implementation
//! - [`normalizer`]: feed parsing via feed-rs and text sanitization
//! - [`cache`]: redirect and failure caches with expiring entries
//!
//! ## Quick Start
//!
//! ```bash
//! # Fetch a feed and print its entries
//! runnel entries https://blog.rust-lang.org/feed.xml
//!
//! # Refetch feeds by popularity
//! runnel flush && runnel update
//!
//! # Keep refreshing every 30 minutes
//! runnel watch --interval 30m
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// the HTTP client and the engine.
pub mod app;

/// Redirect and failure caches.
pub mod cache;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/runnel/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Query`](domain::Query): one fetch request, immutable across redirects
/// - [`Feed`](domain::Feed), [`Entry`](domain::Entry): stored documents
pub mod domain;

/// The caching engine.
pub mod engine;

/// HTTP fetching.
///
/// - [`HttpClient`](fetcher::HttpClient): async trait the engine fetches through
/// - [`ReqwestClient`](fetcher::ReqwestClient): reqwest-based implementation
pub mod fetcher;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0
/// into [`ParsedFeed`](normalizer::ParsedFeed) and
/// [`ParsedEntry`](normalizer::ParsedEntry) values.
pub mod normalizer;

/// Periodic flush-and-update loop.
pub mod refresh;

/// Key-value persistence.
///
/// - [`KvStore`](store::KvStore): ordered key-value store trait
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
/// - [`StoreAccess`](store::StoreAccess): feed, entry and rank records
pub mod store;
