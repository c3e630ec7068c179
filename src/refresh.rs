//! Periodic refresh: flush the hit counter, then refetch feeds by rank.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::app::{Result, RunnelError};
use crate::engine::Cache;

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Seconds between cycles (default: 3600 = 1 hour)
    pub interval_secs: u64,
    /// Whether to run a cycle immediately on start
    pub update_on_start: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            update_on_start: true,
        }
    }
}

impl RefreshConfig {
    /// Parse interval string like "1h", "30m", "6h", "1d", "45s" or "3600"
    pub fn parse_interval(s: &str) -> Result<u64> {
        let s = s.trim().to_lowercase();
        let invalid = |what: &str| RunnelError::Config(format!("Invalid {what}: {s}"));

        let (digits, unit, what) = if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600, "hours")
        } else if let Some(minutes) = s.strip_suffix('m') {
            (minutes, 60, "minutes")
        } else if let Some(days) = s.strip_suffix('d') {
            (days, 86400, "days")
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1, "seconds")
        } else {
            (s.as_str(), 1, "interval")
        };

        let secs = digits
            .parse::<u64>()
            .map_err(|_| invalid(what))?
            .checked_mul(unit)
            .ok_or_else(|| RunnelError::Config(format!("Interval too large: {s}")))?;

        if secs == 0 {
            return Err(RunnelError::Config("Interval must be positive".into()));
        }
        Ok(secs)
    }

    /// Format interval for display
    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs.is_multiple_of(86400) {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs.is_multiple_of(3600) {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs.is_multiple_of(60) {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

pub struct Refresher {
    cache: Arc<Cache>,
    config: RefreshConfig,
    running: AtomicBool,
    stop: Notify,
}

impl Refresher {
    pub fn new(cache: Arc<Cache>, config: RefreshConfig) -> Self {
        Self {
            cache,
            config,
            running: AtomicBool::new(true),
            stop: Notify::new(),
        }
    }

    /// Run cycles until ctrl-c or [`Refresher::stop`].
    pub async fn run(&self) -> Result<()> {
        info!(
            interval = %RefreshConfig::format_interval(self.config.interval_secs),
            "Refresher started"
        );

        if self.config.update_on_start {
            self.run_cycle().await?;
        }

        let mut timer = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        timer.tick().await; // the first tick is immediate

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = timer.tick() => {}
                _ = self.stop.notified() => break,
                _ = tokio::signal::ctrl_c() => break,
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.run_cycle().await?;
        }

        info!("Refresher shutting down");
        Ok(())
    }

    /// One flush + update cycle. Store failures end the loop.
    pub async fn run_cycle(&self) -> Result<()> {
        let start = Instant::now();

        match self.cache.flush_counter() {
            Ok(count) => info!(count, "Counter flushed"),
            Err(e) if e.is_store() => {
                error!(error = %e, "Counter flush failed");
                return Err(e);
            }
            Err(e) => warn!(error = %e, "Counter flush failed"),
        }

        let updated = self.cache.update().await?;
        info!(
            count = updated.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Refresh complete"
        );
        Ok(())
    }

    /// Stop the loop (called externally)
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{cache_with, ok, rss, FakeHttp};
    use crate::engine::Options;
    use crate::fetcher::Method;

    #[test]
    fn test_parse_interval() {
        assert_eq!(RefreshConfig::parse_interval("1h").unwrap(), 3600);
        assert_eq!(RefreshConfig::parse_interval("30m").unwrap(), 1800);
        assert_eq!(RefreshConfig::parse_interval("1d").unwrap(), 86400);
        assert_eq!(RefreshConfig::parse_interval("60s").unwrap(), 60);
        assert_eq!(RefreshConfig::parse_interval("3600").unwrap(), 3600);
        assert_eq!(RefreshConfig::parse_interval(" 6H ").unwrap(), 21600);
        assert!(RefreshConfig::parse_interval("invalid").is_err());
        assert!(RefreshConfig::parse_interval("0m").is_err());
    }

    #[test]
    fn test_parse_interval_overflow() {
        let huge = format!("{}d", u64::MAX / 2);
        assert!(matches!(
            RefreshConfig::parse_interval(&huge),
            Err(RunnelError::Config(_))
        ));
        assert!(RefreshConfig::parse_interval(&format!("{}s", u64::MAX)).is_ok());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(RefreshConfig::format_interval(3600), "1h");
        assert_eq!(RefreshConfig::format_interval(1800), "30m");
        assert_eq!(RefreshConfig::format_interval(86400), "1d");
        assert_eq!(RefreshConfig::format_interval(90), "90s");
        assert_eq!(RefreshConfig::format_interval(7200), "2h");
    }

    #[tokio::test]
    async fn test_stopped_refresher_runs_initial_cycle_only() {
        let http = FakeHttp::new(|_| Ok(ok(rss("A", &[]), None)));
        let (cache, _) = cache_with(http.clone(), Options::default());
        let cache = Arc::new(cache);

        cache.entries().collect(["http://a.com/feed"]).await;
        assert_eq!(http.count(Method::Get), 1);

        let refresher = Refresher::new(cache.clone(), RefreshConfig::default());
        refresher.stop();
        refresher.run().await.unwrap();

        // flushed, then refetched by rank
        assert_eq!(cache.ranks(None).unwrap(), vec!["http://a.com/feed".to_string()]);
        assert_eq!(http.count(Method::Get), 2);
    }
}
