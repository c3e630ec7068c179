pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "runnel")]
#[command(about = "A caching feed fetcher", long_about = None)]
pub struct Cli {
    /// Database file (default: <data dir>/runnel/runnel.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print feed documents, fetching them when needed
    Feeds {
        /// Feed URLs or JSON query objects
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print entries, fetching feeds when needed
    Entries {
        /// Feed URLs or JSON query objects
        #[arg(required = true)]
        urls: Vec<String>,

        /// Only entries updated after this time (RFC 3339)
        #[arg(long)]
        since: Option<String>,
    },
    /// Refetch ranked feeds, most popular first
    Update,
    /// Merge the hit counter into the rank index
    Flush,
    /// Print feed URLs by rank
    Ranks {
        /// Maximum number of feeds to print
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the URLs of all stored feeds
    List,
    /// Check whether a feed is stored
    Has {
        /// URL of the feed
        url: String,
    },
    /// Remove a feed and everything stored for it
    Remove {
        /// URL of the feed to remove
        url: String,
    },
    /// Drop the rank index
    ResetRanks,
    /// Flush and update on an interval until interrupted
    Watch {
        /// Update interval (e.g., "1h", "30m", "6h", "1d")
        #[arg(short, long, default_value = "1h")]
        interval: String,

        /// Skip initial update on start
        #[arg(long)]
        no_initial_update: bool,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_entries() {
        let cli = Cli::try_parse_from([
            "runnel",
            "entries",
            "http://a.com/feed",
            "--since",
            "2024-01-01T00:00:00Z",
        ])
        .unwrap();
        match cli.command {
            Commands::Entries { urls, since } => {
                assert_eq!(urls, vec!["http://a.com/feed"]);
                assert_eq!(since.as_deref(), Some("2024-01-01T00:00:00Z"));
            }
            _ => panic!("expected entries"),
        }
    }

    #[test]
    fn test_feeds_requires_url() {
        assert!(Cli::try_parse_from(["runnel", "feeds"]).is_err());
    }
}
