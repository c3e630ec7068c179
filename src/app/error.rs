use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnelError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} for {method} {url}")]
    Status {
        method: String,
        url: String,
        status: u16,
    },

    #[error("Too many redirects: {0}")]
    RedirectLimit(String),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl RunnelError {
    /// Failures caused by the transport or by the server's answer.
    ///
    /// Unexpected statuses count as network failures here. The fetcher
    /// caches every failed request regardless of this classification.
    pub fn is_network(&self) -> bool {
        matches!(self, RunnelError::Http(_) | RunnelError::Status { .. })
    }

    /// Store errors leave the engine unusable; everything else is per-query.
    pub fn is_store(&self) -> bool {
        matches!(self, RunnelError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, RunnelError>;
