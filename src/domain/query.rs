use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::app::{Result, RunnelError};
use crate::store::keys::canonical_uri;

/// Hops allowed before a redirect chain is abandoned.
pub const MAX_REDIRECTS: u8 = 5;

/// One fetch request.
///
/// A `Query` is never modified once built: following a redirect or learning
/// an ETag produces a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    url: String,
    since: i64,
    etag: Option<String>,
    force: bool,
    redirect_code: Option<u16>,
    redirect_count: u8,
    original_url: Option<String>,
    /// Where records are filed: the last permanent target, else the first URL.
    uri: String,
}

impl Query {
    pub fn new(url: &str) -> Result<Self> {
        let url = canonical_uri(url).map_err(|e| RunnelError::InvalidQuery(format!("{url}: {e}")))?;
        Ok(Self {
            uri: url.clone(),
            url,
            since: 0,
            etag: None,
            force: false,
            redirect_code: None,
            redirect_count: 0,
            original_url: None,
        })
    }

    /// Exclusive lower bound, in milliseconds, for emitted entries.
    pub fn with_since(self, since: i64) -> Self {
        Self {
            since: since.max(0),
            ..self
        }
    }

    pub fn with_force(self, force: bool) -> Self {
        Self { force, ..self }
    }

    pub fn with_etag(self, etag: Option<String>) -> Self {
        Self { etag, ..self }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn since(&self) -> i64 {
        self.since
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn redirect_code(&self) -> Option<u16> {
        self.redirect_code
    }

    pub fn redirect_count(&self) -> u8 {
        self.redirect_count
    }

    pub fn original_url(&self) -> Option<&str> {
        self.original_url.as_deref()
    }

    /// Identity used for caching and storage.
    ///
    /// A permanent redirect moves the identity to its target. Temporary
    /// redirects leave it where the chain last settled.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Follow a redirect to `location`, resolved against the current URL.
    ///
    /// The new query keeps the first URL of the chain as its original URL
    /// and drops any ETag, which belonged to the old location.
    pub fn redirect(&self, code: u16, location: &str) -> Result<Query> {
        let count = self.redirect_count + 1;
        if count > MAX_REDIRECTS {
            return Err(RunnelError::RedirectLimit(self.url.clone()));
        }
        let target = canonical_uri(Url::parse(&self.url)?.join(location)?.as_str())?;
        let uri = if is_permanent_redirect(code) {
            target.clone()
        } else {
            self.uri.clone()
        };
        Ok(Query {
            url: target,
            uri,
            since: self.since,
            etag: None,
            force: self.force,
            redirect_code: Some(code),
            redirect_count: count,
            original_url: Some(self.original_url.clone().unwrap_or_else(|| self.url.clone())),
        })
    }
}

pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

pub fn is_permanent_redirect(status: u16) -> bool {
    matches!(status, 301 | 308)
}

/// Structured query payload accepted at the pipeline boundary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub url: String,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub force: bool,
}

impl QueryRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Raw pipeline input: either bytes to decode or an already structured request.
#[derive(Debug, Clone)]
pub enum QueryInput {
    /// A plain URL or a JSON `QueryRequest`.
    Raw(Vec<u8>),
    Request(QueryRequest),
}

impl QueryInput {
    /// Decode into a `Query`. `force` is OR-ed with the request's own flag.
    pub fn decode(self, force: bool) -> Result<Query> {
        let request = match self {
            QueryInput::Request(request) => request,
            QueryInput::Raw(bytes) => decode_raw(&bytes)?,
        };
        if request.url.trim().is_empty() {
            return Err(RunnelError::InvalidQuery("missing url".into()));
        }
        let since = request.since.map(|d| d.timestamp_millis()).unwrap_or(0);
        Ok(Query::new(request.url.trim())?
            .with_since(since)
            .with_etag(request.etag)
            .with_force(force || request.force))
    }
}

fn decode_raw(bytes: &[u8]) -> Result<QueryRequest> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RunnelError::InvalidQuery(e.to_string()))?
        .trim();
    if text.starts_with('{') {
        serde_json::from_str(text).map_err(|e| RunnelError::InvalidQuery(e.to_string()))
    } else {
        Ok(QueryRequest::new(text))
    }
}

impl From<&str> for QueryInput {
    fn from(s: &str) -> Self {
        QueryInput::Raw(s.as_bytes().to_vec())
    }
}

impl From<String> for QueryInput {
    fn from(s: String) -> Self {
        QueryInput::Raw(s.into_bytes())
    }
}

impl From<Vec<u8>> for QueryInput {
    fn from(bytes: Vec<u8>) -> Self {
        QueryInput::Raw(bytes)
    }
}

impl From<QueryRequest> for QueryInput {
    fn from(request: QueryRequest) -> Self {
        QueryInput::Request(request)
    }
}
