pub mod http_client;

use std::fmt;

use async_trait::async_trait;

use crate::app::Result;

pub use http_client::ReqwestClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Sent as `If-None-Match`.
    pub etag: Option<String>,
}

/// Response with the headers the engine cares about.
///
/// Redirects are never followed by the client; `location` carries the
/// target. The body is already decompressed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Network failures and timeouts are errors; every status is a response.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}
