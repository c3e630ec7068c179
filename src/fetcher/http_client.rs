use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ETAG, IF_NONE_MATCH, LOCATION};
use reqwest::redirect::Policy;
use reqwest::Client;

use crate::app::Result;
use crate::fetcher::{HttpClient, HttpRequest, HttpResponse, Method};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_USER_AGENT: &str = concat!("runnel/", env!("CARGO_PKG_VERSION"));

/// reqwest-based [`HttpClient`].
///
/// Gzip bodies are decoded transparently and `Accept-Encoding` is sent on
/// every request. Redirects are left to the caller.
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .gzip(true)
            .brotli(true)
            .redirect(Policy::none())
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }
}

fn header(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut headers = HeaderMap::new();

        if let Some(etag) = &request.etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }

        let builder = match request.method {
            Method::Head => self.client.head(&request.url),
            Method::Get => self.client.get(&request.url),
        };
        let response = builder.headers(headers).send().await?;

        let status = response.status().as_u16();
        let etag = header(response.headers(), ETAG);
        let location = header(response.headers(), LOCATION);

        let body = match request.method {
            Method::Head => Vec::new(),
            Method::Get => response.bytes().await?.to_vec(),
        };

        Ok(HttpResponse {
            status,
            etag,
            location,
            body,
        })
    }
}
