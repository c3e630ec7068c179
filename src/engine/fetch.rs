//! Per-query conditional fetch state machine.
//!
//! ```text
//! Start ──etag known──▶ Conditional (HEAD) ──200/error──▶ Get ──200──▶ Persist
//!   │                        │ 304 ─▶ Cached                │ 304 ─▶ Cached
//!   └──no etag / force──────────────────────────────────────┘
//!                 3xx on either request ─▶ Start with the redirected query
//! ```
//!
//! Every store mutation a query causes, including removals on permanent
//! redirects, goes into one batch that is written when the query resolves.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::{Result, RunnelError};
use crate::cache::{failure_key, Caches, Redirect};
use crate::domain::query::{is_permanent_redirect, is_redirect};
use crate::domain::{Entry, Feed, Query};
use crate::engine::persist::persist_ops;
use crate::fetcher::{HttpClient, HttpRequest, HttpResponse, Method};
use crate::normalizer::FeedParser;
use crate::store::{Batch, StoreAccess, NO_ETAG};

const GONE: u16 = 410;
const NOT_MODIFIED: u16 = 304;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Conditional,
    Get,
    Persist,
}

/// How a query ended.
///
/// Each variant carries the query as it stood at the end, after redirects.
#[derive(Debug)]
pub enum Outcome {
    /// Upstream unchanged, or skipped; stored data is current.
    Cached(Query),
    /// Fresh documents were written.
    Stored {
        query: Query,
        feed: Option<Feed>,
        entries: Vec<Entry>,
    },
    /// The feed is gone for good and its records were removed.
    Gone(Query),
    /// Nothing to show. Any error is in [`Resolution::errors`].
    Failed(Query),
}

impl Outcome {
    pub fn query(&self) -> &Query {
        match self {
            Outcome::Cached(query)
            | Outcome::Gone(query)
            | Outcome::Failed(query)
            | Outcome::Stored { query, .. } => query,
        }
    }
}

#[derive(Debug)]
pub struct Resolution {
    pub outcome: Outcome,
    /// Errors to report, at most one per failure.
    pub errors: Vec<RunnelError>,
    /// The store failed; the caller should stop using it.
    pub fatal: bool,
}

enum Step {
    Next(Phase),
    Done(Outcome),
}

/// State of one query while it moves through the phases.
struct FetchContext {
    query: Query,
    phase: Phase,
    etag: Option<String>,
    response: Option<HttpResponse>,
    batch: Batch,
    errors: Vec<RunnelError>,
}

impl FetchContext {
    fn new(query: Query) -> Self {
        Self {
            query,
            phase: Phase::Start,
            etag: None,
            response: None,
            batch: Batch::new(),
            errors: Vec::new(),
        }
    }

    /// The known ETag, unless it is the "server sent none" marker.
    fn validator(&self) -> Option<&str> {
        self.etag.as_deref().filter(|e| *e != NO_ETAG)
    }

    fn unchanged(&self, response: &HttpResponse) -> bool {
        response.status == NOT_MODIFIED
            || matches!((self.validator(), response.etag.as_deref()), (Some(a), Some(b)) if a == b)
    }

    fn done(&self) -> Outcome {
        Outcome::Failed(self.query.clone())
    }
}

/// Drives queries through the phases. Cheap to clone.
#[derive(Clone)]
pub struct Fetcher {
    store: StoreAccess,
    http: Arc<dyn HttpClient>,
    parser: Arc<dyn FeedParser>,
    caches: Caches,
    delay: Duration,
}

impl Fetcher {
    pub fn new(
        store: StoreAccess,
        http: Arc<dyn HttpClient>,
        parser: Arc<dyn FeedParser>,
        caches: Caches,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            http,
            parser,
            caches,
            delay,
        }
    }

    /// Apply a live redirect-cache entry for the query's URL, if any.
    pub fn follow_cached_redirect(&self, query: Query) -> Query {
        match self.caches.redirects.get(query.url()) {
            Some(redirect) => match query.redirect(redirect.code, &redirect.url) {
                Ok(next) => next,
                Err(e) => {
                    warn!(url = query.url(), error = %e, "Ignoring cached redirect");
                    query
                }
            },
            None => query,
        }
    }

    /// Run `query` to completion and write its batch.
    pub async fn resolve(&self, query: Query) -> Resolution {
        let mut cx = FetchContext::new(query);

        let outcome = loop {
            debug!(url = cx.query.url(), phase = ?cx.phase, "Fetch step");
            match self.step(&mut cx).await {
                Ok(Step::Next(phase)) => cx.phase = phase,
                Ok(Step::Done(outcome)) => break outcome,
                Err(e) => {
                    let fatal = e.is_store();
                    cx.errors.push(e);
                    if fatal {
                        return Resolution {
                            outcome: cx.done(),
                            errors: cx.errors,
                            fatal: true,
                        };
                    }
                    break cx.done();
                }
            }
        };

        self.commit(cx.batch, cx.errors, outcome)
    }

    fn commit(&self, batch: Batch, mut errors: Vec<RunnelError>, outcome: Outcome) -> Resolution {
        if batch.is_empty() {
            return Resolution {
                outcome,
                errors,
                fatal: false,
            };
        }

        let ops = batch.len();
        match self.store.write(batch) {
            Ok(()) => {
                debug!(url = outcome.query().url(), ops, "Batch written");
                Resolution {
                    outcome,
                    errors,
                    fatal: false,
                }
            }
            Err(e) => {
                warn!(url = outcome.query().url(), error = %e, "Batch write failed");
                errors.push(e);
                let query = outcome.query().clone();
                Resolution {
                    outcome: Outcome::Failed(query),
                    errors,
                    fatal: false,
                }
            }
        }
    }

    async fn step(&self, cx: &mut FetchContext) -> Result<Step> {
        match cx.phase {
            Phase::Start => self.start(cx),
            Phase::Conditional => self.conditional(cx).await,
            Phase::Get => self.get(cx).await,
            Phase::Persist => self.persist(cx),
        }
    }

    fn start(&self, cx: &mut FetchContext) -> Result<Step> {
        if cx.query.force() {
            cx.etag = None;
            return Ok(Step::Next(Phase::Get));
        }
        let stored = self.store.etag(cx.query.uri())?;
        cx.etag = stored.or_else(|| cx.query.etag().map(String::from));
        if cx.validator().is_some() {
            Ok(Step::Next(Phase::Conditional))
        } else {
            Ok(Step::Next(Phase::Get))
        }
    }

    async fn conditional(&self, cx: &mut FetchContext) -> Result<Step> {
        let uri = cx.query.uri().to_string();
        if self.caches.failures.has(&failure_key(Method::Head.as_str(), &uri)) {
            debug!(url = %uri, "HEAD failure cached, keeping stored data");
            return Ok(Step::Done(Outcome::Cached(cx.query.clone())));
        }

        let response = match self.request(Method::Head, cx).await {
            Ok(response) => response,
            Err(e) => {
                // HEAD support is patchy, so a failed HEAD is not a failed query
                debug!(url = %uri, error = %e, "HEAD failed, falling back to GET");
                self.caches
                    .failures
                    .set(&failure_key(Method::Head.as_str(), &uri), e.to_string());
                return Ok(Step::Next(Phase::Get));
            }
        };

        if cx.unchanged(&response) {
            debug!(url = %uri, "Not modified");
            return Ok(Step::Done(Outcome::Cached(cx.query.clone())));
        }
        if is_redirect(response.status) {
            return self.redirect(cx, response.status, response.location.as_deref(), Method::Head);
        }
        if response.status == GONE {
            info!(url = %uri, "Feed gone, removing");
            self.store.remove_ops(&uri, &mut cx.batch)?;
            return Ok(Step::Done(Outcome::Gone(cx.query.clone())));
        }
        if !response.is_success() {
            self.fail(cx, Method::Head, response.status);
            return Ok(Step::Done(cx.done()));
        }
        Ok(Step::Next(Phase::Get))
    }

    async fn get(&self, cx: &mut FetchContext) -> Result<Step> {
        let uri = cx.query.uri().to_string();
        if self.caches.failures.has(&failure_key(Method::Get.as_str(), &uri)) {
            debug!(url = %uri, "GET failure cached, skipping");
            return Ok(Step::Done(cx.done()));
        }

        let response = match self.request(Method::Get, cx).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %uri, error = %e, "GET failed");
                self.caches
                    .failures
                    .set(&failure_key(Method::Get.as_str(), &uri), e.to_string());
                cx.errors.push(e);
                return Ok(Step::Done(cx.done()));
            }
        };

        if cx.unchanged(&response) {
            debug!(url = %uri, "Not modified");
            return Ok(Step::Done(Outcome::Cached(cx.query.clone())));
        }
        if is_redirect(response.status) {
            return self.redirect(cx, response.status, response.location.as_deref(), Method::Get);
        }
        if !response.is_success() {
            self.fail(cx, Method::Get, response.status);
            return Ok(Step::Done(cx.done()));
        }

        cx.response = Some(response);
        Ok(Step::Next(Phase::Persist))
    }

    fn persist(&self, cx: &mut FetchContext) -> Result<Step> {
        let response = cx.response.take().unwrap_or_default();
        let parsed = self.parser.parse(&response.body);
        let (persisted, error) =
            persist_ops(parsed, response.etag.as_deref(), &cx.query, &mut cx.batch)?;

        if let Some(e) = error {
            warn!(url = cx.query.url(), error = %e, "Parse failed, keeping partial results");
            cx.errors.push(e);
        }
        info!(
            url = cx.query.url(),
            entries = persisted.entries.len(),
            "Feed fetched"
        );

        Ok(Step::Done(Outcome::Stored {
            query: cx.query.clone(),
            feed: persisted.feed,
            entries: persisted.entries,
        }))
    }

    async fn request(&self, method: Method, cx: &FetchContext) -> Result<HttpResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let request = HttpRequest {
            method,
            url: cx.query.url().to_string(),
            etag: cx.validator().map(String::from),
        };
        let response = self.http.send(&request).await?;
        debug!(%method, url = %request.url, status = response.status, "Response");
        Ok(response)
    }

    fn redirect(
        &self,
        cx: &mut FetchContext,
        code: u16,
        location: Option<&str>,
        method: Method,
    ) -> Result<Step> {
        let Some(location) = location else {
            self.fail(cx, method, code);
            return Ok(Step::Done(cx.done()));
        };

        let next = match cx.query.redirect(code, location) {
            Ok(next) => next,
            Err(e) => {
                warn!(url = cx.query.url(), error = %e, "Redirect not followed");
                cx.errors.push(e);
                return Ok(Step::Done(cx.done()));
            }
        };

        let old_uri = cx.query.uri().to_string();
        info!(from = %cx.query.url(), to = next.url(), code, "Redirected");

        if method == Method::Get {
            self.caches.redirects.set(
                cx.query.url(),
                Redirect {
                    code,
                    url: next.url().to_string(),
                },
            );
        }
        if is_permanent_redirect(code) && next.uri() != old_uri {
            self.store.remove_ops(&old_uri, &mut cx.batch)?;
        }

        cx.query = next;
        cx.etag = None;
        Ok(Step::Next(Phase::Start))
    }

    /// Record an unexpected status: cache it and report it once.
    fn fail(&self, cx: &mut FetchContext, method: Method, status: u16) {
        let error = RunnelError::Status {
            method: method.to_string(),
            url: cx.query.url().to_string(),
            status,
        };
        warn!(%method, url = cx.query.url(), status, "Request failed");
        self.caches
            .failures
            .set(&failure_key(method.as_str(), cx.query.uri()), error.to_string());
        cx.errors.push(error);
    }
}
