//! Backpressured query pipeline.
//!
//! One worker task per pipeline pulls raw inputs off a bounded channel and
//! resolves them one at a time, so a pipeline never has more than one query
//! in flight. Output and errors leave through their own bounded channels.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::app::{Result, RunnelError};
use crate::domain::{Entry, Feed, Query, QueryInput, Record};
use crate::engine::fetch::{Fetcher, Outcome};
use crate::engine::ranking::Ranking;
use crate::engine::{EntryPredicate, FeedPredicate, Options};
use crate::store::StoreAccess;

/// What a pipeline flavor emits and how it serves stored data.
pub trait Mode: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Records for a query whose stored data is current.
    fn cached(&self, store: &StoreAccess, query: &Query) -> Result<Vec<Record>>;

    /// Records for a query that was just fetched and persisted.
    fn fresh(&self, feed: Option<Feed>, entries: Vec<Entry>) -> Vec<Record>;

    /// Whether `record` may be emitted for `query`.
    fn admit(&self, query: &Query, record: &Record) -> bool;

    /// Whether resolved queries count towards feed popularity.
    fn counts_hits(&self) -> bool {
        false
    }
}

/// Emits feed documents.
pub struct FeedsMode {
    is_feed: FeedPredicate,
}

impl FeedsMode {
    pub fn new(is_feed: FeedPredicate) -> Self {
        Self { is_feed }
    }
}

impl Mode for FeedsMode {
    fn name(&self) -> &'static str {
        "feeds"
    }

    fn cached(&self, store: &StoreAccess, query: &Query) -> Result<Vec<Record>> {
        Ok(store.feed(query.uri())?.map(Record::Feed).into_iter().collect())
    }

    fn fresh(&self, feed: Option<Feed>, _entries: Vec<Entry>) -> Vec<Record> {
        feed.map(Record::Feed).into_iter().collect()
    }

    fn admit(&self, _query: &Query, record: &Record) -> bool {
        match record {
            Record::Feed(feed) => (self.is_feed)(feed),
            Record::Entry(_) => false,
        }
    }
}

/// Emits entries newer than the query's `since` and not dated in the
/// future, oldest first.
pub struct EntriesMode {
    is_entry: EntryPredicate,
}

impl EntriesMode {
    pub fn new(is_entry: EntryPredicate) -> Self {
        Self { is_entry }
    }
}

impl Mode for EntriesMode {
    fn name(&self) -> &'static str {
        "entries"
    }

    fn cached(&self, store: &StoreAccess, query: &Query) -> Result<Vec<Record>> {
        let now = Utc::now().timestamp_millis();
        let entries = store.entries(query.uri(), query.since(), now)?;
        Ok(entries.into_iter().map(Record::Entry).collect())
    }

    fn fresh(&self, _feed: Option<Feed>, mut entries: Vec<Entry>) -> Vec<Record> {
        entries.sort_by(|a, b| a.updated.cmp(&b.updated).then_with(|| a.id.cmp(&b.id)));
        entries.into_iter().map(Record::Entry).collect()
    }

    fn admit(&self, query: &Query, record: &Record) -> bool {
        match record {
            Record::Entry(entry) => {
                // stored reads stop at now, so future-dated entries wait for their time
                entry.updated > query.since()
                    && entry.updated <= Utc::now().timestamp_millis()
                    && (self.is_entry)(entry)
            }
            Record::Feed(_) => false,
        }
    }

    fn counts_hits(&self) -> bool {
        true
    }
}

/// One emitted record, as an object or as its JSON text.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Record(Record),
    Json(String),
}

impl Output {
    fn encode(record: Record, object_mode: bool) -> Result<Self> {
        if object_mode {
            Ok(Output::Record(record))
        } else {
            Ok(Output::Json(serde_json::to_string(&record)?))
        }
    }

    pub fn to_json(&self) -> Result<String> {
        match self {
            Output::Record(record) => Ok(serde_json::to_string(record)?),
            Output::Json(json) => Ok(json.clone()),
        }
    }
}

/// Cloneable input side of a [`Pipeline`].
#[derive(Clone)]
pub struct PipelineSender {
    tx: mpsc::Sender<QueryInput>,
}

impl PipelineSender {
    /// Queue one input, waiting while the pipeline is saturated.
    pub async fn send(&self, input: impl Into<QueryInput>) -> Result<()> {
        self.tx
            .send(input.into())
            .await
            .map_err(|_| RunnelError::Other("pipeline closed".into()))
    }
}

/// A running pipeline.
///
/// Dropping every sender (see [`Pipeline::close`]) ends the input; the worker
/// finishes the query it holds, then the output channel closes.
pub struct Pipeline {
    input: Option<PipelineSender>,
    output: mpsc::Receiver<Output>,
    errors: mpsc::Receiver<RunnelError>,
    worker: JoinHandle<()>,
}

impl Pipeline {
    pub(crate) fn spawn<M: Mode>(
        mode: M,
        fetcher: Fetcher,
        store: StoreAccess,
        ranking: Arc<Ranking>,
        options: &Options,
    ) -> Self {
        let capacity = options.high_water_mark.max(1);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);

        let worker = Worker {
            mode,
            fetcher,
            store,
            ranking,
            force: options.force,
            object_mode: options.object_mode,
            output: output_tx,
            errors: error_tx,
        };
        let handle = tokio::spawn(worker.run(input_rx));

        Self {
            input: Some(PipelineSender { tx: input_tx }),
            output: output_rx,
            errors: error_rx,
            worker: handle,
        }
    }

    /// Another handle for feeding input, if the pipeline is still open.
    pub fn sender(&self) -> Option<PipelineSender> {
        self.input.clone()
    }

    pub async fn send(&self, input: impl Into<QueryInput>) -> Result<()> {
        match &self.input {
            Some(sender) => sender.send(input).await,
            None => Err(RunnelError::Other("pipeline closed".into())),
        }
    }

    /// Stop accepting input. Other [`PipelineSender`]s keep it open.
    pub fn close(&mut self) {
        self.input = None;
    }

    pub async fn recv(&mut self) -> Option<Output> {
        self.output.recv().await
    }

    pub async fn recv_error(&mut self) -> Option<RunnelError> {
        self.errors.recv().await
    }

    pub fn try_recv_error(&mut self) -> Option<RunnelError> {
        self.errors.try_recv().ok()
    }

    /// Next output or error, whichever comes first. `None` once the
    /// pipeline has finished and both channels are drained.
    pub async fn next_result(&mut self) -> Option<Result<Output>> {
        tokio::select! {
            biased;
            Some(e) = self.errors.recv() => Some(Err(e)),
            output = self.output.recv() => match output {
                Some(output) => Some(Ok(output)),
                None => self.errors.try_recv().ok().map(Err),
            },
        }
    }

    /// Close the input and stream the remaining output.
    pub fn into_stream(mut self) -> impl Stream<Item = Output> {
        self.close();
        stream::unfold(self.output, |mut output| async move {
            output.recv().await.map(|item| (item, output))
        })
    }

    /// Feed `inputs`, close, and gather everything the pipeline produces.
    pub async fn collect<I>(self, inputs: I) -> (Vec<Output>, Vec<RunnelError>)
    where
        I: IntoIterator,
        I::Item: Into<QueryInput>,
    {
        let Pipeline {
            input: sender,
            mut output,
            mut errors,
            worker,
        } = self;
        let inputs: Vec<QueryInput> = inputs.into_iter().map(Into::into).collect();

        let feed = async move {
            if let Some(sender) = sender {
                for input in inputs {
                    if sender.send(input).await.is_err() {
                        break;
                    }
                }
            }
        };
        let drain = async move {
            let mut outputs = Vec::new();
            while let Some(item) = output.recv().await {
                outputs.push(item);
            }
            outputs
        };
        let drain_errors = async move {
            let mut reported = Vec::new();
            while let Some(e) = errors.recv().await {
                reported.push(e);
            }
            reported
        };

        let ((), outputs, errors) = tokio::join!(feed, drain, drain_errors);
        if let Err(e) = worker.await {
            error!(error = %e, "Pipeline worker panicked");
        }
        (outputs, errors)
    }
}

struct Worker<M> {
    mode: M,
    fetcher: Fetcher,
    store: StoreAccess,
    ranking: Arc<Ranking>,
    force: bool,
    object_mode: bool,
    output: mpsc::Sender<Output>,
    errors: mpsc::Sender<RunnelError>,
}

enum Flow {
    Continue,
    Stop,
}

impl<M: Mode> Worker<M> {
    async fn run(self, mut input: mpsc::Receiver<QueryInput>) {
        debug!(mode = self.mode.name(), "Pipeline started");
        while let Some(raw) = input.recv().await {
            if let Flow::Stop = self.process(raw).await {
                break;
            }
        }
        debug!(mode = self.mode.name(), "Pipeline finished");
    }

    async fn process(&self, raw: QueryInput) -> Flow {
        let query = match raw.decode(self.force) {
            Ok(query) => query,
            Err(e) => {
                self.report(e);
                return Flow::Continue;
            }
        };
        let query = self.fetcher.follow_cached_redirect(query);

        let resolution = self.fetcher.resolve(query).await;
        for e in resolution.errors {
            self.report(e);
        }
        if resolution.fatal {
            error!(mode = self.mode.name(), "Store failed, stopping pipeline");
            return Flow::Stop;
        }

        let query = resolution.outcome.query().clone();
        let flush_due = self.mode.counts_hits() && self.ranking.hit(query.uri());

        let records = match resolution.outcome {
            Outcome::Cached(_) => match self.mode.cached(&self.store, &query) {
                Ok(records) => records,
                Err(e) => {
                    let fatal = e.is_store();
                    self.report(e);
                    if fatal {
                        return Flow::Stop;
                    }
                    Vec::new()
                }
            },
            Outcome::Stored { feed, entries, .. } => self.mode.fresh(feed, entries),
            Outcome::Gone(_) | Outcome::Failed(_) => Vec::new(),
        };

        for record in records {
            if !self.mode.admit(&query, &record) {
                continue;
            }
            let output = match Output::encode(record, self.object_mode) {
                Ok(output) => output,
                Err(e) => {
                    self.report(e);
                    continue;
                }
            };
            if self.output.send(output).await.is_err() {
                debug!(mode = self.mode.name(), "Output dropped, stopping pipeline");
                return Flow::Stop;
            }
        }

        if flush_due {
            if let Err(e) = self.ranking.flush() {
                self.report(e);
            }
        }
        Flow::Continue
    }

    fn report(&self, e: RunnelError) {
        if let Err(mpsc::error::TrySendError::Full(e)) = self.errors.try_send(e) {
            warn!(error = %e, "Error channel full, dropping error");
        }
    }
}
