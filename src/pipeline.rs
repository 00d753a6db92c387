//! Article pipeline orchestrator.
//!
//! Owns the per-article state machine
//!
//! ```text
//! New ─► Fetching ─► Extracting ─► Summarizing ─► Done
//!  └──────────┴───────────┴─────────────┴──────► Failed { step, kind }
//! ```
//!
//! and the simpler search cycle `Idle ─► Searching ─► ResultsReady | SearchFailed`.
//!
//! # Concurrency
//!
//! Every request runs on its own tokio task. Stages of one article run
//! strictly one after another; different articles run concurrently, bounded
//! by a semaphore, and may finish in any order.
//!
//! # Observers
//!
//! Progress is published on a broadcast channel ([`ArticlePipeline::subscribe`]).
//! Sending never waits for a receiver; a slow observer loses the oldest
//! notifications. The orchestrator never touches presentation state; a
//! presenter drains its receiver on its own task or thread.
//!
//! # In-flight runs
//!
//! Runs are keyed by article link. Requesting an article that is already
//! running attaches to the existing run instead of starting a second one.
//! Each run has its own cancellation token; [`ArticlePipeline::abandon`]
//! cancels it and the run ends as `Failed { kind: Cancelled }`.

use crate::config::{Config, ConfigError};
use crate::error::{Error, ErrorKind, StageError};
use crate::extract::{PdfExtractor, TextExtract};
use crate::fetch::{DocumentFetch, HttpFetcher};
use crate::models::{ArticleRecord, SearchResult};
use crate::search::{CatalogClient, CatalogSearch};
use crate::summarize::{GeminiSummarizer, Summarize};
use crate::utils::http_client;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// The processing step a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Waiting for a concurrency permit, before any stage started.
    Queued,
    Fetch,
    Extract,
    Summarize,
}

/// Lifecycle stage of one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    New,
    Fetching,
    Extracting,
    Summarizing,
    Done,
    Failed { step: Step, kind: ErrorKind },
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed { .. })
    }

    /// True while a stage call is running.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Stage::Fetching | Stage::Extracting | Stage::Summarizing
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Summarizing => "summarizing",
            Stage::Done => "done",
            Stage::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Failed { step, kind } => write!(f, "failed during {step:?} ({kind})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Workflow record for one article.
///
/// Owned by the orchestrator; observers only ever see clones.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleState {
    pub record: Arc<ArticleRecord>,
    pub stage: Stage,
    pub document_path: Option<PathBuf>,
    /// Extracted text. Shared so snapshots stay cheap.
    pub text: Option<Arc<str>>,
    pub summary: Option<String>,
    /// Last failure; cleared whenever a stage is entered.
    pub error: Option<StageError>,
    pub updated_at: DateTime<Utc>,
}

impl ArticleState {
    pub fn new(record: Arc<ArticleRecord>) -> Self {
        Self {
            record,
            stage: Stage::New,
            document_path: None,
            text: None,
            summary: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn link(&self) -> &str {
        &self.record.link
    }
}

/// Where the search cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Idle,
    Searching,
    ResultsReady,
    SearchFailed,
}

/// Why a search produced nothing to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFailure {
    Error(StageError),
    NoResults,
}

impl SearchFailure {
    /// The single diagnostic row shown in place of an empty result list.
    pub fn placeholder(&self, query: &str) -> String {
        match self {
            SearchFailure::NoResults => format!("No articles found for \"{query}\""),
            SearchFailure::Error(err) => format!("Search for \"{query}\" failed: {err}"),
        }
    }
}

/// A message to observers.
#[derive(Debug, Clone)]
pub enum Notification {
    SearchStarted {
        generation: u64,
        query: String,
    },
    SearchSucceeded {
        generation: u64,
        query: String,
        result: Arc<SearchResult>,
    },
    SearchFailed {
        generation: u64,
        query: String,
        failure: SearchFailure,
    },
    /// An article entered `New`, `Fetching`, `Extracting` or `Summarizing`.
    StageChanged(ArticleState),
    ArticleDone(ArticleState),
    ArticleFailed {
        state: ArticleState,
        error: StageError,
    },
}

impl Notification {
    /// The article link this notification concerns, if any.
    pub fn link(&self) -> Option<&str> {
        match self {
            Notification::StageChanged(state) | Notification::ArticleDone(state) => {
                Some(state.link())
            }
            Notification::ArticleFailed { state, .. } => Some(state.link()),
            _ => None,
        }
    }
}

/// The stage implementations a pipeline drives.
#[derive(Clone)]
pub struct Stages {
    pub search: Arc<dyn CatalogSearch>,
    pub fetch: Arc<dyn DocumentFetch>,
    pub extract: Arc<dyn TextExtract>,
    pub summarize: Arc<dyn Summarize>,
}

impl Stages {
    /// The HTTP/PDF/Gemini implementations, sharing one HTTP client.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingApiKey`] if no usable credential is configured
    /// - [`ConfigError::HttpClient`] if the HTTP client cannot be built
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config
            .summarizer
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let client = http_client()?;

        Ok(Self {
            search: Arc::new(CatalogClient::new(client.clone(), config)),
            fetch: Arc::new(HttpFetcher::new(client.clone(), config)),
            extract: Arc::new(PdfExtractor::new()),
            summarize: Arc::new(GeminiSummarizer::new(client, &config.summarizer, api_key)),
        })
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub stage_timeout: Option<Duration>,
    pub max_concurrent_articles: usize,
    pub notification_buffer: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions::from(&Config::default())
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            stage_timeout: config.stage_timeout(),
            max_concurrent_articles: config.max_concurrent_articles.max(1),
            notification_buffer: config.notification_buffer.max(1),
        }
    }
}

struct InFlight {
    run_id: u64,
    state: watch::Receiver<ArticleState>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SearchSlot {
    phase: Option<SearchPhase>,
    generation: u64,
    current: Option<Arc<SearchResult>>,
}

struct Inner {
    stages: Stages,
    options: PipelineOptions,
    events: broadcast::Sender<Notification>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    search: Mutex<SearchSlot>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    next_run: AtomicU64,
}

/// Handle to one article run.
#[derive(Debug, Clone)]
pub struct ArticleHandle {
    link: String,
    attached: bool,
    state: watch::Receiver<ArticleState>,
}

impl ArticleHandle {
    pub fn link(&self) -> &str {
        &self.link
    }

    /// True when this request joined a run that was already in flight.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn snapshot(&self) -> ArticleState {
        self.state.borrow().clone()
    }

    /// Wait until the run reaches `Done` or `Failed`.
    ///
    /// # Returns
    ///
    /// The terminal state. The matching `ArticleDone`/`ArticleFailed`
    /// notification has already been sent when this returns.
    pub async fn wait(mut self) -> ArticleState {
        let terminal = self
            .state
            .wait_for(|s| s.stage.is_terminal())
            .await
            .map(|s| s.clone());
        terminal.unwrap_or_else(|_| self.state.borrow().clone())
    }
}

/// The article-processing orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct ArticlePipeline {
    inner: Arc<Inner>,
}

impl fmt::Debug for ArticlePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArticlePipeline")
            .field("options", &self.inner.options)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ArticlePipeline {
    pub fn new(stages: Stages, options: PipelineOptions) -> Self {
        let (events, _rx) = broadcast::channel(options.notification_buffer.max(1));
        let permits = Arc::new(Semaphore::new(options.max_concurrent_articles.max(1)));
        Self {
            inner: Arc::new(Inner {
                stages,
                options,
                events,
                in_flight: Mutex::new(HashMap::new()),
                search: Mutex::new(SearchSlot::default()),
                permits,
                shutdown: CancellationToken::new(),
                next_run: AtomicU64::new(1),
            }),
        }
    }

    /// Build the production pipeline from configuration.
    ///
    /// # Errors
    ///
    /// See [`Stages::from_config`].
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Stages::from_config(config)?,
            PipelineOptions::from(config),
        ))
    }

    /// Register an observer.
    ///
    /// Only notifications sent after this call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.events.subscribe()
    }

    pub fn search_phase(&self) -> SearchPhase {
        lock(&self.inner.search).phase.unwrap_or(SearchPhase::Idle)
    }

    /// The last successful result set of the latest search generation.
    pub fn current_results(&self) -> Option<Arc<SearchResult>> {
        lock(&self.inner.search).current.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Start a search. Returns immediately; the outcome is both notified
    /// and available from the returned task.
    ///
    /// The visible result set is replaced only when this is still the most
    /// recent search and it found something.
    ///
    /// # Arguments
    ///
    /// * `query` - Query text; empty asks for the catalog's default set
    ///
    /// # Returns
    ///
    /// A task resolving to the result set, or to the [`SearchFailure`] whose
    /// [`SearchFailure::placeholder`] should be shown instead.
    pub fn submit_search(
        &self,
        query: impl Into<String>,
    ) -> JoinHandle<Result<Arc<SearchResult>, SearchFailure>> {
        let query = query.into();
        let generation = {
            let mut slot = lock(&self.inner.search);
            slot.generation += 1;
            slot.phase = Some(SearchPhase::Searching);
            slot.generation
        };
        info!(%query, generation, "Search submitted");
        self.inner.emit(Notification::SearchStarted {
            generation,
            query: query.clone(),
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_search(generation, query).await })
    }

    /// Start (or join) processing of one article.
    ///
    /// Emits `StageChanged(New)` for a fresh run. A record whose link is
    /// already running gets a handle on that run instead.
    ///
    /// # Arguments
    ///
    /// * `record` - The search row to process; its `link` is the run key
    ///
    /// # Returns
    ///
    /// An [`ArticleHandle`] for snapshots and for awaiting the terminal state.
    pub fn request_article(&self, record: ArticleRecord) -> ArticleHandle {
        let link = record.link.clone();
        let mut in_flight = lock(&self.inner.in_flight);

        if let Some(existing) = in_flight.get(&link) {
            if !existing.state.borrow().stage.is_terminal() {
                debug!(%link, run_id = existing.run_id, "Attaching to in-flight run");
                return ArticleHandle {
                    link,
                    attached: true,
                    state: existing.state.clone(),
                };
            }
        }

        let run_id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        let initial = ArticleState::new(Arc::new(record));
        let (tx, rx) = watch::channel(initial.clone());
        let cancel = self.inner.shutdown.child_token();

        in_flight.insert(
            link.clone(),
            InFlight {
                run_id,
                state: rx.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(in_flight);

        info!(%link, run_id, "Article requested");
        self.inner.emit(Notification::StageChanged(initial));

        let inner = Arc::clone(&self.inner);
        let run_link = link.clone();
        tokio::spawn(async move { inner.run_article(run_link, run_id, tx, cancel).await });

        ArticleHandle {
            link,
            attached: false,
            state: rx,
        }
    }

    /// Stop caring about an article. Its run ends as cancelled; a stage call
    /// already running on the blocking pool still completes but is ignored.
    ///
    /// # Returns
    ///
    /// `false` if no run for `link` was registered.
    pub fn abandon(&self, link: &str) -> bool {
        match lock(&self.inner.in_flight).remove(link) {
            Some(run) => {
                info!(%link, run_id = run.run_id, "Abandoning article");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight run and any running search.
    pub fn shutdown(&self) {
        info!(in_flight = self.in_flight_count(), "Pipeline shutting down");
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn emit(&self, notification: Notification) {
        // No receivers is fine: notifications are best effort.
        let _ = self.events.send(notification);
    }

    /// Run a stage call under the stage deadline and the run's cancel token.
    async fn guarded<T, F>(
        &self,
        stage: &'static str,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let timed = async {
            match self.options.stage_timeout {
                Some(after) => match tokio::time::timeout(after, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout { stage, after }),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = timed => result,
        }
    }

    #[instrument(level = "info", skip(self))]
    async fn run_search(
        &self,
        generation: u64,
        query: String,
    ) -> Result<Arc<SearchResult>, SearchFailure> {
        let t0 = Instant::now();
        let outcome = match self
            .guarded("search", &self.shutdown, self.stages.search.search(&query))
            .await
        {
            Ok(result) if !result.is_empty() => Ok(Arc::new(result)),
            Ok(_) => Err(SearchFailure::NoResults),
            Err(e) => {
                warn!(error = %e, "Search failed");
                Err(SearchFailure::Error(StageError::from(&e)))
            }
        };

        {
            let mut slot = lock(&self.search);
            if slot.generation == generation {
                match &outcome {
                    Ok(result) => {
                        slot.phase = Some(SearchPhase::ResultsReady);
                        slot.current = Some(Arc::clone(result));
                    }
                    Err(_) => slot.phase = Some(SearchPhase::SearchFailed),
                }
            } else {
                debug!(latest = slot.generation, "Superseded search finished");
            }
        }

        let elapsed_ms = t0.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => {
                info!(found = result.found, elapsed_ms, "Search results ready");
                self.emit(Notification::SearchSucceeded {
                    generation,
                    query,
                    result: Arc::clone(result),
                });
            }
            Err(failure) => {
                info!(?failure, elapsed_ms, "Search produced no results");
                self.emit(Notification::SearchFailed {
                    generation,
                    query,
                    failure: failure.clone(),
                });
            }
        }
        outcome
    }

    #[instrument(level = "info", skip(self, tx, cancel))]
    async fn run_article(
        &self,
        link: String,
        run_id: u64,
        tx: watch::Sender<ArticleState>,
        cancel: CancellationToken,
    ) {
        let t0 = Instant::now();
        let outcome = self.drive(&tx, &cancel).await;
        let mut terminal = tx.borrow().clone();
        terminal.updated_at = Utc::now();

        // Observers are notified before the watch channel releases waiters,
        // so the terminal notification is queued by the time `wait` returns.
        match outcome {
            Ok(()) => {
                terminal.stage = Stage::Done;
                info!(elapsed_ms = t0.elapsed().as_millis() as u64, "Article done");
                self.emit(Notification::ArticleDone(terminal.clone()));
            }
            Err((step, err)) => {
                let stage_error = StageError::from(&err);
                terminal.stage = Stage::Failed {
                    step,
                    kind: stage_error.kind,
                };
                terminal.error = Some(stage_error.clone());
                if stage_error.kind == ErrorKind::Cancelled {
                    info!(?step, "Article run cancelled");
                } else {
                    error!(?step, kind = %stage_error.kind, error = %err, "Article failed");
                }
                self.emit(Notification::ArticleFailed {
                    state: terminal.clone(),
                    error: stage_error,
                });
            }
        }
        tx.send_replace(terminal);

        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(&link).is_some_and(|r| r.run_id == run_id) {
            in_flight.remove(&link);
        }
    }

    /// Move one article through fetch, extract and summarize.
    async fn drive(
        &self,
        tx: &watch::Sender<ArticleState>,
        cancel: &CancellationToken,
    ) -> Result<(), (Step, Error)> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err((Step::Queued, Error::Cancelled)),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| (Step::Queued, Error::Cancelled))?
            }
        };
        let link = tx.borrow().record.link.clone();

        self.enter(tx, Stage::Fetching);
        let path = self
            .guarded("fetch", cancel, self.stages.fetch.fetch(&link))
            .await
            .map_err(|e| (Step::Fetch, e))?;
        tx.send_modify(|s| s.document_path = Some(path.clone()));

        self.enter(tx, Stage::Extracting);
        let text: Arc<str> = self
            .guarded("extract", cancel, self.stages.extract.extract(&path))
            .await
            .map_err(|e| (Step::Extract, e))?
            .into();
        tx.send_modify(|s| s.text = Some(Arc::clone(&text)));

        self.enter(tx, Stage::Summarizing);
        let summary = self
            .guarded("summarize", cancel, self.stages.summarize.summarize(&text))
            .await
            .map_err(|e| (Step::Summarize, e))?;
        tx.send_modify(|s| s.summary = Some(summary));

        Ok(())
    }

    fn enter(&self, tx: &watch::Sender<ArticleState>, stage: Stage) {
        tx.send_modify(|s| {
            s.stage = stage;
            s.error = None;
            s.updated_at = Utc::now();
        });
        let snapshot = tx.borrow().clone();
        debug!(stage = stage.name(), "Stage entered");
        self.emit(Notification::StageChanged(snapshot));
    }
}
