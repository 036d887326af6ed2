//! Two-stage download pipeline.
//!
//! The [`Coordinator`] pulls chunks from the [`QueryResolver`], skips items
//! the progress store already holds, and feeds the rest into a bounded parser
//! queue whose capacity equals the chunk size. Parser workers turn items into
//! [`DownloadDescriptor`](crate::catalog::DownloadDescriptor)s and hand them
//! to download workers over a second bounded queue. Both pools share one
//! [`Fetcher`] and therefore one proxy pool.
//!
//! # Shutdown
//!
//! Cancelling the token stops chunk dispatch and makes every worker stop
//! pulling new work. Requests already on the wire finish normally; no new
//! retry starts. Items that never reached a terminal status stay unrecorded
//! and are picked up by the next run.

mod chunk;
mod downloader;
mod parser;
mod stats;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{CatalogUrls, ExtractorSet, Item, QueryResolver, ResolveError};
use crate::config::{ConfigError, PipelineConfig};
use crate::download::{FailureType, FetchError, Fetcher, RequestPacer, classify_error};
use crate::progress::{ProgressError, ProgressStore};
use crate::proxy::{NoProxyPolicy, ProxyListError, ProxyPool, ProxyPoolError, load_proxy_file};

use chunk::issue_tickets;
use downloader::{DownloaderContext, spawn_downloaders};
use parser::{DownloadJob, ParseJob, ParserContext, spawn_parsers};

pub use stats::{RunOutcome, RunReport, RunStats};

/// Setup errors. Once a run starts, failures are reported in the
/// [`RunReport`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("proxy list: {0}")]
    ProxyList(#[from] ProxyListError),

    #[error(transparent)]
    ProxyPool(#[from] ProxyPoolError),

    #[error("progress store: {0}")]
    Progress(#[from] ProgressError),

    /// Results directory or run summary could not be written.
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Handles every worker needs.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub fetcher: Arc<Fetcher>,
    pub progress: Arc<ProgressStore>,
    pub stats: Arc<RunStats>,
    pub cancel: CancellationToken,
}

/// Next job from a shared queue; `None` once the queue is closed and empty or
/// shutdown was requested.
pub(crate) async fn next_job<T>(
    input: &SharedReceiver<T>,
    cancel: &CancellationToken,
) -> Option<T> {
    if cancel.is_cancelled() {
        return None;
    }
    let mut input = input.lock().await;
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        job = input.recv() => job,
    }
}

/// Turns a worker's final error into a recorded failure, or leaves the item
/// unrecorded when the failure is local or the run is shutting down.
pub(crate) async fn record_failure(
    ctx: &WorkerContext,
    item_id: &str,
    stage: &'static str,
    error: &FetchError,
) {
    let failure_type = classify_error(error);

    if matches!(error, FetchError::Cancelled) {
        ctx.stats.increment_unrecorded();
        debug!(item_id, stage, "interrupted, left for next run");
        return;
    }
    if failure_type == FailureType::Persistence {
        ctx.stats.increment_unrecorded();
        error!(item_id, stage, error = %error, "local failure, left for next run");
        return;
    }
    if let FetchError::ProxyExhausted { retry_in } = error {
        ctx.stats.increment_unrecorded();
        match retry_in {
            None => warn!(item_id, stage, "no live proxy left, left for next run"),
            Some(wait) => warn!(
                item_id,
                stage,
                next_proxy_in_secs = wait.as_secs_f64(),
                "every proxy cooling down, left for next run"
            ),
        }
        return;
    }

    match ctx.progress.mark_failed(item_id, &error.to_string()).await {
        Ok(_) => {
            ctx.stats.increment_failed();
            warn!(item_id, stage, failure = ?failure_type, error = %error, "item failed");
        }
        Err(e) => {
            ctx.stats.increment_unrecorded();
            error!(item_id, stage, error = %e, "could not record failure, left for next run");
        }
    }
}

/// Wires resolver, worker pools and progress store for one query.
pub struct Coordinator {
    config: PipelineConfig,
    fetcher: Arc<Fetcher>,
    progress: Arc<ProgressStore>,
    urls: CatalogUrls,
    extractors: ExtractorSet,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("query", &self.config.query)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Validates `config`, builds the proxy pool (probing it when asked),
    /// creates the results directory and opens the progress store.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for invalid settings, an unreadable proxy
    /// list, unbuildable clients, or an unusable results directory.
    #[instrument(skip(config, cancel), fields(query = %config.query, mode = %config.mode))]
    pub async fn prepare(
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let urls = CatalogUrls::new(&config.base_url)
            .map_err(|e| ConfigError::BaseUrl(e.to_string()))?;

        let endpoints = match &config.proxy_file {
            Some(path) => load_proxy_file(path)?,
            None => Vec::new(),
        };
        let pool = ProxyPool::new(endpoints, config.proxy.clone(), &config.client_settings())?;
        if config.check_proxies && pool.proxy_count() > 0 {
            let alive = pool.probe(&config.proxy_check_url).await;
            info!(alive, total = pool.proxy_count(), "proxy check finished");
        }

        let fetcher = Fetcher::new(
            Arc::new(pool),
            Arc::new(RequestPacer::new(config.request_delay)),
            config.retry_policy(),
            cancel.clone(),
        );

        let downloads = config.downloads_dir();
        tokio::fs::create_dir_all(&downloads)
            .await
            .map_err(|source| PipelineError::Io {
                path: downloads.clone(),
                source,
            })?;
        let progress = ProgressStore::open(&config.progress_db_path()).await?;
        if progress.done_count() > 0 {
            info!(done = progress.done_count(), "resuming, recorded items will be skipped");
        }

        Ok(Self {
            config,
            fetcher: Arc::new(fetcher),
            progress: Arc::new(progress),
            urls,
            extractors: ExtractorSet::standard(),
            cancel,
        })
    }

    /// Replaces the extractor set.
    #[must_use]
    pub fn with_extractors(mut self, extractors: ExtractorSet) -> Self {
        self.extractors = extractors;
        self
    }

    /// The run's configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The proxy pool shared by every request of the run.
    #[must_use]
    pub fn pool(&self) -> &Arc<ProxyPool> {
        self.fetcher.pool()
    }

    /// The query's progress store.
    #[must_use]
    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    /// Runs the pipeline to completion, interruption, or resolution failure,
    /// then writes `summary.json`.
    ///
    /// Per-item and resolution failures are reported in the [`RunReport`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] when `summary.json` cannot be written.
    #[instrument(skip(self), fields(query = %self.config.query, mode = %self.config.mode))]
    pub async fn run(self) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let Self {
            config,
            fetcher,
            progress,
            urls,
            extractors,
            cancel,
        } = self;

        let stats = Arc::new(RunStats::new());
        let shared = WorkerContext {
            fetcher: Arc::clone(&fetcher),
            progress: Arc::clone(&progress),
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
        };

        let (parse_tx, parse_rx) = mpsc::channel::<ParseJob>(config.chunk_size);
        let (download_tx, download_rx) =
            mpsc::channel::<DownloadJob>(config.effective_download_queue_capacity());
        let parse_rx: SharedReceiver<ParseJob> = Arc::new(Mutex::new(parse_rx));
        let download_rx: SharedReceiver<DownloadJob> = Arc::new(Mutex::new(download_rx));

        let parser_ctx = Arc::new(ParserContext {
            shared: shared.clone(),
            urls: urls.clone(),
            extractors,
        });
        let downloader_ctx = Arc::new(DownloaderContext {
            shared,
            downloads_dir: config.downloads_dir(),
        });

        let parsers = spawn_parsers(config.parser_workers, &parse_rx, &download_tx, &parser_ctx);
        // Download workers see the queue close once every parser has exited.
        drop(download_tx);
        let downloaders = spawn_downloaders(config.download_workers, &download_rx, &downloader_ctx);
        info!(
            parsers = config.parser_workers,
            downloaders = config.download_workers,
            chunk_size = config.chunk_size,
            proxies = fetcher.pool().proxy_count(),
            "pipeline started"
        );

        let mut resolver = QueryResolver::new(
            Arc::clone(&fetcher),
            urls,
            config.query.clone(),
            config.mode,
            config.chunk_size,
        );
        let mut outcome = dispatch(&mut resolver, &parse_tx, &progress, &stats, &fetcher, &cancel).await;
        drop(parse_tx);

        join_workers(parsers, "parser").await;
        join_workers(downloaders, "download").await;
        drop(parser_ctx);
        drop(downloader_ctx);

        if outcome == RunOutcome::Completed && cancel.is_cancelled() {
            outcome = RunOutcome::Interrupted;
        }

        let report = RunReport::new(
            &config.query,
            config.mode,
            outcome,
            &stats,
            fetcher.retries(),
            started.elapsed(),
            fetcher.pool().snapshot(),
        );
        info!(
            downloaded = report.downloaded,
            failed = report.failed,
            skipped = report.skipped,
            unrecorded = report.unrecorded,
            retried = report.retried,
            elapsed_secs = report.elapsed_secs,
            "run finished"
        );

        match Arc::try_unwrap(progress) {
            Ok(progress) => progress.close().await,
            Err(_) => debug!("progress store still shared, leaving pool open"),
        }
        let summary = config.summary_path();
        report
            .write_json(&summary)
            .await
            .map_err(|source| PipelineError::Io {
                path: summary,
                source,
            })?;
        Ok(report)
    }
}

/// Resolves chunks and feeds pending items into the parser queue, one chunk
/// at a time, until the listing ends or the run must stop.
async fn dispatch(
    resolver: &mut QueryResolver,
    parse_tx: &mpsc::Sender<ParseJob>,
    progress: &ProgressStore,
    stats: &Arc<RunStats>,
    fetcher: &Fetcher,
    cancel: &CancellationToken,
) -> RunOutcome {
    let pool = fetcher.pool();
    loop {
        if cancel.is_cancelled() {
            info!("shutdown requested, no further chunks");
            return RunOutcome::Interrupted;
        }
        if pool.policy() == NoProxyPolicy::Wait && pool.all_dead() {
            error!("every proxy is dead, stopping dispatch");
            return RunOutcome::ProxiesExhausted;
        }

        let chunk = match resolver.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                info!(resolved = resolver.resolved_count(), "listing exhausted");
                return RunOutcome::Completed;
            }
            Err(ResolveError::Cancelled) => return RunOutcome::Interrupted,
            Err(ResolveError::Fetch {
                source: FetchError::ProxyExhausted { retry_in: None },
                ..
            }) => {
                error!("every proxy died during resolution");
                return RunOutcome::ProxiesExhausted;
            }
            Err(e) => {
                error!(error = %e, "query resolution failed");
                return RunOutcome::ResolutionFailed {
                    error: e.to_string(),
                };
            }
        };

        stats.add_resolved(chunk.len());
        stats.increment_chunks_dispatched();
        let total = chunk.len();
        let pending: Vec<Item> = chunk
            .items
            .into_iter()
            .filter(|item| {
                let done = progress.is_done(&item.id);
                if done {
                    stats.increment_skipped();
                    debug!(item_id = %item.id, "already recorded, skipping");
                }
                !done
            })
            .collect();
        info!(
            chunk = chunk.index,
            items = total,
            pending = pending.len(),
            skipped = total - pending.len(),
            "dispatching chunk"
        );

        let tickets = issue_tickets(chunk.index, pending.len(), stats);
        for (item, ticket) in pending.into_iter().zip(tickets) {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return RunOutcome::Interrupted,
                permit = parse_tx.reserve() => permit,
            };
            let Ok(permit) = permit else {
                warn!("parser queue closed, stopping dispatch");
                return RunOutcome::Interrupted;
            };
            stats.parse_enqueued();
            permit.send(ParseJob { item, ticket });
        }
    }
}

async fn join_workers(handles: Vec<JoinHandle<()>>, pool: &'static str) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(pool, error = %e, "worker task panicked");
        }
    }
    debug!(pool, "workers joined");
}
