//! Run counters and the final report.

use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::catalog::QueryMode;
use crate::proxy::ProxySnapshot;

/// Counters shared by the coordinator and both worker pools.
///
/// All counters are monotonic except the parse queue depth, which tracks
/// items sent to the parser queue and not yet picked up by a worker.
#[derive(Debug, Default)]
pub struct RunStats {
    resolved: AtomicUsize,
    skipped: AtomicUsize,
    parsed: AtomicUsize,
    downloaded: AtomicUsize,
    failed: AtomicUsize,
    unrecorded: AtomicUsize,
    chunks_dispatched: AtomicUsize,
    chunks_drained: AtomicUsize,
    parse_queue_depth: AtomicUsize,
    max_parse_queue_depth: AtomicUsize,
    parse_attempted: AtomicUsize,
    download_attempted: AtomicUsize,
}

impl RunStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_resolved(&self, count: usize) {
        self.resolved.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_parsed(&self) {
        self.parsed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_unrecorded(&self) {
        self.unrecorded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_chunks_dispatched(&self) {
        self.chunks_dispatched.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_chunks_drained(&self) {
        self.chunks_drained.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_parse_attempted(&self) {
        self.parse_attempted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_download_attempted(&self) {
        self.download_attempted.fetch_add(1, Ordering::SeqCst);
    }

    /// Called with a reserved queue slot in hand, before the send.
    pub(crate) fn parse_enqueued(&self) {
        let depth = self.parse_queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parse_queue_depth.fetch_max(depth, Ordering::SeqCst);
    }

    /// Called by a parser worker right after receiving an item.
    pub(crate) fn parse_dequeued(&self) {
        self.parse_queue_depth.fetch_sub(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn parsed(&self) -> usize {
        self.parsed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Items whose outcome could not be recorded; retried next run.
    #[must_use]
    pub fn unrecorded(&self) -> usize {
        self.unrecorded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chunks_dispatched(&self) -> usize {
        self.chunks_dispatched.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chunks_drained(&self) -> usize {
        self.chunks_drained.load(Ordering::SeqCst)
    }

    /// Highest number of items ever waiting in the parser queue at once.
    #[must_use]
    pub fn max_parse_queue_depth(&self) -> usize {
        self.max_parse_queue_depth.load(Ordering::SeqCst)
    }

    /// Items a parser worker started on.
    #[must_use]
    pub fn parse_attempted(&self) -> usize {
        self.parse_attempted.load(Ordering::SeqCst)
    }

    /// Descriptors a download worker started on.
    #[must_use]
    pub fn download_attempted(&self) -> usize {
        self.download_attempted.load(Ordering::SeqCst)
    }
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The listing was fully enumerated and every item dispatched.
    Completed,
    /// Shutdown was requested before the listing was exhausted.
    Interrupted,
    /// The listing could not be resolved; in-flight work was drained.
    ResolutionFailed { error: String },
    /// Every proxy was retired and no direct fallback is allowed.
    ProxiesExhausted,
}

/// Final summary of a run, printed and written as `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub query: String,
    pub mode: QueryMode,
    pub outcome: RunOutcome,
    pub resolved: usize,
    pub skipped: usize,
    pub parsed: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub unrecorded: usize,
    pub retried: usize,
    pub chunks: usize,
    pub max_parse_queue_depth: usize,
    pub elapsed_secs: f64,
    pub proxies: Vec<ProxySnapshot>,
}

impl RunReport {
    pub(crate) fn new(
        query: &str,
        mode: QueryMode,
        outcome: RunOutcome,
        stats: &Arc<RunStats>,
        retried: usize,
        elapsed: Duration,
        proxies: Vec<ProxySnapshot>,
    ) -> Self {
        Self {
            query: query.to_string(),
            mode,
            outcome,
            resolved: stats.resolved(),
            skipped: stats.skipped(),
            parsed: stats.parsed(),
            downloaded: stats.downloaded(),
            failed: stats.failed(),
            unrecorded: stats.unrecorded(),
            retried,
            chunks: stats.chunks_dispatched(),
            max_parse_queue_depth: stats.max_parse_queue_depth(),
            elapsed_secs: elapsed.as_secs_f64(),
            proxies,
        }
    }

    /// Whether resolution succeeded (item failures do not count).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Human-readable summary lines.
    #[must_use]
    pub fn render(&self) -> String {
        let status = match &self.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Interrupted => "interrupted".to_string(),
            RunOutcome::ResolutionFailed { error } => format!("resolution failed: {error}"),
            RunOutcome::ProxiesExhausted => "stopped: all proxies dead".to_string(),
        };
        let mut out = format!(
            "Query '{}' ({}): {status}\n  \
             downloaded {}, failed {}, skipped {} (resolved {}, parsed {}, retried {}, unrecorded {})\n",
            self.query,
            self.mode,
            self.downloaded,
            self.failed,
            self.skipped,
            self.resolved,
            self.parsed,
            self.retried,
            self.unrecorded,
        );
        for proxy in &self.proxies {
            let _ = writeln!(
                out,
                "  proxy {}: {:?}, {} ok / {} failed",
                proxy.endpoint, proxy.health, proxy.total_successes, proxy.total_failures
            );
        }
        out
    }

    /// Writes the report as pretty JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the file cannot be written.
    pub async fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "summary written");
        Ok(())
    }
}
