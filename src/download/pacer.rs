//! Per-endpoint request pacing.
//!
//! Consecutive requests through the same egress endpoint (a proxy, or the
//! direct connection) are spaced by at least the configured delay plus random
//! jitter, so the catalog sees a slow trickle from each address rather than a
//! burst. Requests through different endpoints proceed independently.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use catalog_core::download::RequestPacer;
//!
//! # async fn example() {
//! let pacer = RequestPacer::new(Duration::from_secs(1));
//! pacer.acquire("10.0.0.1:8080").await; // first request: immediate
//! pacer.acquire("10.0.0.1:8080").await; // waits ~1s plus jitter
//! pacer.acquire("direct").await;        // other endpoint: immediate
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per endpoint.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(120);

/// Maximum Retry-After value honoured (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default spacing between requests through one endpoint.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(1000);

/// Shared pacer; wrap in `Arc` and hand to every worker.
#[derive(Debug)]
pub struct RequestPacer {
    delay: Duration,
    max_jitter: Duration,
    disabled: bool,
    // Arc so the DashMap shard lock is released before awaiting the inner Mutex.
    endpoints: DashMap<String, Arc<EndpointState>>,
}

#[derive(Debug)]
struct EndpointState {
    /// Earliest instant the next request may start; `None` before the first request.
    next_allowed: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl EndpointState {
    fn new() -> Self {
        Self {
            next_allowed: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RequestPacer {
    /// Pacer with `delay` spacing and up to `2 * delay` of random jitter.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        if delay.is_zero() {
            return Self::disabled();
        }
        Self {
            delay,
            max_jitter: delay.saturating_mul(2),
            disabled: false,
            endpoints: DashMap::new(),
        }
    }

    /// Pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            disabled: true,
            endpoints: DashMap::new(),
        }
    }

    /// Replaces the jitter bound.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn state(&self, endpoint: &str) -> Arc<EndpointState> {
        self.endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(EndpointState::new()))
            .clone()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Waits until a request through `endpoint` is allowed, then reserves the
    /// next slot.
    #[instrument(skip(self))]
    pub async fn acquire(&self, endpoint: &str) {
        if self.disabled {
            return;
        }
        let state = self.state(endpoint);
        let mut next_allowed = state.next_allowed.lock().await;

        if let Some(at) = *next_allowed {
            let now = Instant::now();
            if at > now {
                let wait = at - now;
                let cumulative = state.add_cumulative_delay(wait);
                debug!(
                    endpoint,
                    delay_ms = wait.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "pacing request"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && cumulative - wait < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        endpoint,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "heavy pacing on endpoint - consider adding proxies"
                    );
                }
                tokio::time::sleep(wait).await;
            }
        }

        *next_allowed = Some(Instant::now() + self.delay + self.jitter());
    }

    /// Pushes the next allowed request through `endpoint` at least `delay`
    /// into the future (server `Retry-After`).
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, endpoint: &str, delay: Duration) {
        let delay = delay.min(MAX_RETRY_AFTER);
        let state = self.state(endpoint);
        let mut next_allowed = state.next_allowed.lock().await;
        let candidate = Instant::now() + delay;
        if next_allowed.is_none_or(|at| at < candidate) {
            *next_allowed = Some(candidate);
        }
        debug!(endpoint, delay_ms = delay.as_millis(), "recorded server rate limit");
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-date. Values above one hour are capped;
/// dates in the past yield zero.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use catalog_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    Some(
        datetime
            .duration_since(std::time::SystemTime::now())
            .map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RequestPacer Tests ====================

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let pacer = RequestPacer::new(Duration::from_secs(5));
        let start = std::time::Instant::now();
        pacer.acquire("a").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_second_request_waits_for_delay() {
        let pacer = RequestPacer::new(Duration::from_millis(80)).with_max_jitter(Duration::ZERO);
        pacer.acquire("a").await;
        let start = std::time::Instant::now();
        pacer.acquire("a").await;
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_endpoints_are_independent() {
        let pacer = RequestPacer::new(Duration::from_secs(5));
        pacer.acquire("a").await;
        let start = std::time::Instant::now();
        pacer.acquire("b").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_zero_delay_disables() {
        let pacer = RequestPacer::new(Duration::ZERO);
        assert!(pacer.is_disabled());
        let start = std::time::Instant::now();
        for _ in 0..5 {
            pacer.acquire("a").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_record_rate_limit_delays_next_request() {
        let pacer = RequestPacer::new(Duration::from_millis(1)).with_max_jitter(Duration::ZERO);
        pacer.record_rate_limit("a", Duration::from_millis(80)).await;
        let start = std::time::Instant::now();
        pacer.acquire("a").await;
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    // ==================== Retry-After Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("99999"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_http_date_in_past() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
    }
}
