//! Retrying request loop shared by the resolver and both worker pools.
//!
//! Each attempt leases a proxy, waits for the endpoint's pacing slot, runs
//! the caller's request, and reports the outcome back to the pool. Failed
//! attempts are classified and retried with backoff through whichever proxy
//! the pool hands out next.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::FetchError;
use super::pacer::{RequestPacer, parse_retry_after};
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::proxy::{ProxyLease, ProxyOutcome, ProxyPool};

/// Proxy-aware retry driver. Cheap to share behind `Arc`.
#[derive(Debug)]
pub struct Fetcher {
    pool: Arc<ProxyPool>,
    pacer: Arc<RequestPacer>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    retries: AtomicUsize,
}

impl Fetcher {
    /// Creates a fetcher over `pool` and `pacer`.
    #[must_use]
    pub fn new(
        pool: Arc<ProxyPool>,
        pacer: Arc<RequestPacer>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            pacer,
            policy,
            cancel,
            retries: AtomicUsize::new(0),
        }
    }

    /// The proxy pool requests are routed through.
    #[must_use]
    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// The retry policy in force.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries started so far across every caller.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    /// Runs `op` until it succeeds, fails permanently, exhausts the retry
    /// budget, or shutdown is requested between attempts. Shutdown also
    /// interrupts a pacing wait; a request already sent is never abandoned.
    ///
    /// `op` receives the leased proxy and the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error, or [`FetchError::Cancelled`] when
    /// shutdown prevented a retry.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(ProxyLease, u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let error = match self.pool.lease() {
                Ok(lease) => {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                        () = self.pacer.acquire(lease.label()) => {}
                    }
                    match op(lease.clone(), attempt).await {
                        Ok(value) => {
                            self.pool.report(&lease, ProxyOutcome::Success);
                            return Ok(value);
                        }
                        Err(error) => {
                            if let Some(outcome) = error.proxy_outcome() {
                                self.pool.report(&lease, outcome);
                            }
                            if let FetchError::HttpStatus {
                                retry_after: Some(value),
                                ..
                            } = &error
                                && let Some(delay) = parse_retry_after(value)
                            {
                                self.pacer.record_rate_limit(lease.label(), delay).await;
                            }
                            debug!(what, attempt, proxy = %lease.label(), error = %error, "attempt failed");
                            error
                        }
                    }
                }
                Err(retry_in) => FetchError::ProxyExhausted { retry_in },
            };

            if matches!(error, FetchError::ProxyExhausted { retry_in: None }) {
                return Err(error);
            }
            let failure_type = classify_error(&error);
            let delay = match self.policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    attempt = next;
                    match &error {
                        FetchError::ProxyExhausted {
                            retry_in: Some(wait),
                        } => delay.max(*wait).min(self.policy.max_delay()),
                        _ => delay,
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(what, reason, "giving up");
                    return Err(error);
                }
            };

            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            info!(
                what,
                attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "retrying"
            );
            self.retries.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
