//! Retry logic with exponential backoff for pipeline fetches.
//!
//! Every failed attempt is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - may succeed through another proxy or later
//! - [`FailureType::ProxyExhausted`] - no proxy was available; back off and retry
//! - [`FailureType::Malformed`] - the item itself is broken; never retried
//! - [`FailureType::Persistence`] - local write failed; the item is left for the next run
//!
//! The [`RetryPolicy`] then decides whether another attempt fits in the
//! budget and how long to wait before it.
//!
//! # Example
//!
//! ```
//! use catalog_core::download::{FetchError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = FetchError::http_status("https://example.com/catalog/A/", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::FetchError;

/// Default maximum attempts per item and stage.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default maximum jitter added to delays (500ms).
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx, 408/429, proxy-attributable 403/407,
    /// wrong content type, truncated body.
    Transient,

    /// No proxy was available for the attempt.
    ProxyExhausted,

    /// The item cannot be fetched no matter how often we try.
    ///
    /// Examples: 404, 410, other 4xx, a detail page without a download target.
    Malformed,

    /// Writing the payload or the progress record failed.
    Persistence,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately: 1s, 2s, 4s (before hitting max attempts).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_multiplier: f32,

    /// Upper bound of random jitter added to each delay.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Replaces the jitter bound. Zero makes delays deterministic.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Malformed => {
                return RetryDecision::DoNotRetry {
                    reason: "item is malformed - retry would not help".to_string(),
                };
            }
            FailureType::Persistence => {
                return RetryDecision::DoNotRetry {
                    reason: "local persistence failed - left for the next run".to_string(),
                };
            }
            FailureType::Transient | FailureType::ProxyExhausted => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Classifies a fetch error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Network, Timeout | Transient |
/// | HTTP 408, 429, 403, 407, 5xx | Transient |
/// | HTTP 404, 410, other 4xx | Malformed |
/// | Unexpected content type, empty or short body | Transient |
/// | No proxy available | ProxyExhausted |
/// | No download target on the page, invalid URL | Malformed |
/// | IO, progress store, cancellation | Persistence |
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::Network { .. }
        | FetchError::Timeout { .. }
        | FetchError::UnexpectedContent { .. }
        | FetchError::EmptyBody { .. }
        | FetchError::Integrity { .. } => FailureType::Transient,
        FetchError::ProxyExhausted { .. } => FailureType::ProxyExhausted,
        FetchError::Malformed { .. } => FailureType::Malformed,
        FetchError::Io { .. } | FetchError::Cancelled => FailureType::Persistence,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        403 | 407 => FailureType::Transient, // blocked or bad proxy credentials
        408 => FailureType::Transient,       // Request Timeout
        429 => FailureType::Transient,       // Too Many Requests
        404 | 410 => FailureType::Malformed, // item does not exist
        status if (400..500).contains(&status) => FailureType::Malformed,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Malformed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_secs(1),
            Duration::from_secs(5),
            2.0,
        )
        .with_max_jitter(Duration::ZERO)
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(5), 2.0);
        assert_eq!(policy.max_attempts(), 1);
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = no_jitter(10);
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(6), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            assert!(policy.calculate_jitter() <= DEFAULT_MAX_JITTER);
        }
    }

    // ==================== Error Classification Tests ====================

    #[test]
    fn test_classify_http_statuses() {
        let cases = [
            (404, FailureType::Malformed),
            (410, FailureType::Malformed),
            (400, FailureType::Malformed),
            (403, FailureType::Transient),
            (407, FailureType::Transient),
            (408, FailureType::Transient),
            (429, FailureType::Transient),
            (500, FailureType::Transient),
            (503, FailureType::Transient),
        ];
        for (status, expected) in cases {
            let error = FetchError::http_status("http://example.com", status);
            assert_eq!(classify_error(&error), expected, "status {status}");
        }
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_error(&FetchError::timeout("u")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&FetchError::ProxyExhausted { retry_in: None }),
            FailureType::ProxyExhausted
        );
        assert_eq!(
            classify_error(&FetchError::malformed("B", "no target")),
            FailureType::Malformed
        );
        let io_err = std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full");
        assert_eq!(
            classify_error(&FetchError::io("/tmp/x", io_err)),
            FailureType::Persistence
        );
        assert_eq!(
            classify_error(&FetchError::integrity("/tmp/x", 10, 5)),
            FailureType::Transient
        );
    }

    // ==================== Should Retry Decision Tests ====================

    #[test]
    fn test_should_retry_malformed_and_persistence_never_retry() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::Malformed, 1),
            RetryDecision::DoNotRetry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Persistence, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_should_retry_proxy_exhausted_retries() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::ProxyExhausted, 1);
        assert!(matches!(decision, RetryDecision::Retry { attempt: 2, .. }));
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = no_jitter(3);

        assert_eq!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 2
            }
        );
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        let decision = policy.should_retry(FailureType::Transient, 3);
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("exhausted"));
        } else {
            panic!("expected DoNotRetry");
        }
    }
}
