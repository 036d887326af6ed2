//! Error types for catalog fetches and payload downloads.
//!
//! One error type covers every outbound request the pipeline makes (listing
//! pages, detail pages, payloads) so retry classification and proxy blame are
//! decided in a single place.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::proxy::ProxyOutcome;

/// Errors that can occur while fetching a page or payload.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The server answered 2xx with the wrong kind of body (a captcha or
    /// interstitial HTML page instead of a PDF, typically).
    #[error("unexpected content type from {url}: expected {expected}, got {actual}")]
    UnexpectedContent {
        /// The URL fetched.
        url: String,
        /// Content type the descriptor promised.
        expected: String,
        /// Content type the server sent.
        actual: String,
    },

    /// Response body was empty.
    #[error("empty response body from {url}")]
    EmptyBody {
        /// The URL fetched.
        url: String,
    },

    /// Every proxy is dead or cooling down.
    #[error("no proxy available{}", exhausted_suffix(.retry_in))]
    ProxyExhausted {
        /// Time until a proxy may become available; `None` when all are dead.
        retry_in: Option<Duration>,
    },

    /// The item's page did not yield a usable download target.
    #[error("item {item_id} is malformed: {reason}")]
    Malformed {
        /// Catalog item identifier.
        item_id: String,
        /// What was missing or wrong.
        reason: String,
    },

    /// File system error while writing a payload.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Written size does not match the declared Content-Length.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Temporary path that failed verification.
        path: PathBuf,
        /// Declared size in bytes.
        expected_bytes: u64,
        /// Bytes actually written.
        actual_bytes: u64,
    },

    /// Shutdown was requested before another attempt could start.
    #[error("cancelled before the next attempt")]
    Cancelled,
}

impl FetchError {
    /// Creates a network error from a reqwest error, mapping reqwest timeouts
    /// to [`FetchError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a content-type mismatch error.
    pub fn unexpected_content(
        url: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::UnexpectedContent {
            url: url.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a malformed-item error.
    pub fn malformed(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            item_id: item_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// How this error should be reported against the proxy that carried the
    /// request. `None` when no proxy was involved.
    ///
    /// A 404 or a page without a download link is the catalog's answer, so
    /// the proxy is credited with a success.
    #[must_use]
    pub fn proxy_outcome(&self) -> Option<ProxyOutcome> {
        match self {
            Self::ProxyExhausted { .. } | Self::Cancelled => None,
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::UnexpectedContent { .. }
            | Self::EmptyBody { .. }
            | Self::Integrity { .. } => Some(ProxyOutcome::Failure),
            Self::HttpStatus { status, .. } => Some(if is_proxy_attributable_status(*status) {
                ProxyOutcome::Failure
            } else {
                ProxyOutcome::Success
            }),
            Self::Malformed { .. } | Self::Io { .. } => Some(ProxyOutcome::Success),
        }
    }
}

fn exhausted_suffix(retry_in: &Option<Duration>) -> String {
    match retry_in {
        Some(wait) => format!(" (next in {:.1}s)", wait.as_secs_f64()),
        None => " (all proxies dead)".to_string(),
    }
}

/// Statuses that indicate the egress path (not the item) is the problem:
/// proxy auth, blocks, throttling and upstream failures.
#[must_use]
pub fn is_proxy_attributable_status(status: u16) -> bool {
    matches!(status, 403 | 407 | 408 | 429) || (500..600).contains(&status)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_http_status_display() {
        let error = FetchError::http_status("https://example.com/catalog/A/", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/catalog/A/"));
    }

    #[test]
    fn test_fetch_error_proxy_exhausted_display() {
        let waiting = FetchError::ProxyExhausted {
            retry_in: Some(Duration::from_millis(1500)),
        };
        assert!(waiting.to_string().contains("1.5s"));

        let dead = FetchError::ProxyExhausted { retry_in: None };
        assert!(dead.to_string().contains("all proxies dead"));
    }

    #[test]
    fn test_fetch_error_unexpected_content_display() {
        let error = FetchError::unexpected_content("u", "application/pdf", "text/html");
        let msg = error.to_string();
        assert!(msg.contains("application/pdf"));
        assert!(msg.contains("text/html"));
    }

    #[test]
    fn test_proxy_outcome_blames_proxy_for_transport_failures() {
        assert_eq!(
            FetchError::timeout("u").proxy_outcome(),
            Some(ProxyOutcome::Failure)
        );
        assert_eq!(
            FetchError::http_status("u", 503).proxy_outcome(),
            Some(ProxyOutcome::Failure)
        );
        assert_eq!(
            FetchError::http_status("u", 407).proxy_outcome(),
            Some(ProxyOutcome::Failure)
        );
        assert_eq!(
            FetchError::unexpected_content("u", "application/pdf", "text/html").proxy_outcome(),
            Some(ProxyOutcome::Failure)
        );
    }

    #[test]
    fn test_proxy_outcome_credits_proxy_for_item_answers() {
        assert_eq!(
            FetchError::http_status("u", 404).proxy_outcome(),
            Some(ProxyOutcome::Success)
        );
        assert_eq!(
            FetchError::malformed("B", "no download link").proxy_outcome(),
            Some(ProxyOutcome::Success)
        );
        assert_eq!(
            FetchError::ProxyExhausted { retry_in: None }.proxy_outcome(),
            None
        );
    }

    #[test]
    fn test_fetch_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = FetchError::io(PathBuf::from("/tmp/A.pdf.part"), io_error);
        assert!(error.to_string().contains("/tmp/A.pdf.part"));
    }
}
