//! HTTP plumbing shared by the resolver and both worker pools.
//!
//! - Client construction per egress endpoint ([`build_client`])
//! - Page fetches and atomic payload publishing ([`fetch_text`], [`download_to_path`])
//! - Error taxonomy and retry decisions ([`FetchError`], [`RetryPolicy`])
//! - Per-endpoint request pacing ([`RequestPacer`])
//! - File naming for items and query directories

mod attempt;
mod client;
mod error;
pub mod filename;
mod pacer;
mod retry;

pub use attempt::Fetcher;
pub use client::{
    CONNECT_TIMEOUT_SECS, ClientSettings, PARTIAL_SUFFIX, PublishedFile, READ_TIMEOUT_SECS,
    build_client, check_status, download_to_path, fetch_text, partial_path, stream_to_path,
};
pub use error::{FetchError, is_proxy_attributable_status};
pub use pacer::{DEFAULT_REQUEST_DELAY, RequestPacer, parse_retry_after};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy,
    classify_error,
};

// Note: no module-local Result alias; signatures spell out `Result<T, FetchError>`.
