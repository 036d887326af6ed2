//! Validated run configuration consumed by the pipeline coordinator.
//!
//! Built once at startup (from CLI arguments in the binary, directly in
//! tests) and never re-read during a run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::{DEFAULT_BASE_URL, QueryMode};
use crate::download::filename::query_slug;
use crate::download::{
    CONNECT_TIMEOUT_SECS, ClientSettings, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES,
    DEFAULT_REQUEST_DELAY, READ_TIMEOUT_SECS, RetryPolicy,
};
use crate::progress::PROGRESS_DB_FILE;
use crate::proxy::{DEFAULT_PROXY_CHECK_URL, ProxyPoolConfig};

/// Items per chunk when not configured.
pub const DEFAULT_CHUNK_SIZE: usize = 20;
/// Concurrent detail-page workers when not configured.
pub const DEFAULT_PARSER_WORKERS: usize = 4;
/// Concurrent payload workers when not configured.
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 2;
/// Default results root.
pub const DEFAULT_RESULTS_DIR: &str = "results";

/// Upper bound for either worker pool.
pub const MAX_WORKERS: usize = 64;
/// Upper bound for the chunk size.
pub const MAX_CHUNK_SIZE: usize = 1000;

const DOWNLOADS_DIR: &str = "downloads";
const SUMMARY_FILE: &str = "summary.json";

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Query string is blank.
    #[error("query must not be empty")]
    EmptyQuery,

    /// A numeric setting is outside its allowed range.
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Setting name as shown to the user.
        name: &'static str,
        /// Rejected value.
        value: usize,
        /// Inclusive minimum.
        min: usize,
        /// Inclusive maximum.
        max: usize,
    },

    /// Base URL is not an http(s) URL.
    #[error("invalid base URL: {0}")]
    BaseUrl(String),
}

/// Everything the coordinator needs for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub query: String,
    pub mode: QueryMode,
    pub base_url: String,
    pub results_dir: PathBuf,
    pub proxy_file: Option<PathBuf>,
    pub chunk_size: usize,
    pub parser_workers: usize,
    pub download_workers: usize,
    /// Capacity of the parser -> downloader queue. Zero means "same as chunk size".
    pub download_queue_capacity: usize,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    /// Minimum spacing between requests through one endpoint. Zero disables pacing.
    pub request_delay: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub proxy: ProxyPoolConfig,
    pub check_proxies: bool,
    pub proxy_check_url: String,
}

impl PipelineConfig {
    /// Defaults for `query` in `mode`.
    #[must_use]
    pub fn new(query: impl Into<String>, mode: QueryMode) -> Self {
        Self {
            query: query.into(),
            mode,
            base_url: DEFAULT_BASE_URL.to_string(),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            proxy_file: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            parser_workers: DEFAULT_PARSER_WORKERS,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            download_queue_capacity: 0,
            max_attempts: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_BASE_DELAY,
            request_delay: DEFAULT_REQUEST_DELAY,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            proxy: ProxyPoolConfig::default(),
            check_proxies: false,
            proxy_check_url: DEFAULT_PROXY_CHECK_URL.to_string(),
        }
    }

    /// Checks ranges and the base URL.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query.trim().is_empty() {
            return Err(ConfigError::EmptyQuery);
        }
        check_range("chunk size", self.chunk_size, 1, MAX_CHUNK_SIZE)?;
        check_range("parser workers", self.parser_workers, 1, MAX_WORKERS)?;
        check_range("download workers", self.download_workers, 1, MAX_WORKERS)?;
        check_range(
            "download queue capacity",
            self.download_queue_capacity,
            0,
            MAX_CHUNK_SIZE,
        )?;
        check_range("max attempts", self.max_attempts as usize, 1, 20)?;
        check_range(
            "failure threshold",
            self.proxy.failure_threshold as usize,
            1,
            100,
        )?;
        crate::catalog::CatalogUrls::new(&self.base_url)
            .map_err(|e| ConfigError::BaseUrl(e.to_string()))?;
        Ok(())
    }

    /// `<results>/<query slug>`
    #[must_use]
    pub fn query_dir(&self) -> PathBuf {
        self.results_dir
            .join(query_slug(&self.query, self.mode.is_search()))
    }

    /// `<query dir>/downloads`
    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.query_dir().join(DOWNLOADS_DIR)
    }

    /// `<query dir>/progress.db`
    #[must_use]
    pub fn progress_db_path(&self) -> PathBuf {
        self.query_dir().join(PROGRESS_DB_FILE)
    }

    /// `<query dir>/summary.json`
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.query_dir().join(SUMMARY_FILE)
    }

    /// Effective parser -> downloader queue capacity.
    #[must_use]
    pub fn effective_download_queue_capacity(&self) -> usize {
        if self.download_queue_capacity == 0 {
            self.chunk_size.max(1)
        } else {
            self.download_queue_capacity
        }
    }

    /// Retry policy derived from the attempt budget and base delay.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy::new(
            self.max_attempts,
            self.retry_base_delay,
            defaults.max_delay().max(self.retry_base_delay),
            2.0,
        )
        .with_max_jitter(self.retry_base_delay / 2)
    }

    /// HTTP client timeouts.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        }
    }
}

fn check_range(name: &'static str, value: usize, min: usize, max: usize) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}
