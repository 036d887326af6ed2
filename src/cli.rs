//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use catalog_core::catalog::DEFAULT_BASE_URL;
use catalog_core::config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_DOWNLOAD_WORKERS, DEFAULT_PARSER_WORKERS, DEFAULT_RESULTS_DIR,
};
use catalog_core::download::{CONNECT_TIMEOUT_SECS, DEFAULT_MAX_RETRIES, READ_TIMEOUT_SECS};
use catalog_core::proxy::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_COOLDOWNS, DEFAULT_PROXY_CHECK_URL,
};
use catalog_core::{NoProxyPolicy, PipelineConfig, ProxyPoolConfig, QueryMode};
use clap::Parser;
use clap::builder::TypedValueParser as _;

/// Download documents from a digital-library catalog.
///
/// Resolves a collection id (or, with --search, a search term) into catalog
/// items and downloads their PDFs through a rotating proxy pool. Re-running
/// the same query resumes where the previous run stopped.
#[derive(Parser, Debug)]
#[command(name = "catalog-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Collection id, or a search term with --search
    pub query: String,

    /// Treat the query as a free-text search term
    #[arg(short, long)]
    pub search: bool,

    /// Proxy list, one per line (host:port[:user:password] or a proxy URL)
    #[arg(short = 'p', long, value_name = "FILE")]
    pub proxy_file: Option<PathBuf>,

    /// Items per chunk; also the parser queue capacity (1-1000)
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = clap::value_parser!(u16).range(1..=1000).map(usize::from))]
    pub chunk_size: usize,

    /// Concurrent detail-page workers (1-64)
    #[arg(long, default_value_t = DEFAULT_PARSER_WORKERS, value_parser = clap::value_parser!(u8).range(1..=64).map(usize::from))]
    pub parser_workers: usize,

    /// Concurrent download workers (1-64)
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_WORKERS, value_parser = clap::value_parser!(u8).range(1..=64).map(usize::from))]
    pub download_workers: usize,

    /// Root directory for per-query results
    #[arg(short = 'o', long, default_value = DEFAULT_RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Catalog site root
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Attempts per request including the first (1-20)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=20))]
    pub max_retries: u8,

    /// Base delay for retry backoff in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub retry_base_delay_ms: u64,

    /// Minimum delay between requests through the same proxy in milliseconds (0 to disable)
    #[arg(short = 'l', long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub request_delay_ms: u64,

    /// Read timeout in seconds
    #[arg(long, default_value_t = READ_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: u64,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=300))]
    pub connect_timeout: u64,

    /// Consecutive failures before a proxy is benched
    #[arg(long, default_value_t = DEFAULT_FAILURE_THRESHOLD, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub failure_threshold: u32,

    /// First proxy cooldown in seconds; doubles on each further benching
    #[arg(long, default_value_t = 60)]
    pub cooldown_secs: u64,

    /// Cooldowns a proxy may go through before it is retired
    #[arg(long, default_value_t = DEFAULT_MAX_COOLDOWNS)]
    pub max_cooldowns: u32,

    /// Fall back to a direct connection when no proxy is available
    #[arg(long)]
    pub allow_direct: bool,

    /// Probe every proxy before the run and drop the ones that fail
    #[arg(long)]
    pub check_proxies: bool,

    /// URL used by --check-proxies
    #[arg(long, default_value = DEFAULT_PROXY_CHECK_URL)]
    pub proxy_check_url: String,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Default tracing filter. `RUST_LOG` still takes precedence.
    pub fn default_log_level(&self) -> &str {
        if self.quiet {
            return "error";
        }
        if let Some(level) = &self.log_level {
            return level;
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Builds the pipeline configuration.
    pub fn to_config(&self) -> PipelineConfig {
        let mode = if self.search {
            QueryMode::SearchTerm
        } else {
            QueryMode::CatalogId
        };
        let mut config = PipelineConfig::new(self.query.trim(), mode);
        config.base_url.clone_from(&self.base_url);
        config.results_dir.clone_from(&self.results_dir);
        config.proxy_file.clone_from(&self.proxy_file);
        config.chunk_size = self.chunk_size;
        config.parser_workers = self.parser_workers;
        config.download_workers = self.download_workers;
        config.max_attempts = u32::from(self.max_retries);
        config.retry_base_delay = Duration::from_millis(self.retry_base_delay_ms);
        config.request_delay = Duration::from_millis(self.request_delay_ms);
        config.read_timeout = Duration::from_secs(self.timeout);
        config.connect_timeout = Duration::from_secs(self.connect_timeout);
        config.proxy = ProxyPoolConfig {
            failure_threshold: self.failure_threshold,
            base_cooldown: Duration::from_secs(self.cooldown_secs),
            max_cooldowns: self.max_cooldowns,
            no_proxy_policy: if self.allow_direct {
                NoProxyPolicy::Direct
            } else {
                NoProxyPolicy::Wait
            },
            ..ProxyPoolConfig::default()
        };
        config.check_proxies = self.check_proxies;
        config.proxy_check_url.clone_from(&self.proxy_check_url);
        config
    }
}
