//! Catalog Downloader Core Library
//!
//! Resumable, proxy-rotating downloader for digital-library catalogs. A query
//! (a collection id or a search term) is resolved into chunks of catalog
//! items; parser workers turn each item's detail page into a download
//! descriptor, and download workers fetch the payloads. Every terminal
//! outcome is recorded per query so an interrupted run picks up where it
//! stopped.
//!
//! # Architecture
//!
//! - [`proxy`] - Rotating, failure-aware egress pool
//! - [`progress`] - Durable per-query progress store
//! - [`catalog`] - URLs, page parsing, extractors and the query resolver
//! - [`download`] - HTTP plumbing, retry policy, pacing, atomic publishing
//! - [`pipeline`] - Worker pools and the coordinator
//! - [`config`] - Validated run configuration
//! - [`db`] - `SQLite` connection and migrations

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod db;
pub mod download;
pub mod pipeline;
pub mod progress;
pub mod proxy;
mod user_agent;

// Re-export commonly used types
pub use catalog::{ContentKind, DownloadDescriptor, QueryMode, QueryResolver};
pub use config::{ConfigError, PipelineConfig};
pub use db::Database;
pub use download::{FailureType, FetchError, Fetcher, RequestPacer, RetryPolicy};
pub use pipeline::{Coordinator, PipelineError, RunOutcome, RunReport};
pub use progress::{ItemStatus, ProgressStore};
pub use proxy::{NoProxyPolicy, ProxyOutcome, ProxyPool, ProxyPoolConfig};
