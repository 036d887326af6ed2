//! Query resolution: paginates a collection listing or search results into
//! fixed-size chunks of item ids.
//!
//! Pages are fetched lazily, one at a time, only when the buffered ids no
//! longer fill a chunk. Every page request goes through [`Fetcher`], so
//! resolution shares the proxy pool, pacing and retry policy with the
//! worker pools.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::pages::{CatalogUrls, parse_listing};
use super::{Chunk, Item, QueryMode};
use crate::download::{FetchError, Fetcher, fetch_text};

/// Errors that end resolution for the whole run.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A listing page could not be fetched within the retry budget.
    #[error("failed to resolve page {page} ({url}): {source}")]
    Fetch {
        /// 1-based page number.
        page: u32,
        /// Page URL.
        url: String,
        /// Last attempt's error.
        #[source]
        source: FetchError,
    },

    /// Shutdown was requested while a page was being retried.
    #[error("resolution cancelled")]
    Cancelled,
}

/// Lazy, restartable chunk sequence for one query.
#[derive(Debug)]
pub struct QueryResolver {
    fetcher: Arc<Fetcher>,
    urls: CatalogUrls,
    query: String,
    mode: QueryMode,
    chunk_size: usize,
    next_page: u32,
    seen: HashSet<String>,
    buffer: VecDeque<String>,
    exhausted: bool,
    chunk_index: usize,
}

impl QueryResolver {
    /// Creates a resolver positioned before the first page.
    ///
    /// A `chunk_size` of zero is treated as one.
    #[must_use]
    pub fn new(
        fetcher: Arc<Fetcher>,
        urls: CatalogUrls,
        query: impl Into<String>,
        mode: QueryMode,
        chunk_size: usize,
    ) -> Self {
        Self {
            fetcher,
            urls,
            query: query.into(),
            mode,
            chunk_size: chunk_size.max(1),
            next_page: 1,
            seen: HashSet::new(),
            buffer: VecDeque::new(),
            exhausted: false,
            chunk_index: 0,
        }
    }

    /// The query being resolved.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// How the query is interpreted.
    #[must_use]
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// Distinct ids enumerated so far.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.seen.len()
    }

    /// Listing pages fetched so far.
    #[must_use]
    pub fn pages_fetched(&self) -> u32 {
        self.next_page - 1
    }

    /// Rewinds to the first page, forgetting everything enumerated so far.
    pub fn restart(&mut self) {
        self.next_page = 1;
        self.seen.clear();
        self.buffer.clear();
        self.exhausted = false;
        self.chunk_index = 0;
    }

    /// Next chunk in listing order, or `None` once the listing is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Fetch`] when a page fails after retries, and
    /// [`ResolveError::Cancelled`] when shutdown interrupts a retry.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, ResolveError> {
        while self.buffer.len() < self.chunk_size && !self.exhausted {
            self.fetch_next_page().await?;
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let take = self.chunk_size.min(self.buffer.len());
        let items: Vec<Item> = self.buffer.drain(..take).map(Item::pending).collect();
        let chunk = Chunk {
            index: self.chunk_index,
            items,
        };
        self.chunk_index += 1;
        debug!(chunk = chunk.index, size = chunk.len(), "chunk resolved");
        Ok(Some(chunk))
    }

    #[instrument(skip(self), fields(query = %self.query, mode = %self.mode, page = self.next_page))]
    async fn fetch_next_page(&mut self) -> Result<(), ResolveError> {
        let page = self.next_page;
        let url = self.urls.page_url(self.mode, &self.query, page);

        let result = self
            .fetcher
            .run("listing page", |lease, _attempt| {
                let url = url.clone();
                async move { fetch_text(lease.client(), &url).await }
            })
            .await;

        let html = match result {
            Ok(html) => html,
            Err(FetchError::HttpStatus {
                status: 404 | 410, ..
            }) => {
                if page == 1 {
                    warn!(url = %url, "listing not found");
                } else {
                    debug!(url = %url, "listing ended with not-found page");
                }
                self.exhausted = true;
                return Ok(());
            }
            Err(FetchError::Cancelled) => return Err(ResolveError::Cancelled),
            Err(source) => return Err(ResolveError::Fetch { page, url, source }),
        };

        // Parsed before anything else awaits; the HTML tree is not Send.
        let ids = parse_listing(&html);
        let found = ids.len();
        let mut fresh = 0usize;
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.buffer.push_back(id);
                fresh += 1;
            }
        }
        self.next_page += 1;

        if fresh == 0 {
            debug!(found, "page yielded no new items, listing exhausted");
            self.exhausted = true;
        } else {
            info!(found, fresh, total = self.seen.len(), "listing page resolved");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::download::{ClientSettings, RequestPacer, RetryPolicy};
    use crate::proxy::{ProxyPool, ProxyPoolConfig};

    fn listing(ids: &[&str]) -> String {
        let cards: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<div class="cards-results__item"><a class="cards-results__link" href="/catalog/{id}/">x</a></div>"#
                )
            })
            .collect();
        format!("<html><body>{cards}</body></html>")
    }

    fn fetcher(max_attempts: u32) -> Arc<Fetcher> {
        let pool = ProxyPool::direct(ProxyPoolConfig::default(), &ClientSettings::default()).unwrap();
        Arc::new(Fetcher::new(
            Arc::new(pool),
            Arc::new(RequestPacer::disabled()),
            RetryPolicy::new(
                max_attempts,
                Duration::from_millis(1),
                Duration::from_millis(5),
                2.0,
            )
            .with_max_jitter(Duration::ZERO),
            CancellationToken::new(),
        ))
    }

    async fn mount_listing(server: &MockServer, collection: &str, page: u32, ids: &[&str]) {
        Mock::given(method("GET"))
            .and(path(format!("/catalog/{collection}/")))
            .and(query_param("volumes", format!("page-{page}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(ids)))
            .mount(server)
            .await;
    }

    async fn collect(resolver: &mut QueryResolver) -> Vec<Vec<String>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = resolver.next_chunk().await.unwrap() {
            chunks.push(chunk.ids().map(str::to_string).collect());
        }
        chunks
    }

    // ==================== Pagination Tests ====================

    #[tokio::test]
    async fn test_catalog_listing_chunks_in_order() {
        let server = MockServer::start().await;
        mount_listing(&server, "COLL", 1, &["A", "B", "C"]).await;
        mount_listing(&server, "COLL", 2, &["D", "E"]).await;
        mount_listing(&server, "COLL", 3, &[]).await;

        let urls = CatalogUrls::new(&server.uri()).unwrap();
        let mut resolver = QueryResolver::new(fetcher(2), urls, "COLL", QueryMode::CatalogId, 2);

        let chunks = collect(&mut resolver).await;
        assert_eq!(
            chunks,
            vec![vec!["A", "B"], vec!["C", "D"], vec!["E"]]
        );
        assert_eq!(resolver.resolved_count(), 5);
        assert_eq!(resolver.pages_fetched(), 3);
        assert!(resolver.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeated_last_page_ends_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/"))
            .and(query_param("PAGEN_1", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&["S1", "S2"])))
            .mount(&server)
            .await;
        // Sites often answer any page past the end with the last page again.
        Mock::given(method("GET"))
            .and(path("/search/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&["S2", "S1"])))
            .mount(&server)
            .await;

        let urls = CatalogUrls::new(&server.uri()).unwrap();
        let mut resolver =
            QueryResolver::new(fetcher(2), urls, "газета", QueryMode::SearchTerm, 10);

        assert_eq!(collect(&mut resolver).await, vec![vec!["S1", "S2"]]);
        assert_eq!(resolver.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn test_not_found_page_ends_listing() {
        let server = MockServer::start().await;
        mount_listing(&server, "COLL", 1, &["A"]).await;
        Mock::given(method("GET"))
            .and(path("/catalog/COLL/"))
            .and(query_param("volumes", "page-2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let urls = CatalogUrls::new(&server.uri()).unwrap();
        let mut resolver = QueryResolver::new(fetcher(3), urls, "COLL", QueryMode::CatalogId, 5);

        assert_eq!(collect(&mut resolver).await, vec![vec!["A"]]);
    }

    #[tokio::test]
    async fn test_restart_replays_from_first_page() {
        let server = MockServer::start().await;
        mount_listing(&server, "COLL", 1, &["A", "B"]).await;
        mount_listing(&server, "COLL", 2, &[]).await;

        let urls = CatalogUrls::new(&server.uri()).unwrap();
        let mut resolver = QueryResolver::new(fetcher(2), urls, "COLL", QueryMode::CatalogId, 1);

        let first = collect(&mut resolver).await;
        resolver.restart();
        let second = collect(&mut resolver).await;
        assert_eq!(first, second);
        assert_eq!(first, vec![vec!["A"], vec!["B"]]);
    }

    // ==================== Failure Tests ====================

    #[tokio::test]
    async fn test_unreachable_listing_is_fatal_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let urls = CatalogUrls::new(&server.uri()).unwrap();
        let mut resolver = QueryResolver::new(fetcher(2), urls, "COLL", QueryMode::CatalogId, 2);

        let err = resolver.next_chunk().await.unwrap_err();
        match err {
            ResolveError::Fetch { page, source, .. } => {
                assert_eq!(page, 1);
                assert!(matches!(source, FetchError::HttpStatus { status: 503, .. }));
            }
            ResolveError::Cancelled => panic!("expected fetch error"),
        }
    }

    #[tokio::test]
    async fn test_transient_listing_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/catalog/COLL/"))
            .and(query_param("volumes", "page-1"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_listing(&server, "COLL", 1, &["A"]).await;
        mount_listing(&server, "COLL", 2, &[]).await;

        let urls = CatalogUrls::new(&server.uri()).unwrap();
        let fetcher = fetcher(3);
        let mut resolver =
            QueryResolver::new(Arc::clone(&fetcher), urls, "COLL", QueryMode::CatalogId, 2);

        assert_eq!(collect(&mut resolver).await, vec![vec!["A"]]);
        assert_eq!(fetcher.retries(), 1);
    }
}
