//! Per-kind download descriptor extraction from parsed detail pages.
//!
//! Each content kind gets its own [`Extractor`]. [`ExtractorSet`] picks the
//! first extractor whose `matches` accepts the page and falls back to
//! [`BookExtractor`], which handles the bulk of the catalog.

use thiserror::Error;
use tracing::debug;

use super::pages::{CatalogUrls, DetailPage};
use super::{ContentKind, DownloadDescriptor};
use crate::download::FetchError;

/// Why a detail page did not yield a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// No file link and no accessible scan.
    #[error("{kind} {item_id} has no download target")]
    NoTarget {
        /// Item identifier.
        item_id: String,
        /// Kind the page was treated as.
        kind: ContentKind,
    },

    /// The page is a collection of issues rather than a single document.
    #[error("{item_id} is a collection page without direct files; query it by catalog id instead")]
    Collection {
        /// Item identifier.
        item_id: String,
    },
}

impl ExtractError {
    /// Item the error refers to.
    #[must_use]
    pub fn item_id(&self) -> &str {
        match self {
            Self::NoTarget { item_id, .. } | Self::Collection { item_id } => item_id,
        }
    }
}

impl From<ExtractError> for FetchError {
    fn from(error: ExtractError) -> Self {
        FetchError::malformed(error.item_id().to_string(), error.to_string())
    }
}

/// Strategy for one content kind.
pub trait Extractor: Send + Sync {
    /// Kind this extractor produces.
    fn kind(&self) -> ContentKind;

    /// Whether this extractor claims `page`.
    fn matches(&self, page: &DetailPage) -> bool;

    /// Builds the download descriptor for `page`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the page offers nothing to download.
    fn extract(
        &self,
        page: &DetailPage,
        urls: &CatalogUrls,
    ) -> Result<DownloadDescriptor, ExtractError>;
}

fn label_contains(page: &DetailPage, needles: &[&str]) -> bool {
    page.kind_label.as_deref().is_some_and(|label| {
        let label = label.to_lowercase();
        needles.iter().any(|needle| label.contains(needle))
    })
}

/// Explicit file links first, then the catalog's file endpoint when the scan
/// is readable online.
fn links_or_files_endpoint(page: &DetailPage, urls: &CatalogUrls) -> Vec<String> {
    let mut targets = page.file_links.clone();
    let fallback = urls.files_url(&page.item_id);
    if page.has_read_button && !targets.contains(&fallback) {
        targets.push(fallback);
    }
    targets
}

/// Books, and anything no other extractor claims.
#[derive(Debug, Default, Clone, Copy)]
pub struct BookExtractor;

impl Extractor for BookExtractor {
    fn kind(&self) -> ContentKind {
        ContentKind::Book
    }

    fn matches(&self, page: &DetailPage) -> bool {
        label_contains(page, &["книг", "book", "монограф"])
    }

    fn extract(
        &self,
        page: &DetailPage,
        urls: &CatalogUrls,
    ) -> Result<DownloadDescriptor, ExtractError> {
        let targets = links_or_files_endpoint(page, urls);
        DownloadDescriptor::new(page, self.kind(), targets)
    }
}

/// Journal and periodical articles.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArticleExtractor;

impl Extractor for ArticleExtractor {
    fn kind(&self) -> ContentKind {
        ContentKind::Article
    }

    fn matches(&self, page: &DetailPage) -> bool {
        label_contains(page, &["стат", "article", "журнал", "journal"])
    }

    fn extract(
        &self,
        page: &DetailPage,
        urls: &CatalogUrls,
    ) -> Result<DownloadDescriptor, ExtractError> {
        // Articles are often served only through the file endpoint, without a
        // reader button on the page.
        let mut targets = page.file_links.clone();
        let endpoint = urls.files_url(&page.item_id);
        if !targets.contains(&endpoint) {
            targets.push(endpoint);
        }
        DownloadDescriptor::new(page, self.kind(), targets)
    }
}

/// Newspaper issues.
#[derive(Debug, Default, Clone, Copy)]
pub struct NewspaperExtractor;

impl Extractor for NewspaperExtractor {
    fn kind(&self) -> ContentKind {
        ContentKind::Newspaper
    }

    fn matches(&self, page: &DetailPage) -> bool {
        label_contains(page, &["газет", "newspaper"])
    }

    fn extract(
        &self,
        page: &DetailPage,
        urls: &CatalogUrls,
    ) -> Result<DownloadDescriptor, ExtractError> {
        if page.file_links.is_empty() && !page.has_read_button {
            // A newspaper title page lists issues; it has no file of its own.
            return Err(ExtractError::Collection {
                item_id: page.item_id.clone(),
            });
        }
        let targets = links_or_files_endpoint(page, urls);
        DownloadDescriptor::new(page, self.kind(), targets)
    }
}

/// Ordered set of extractors with a book fallback.
pub struct ExtractorSet {
    extractors: Vec<Box<dyn Extractor>>,
    fallback: BookExtractor,
}

impl std::fmt::Debug for ExtractorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<ContentKind> = self.extractors.iter().map(|e| e.kind()).collect();
        f.debug_struct("ExtractorSet").field("kinds", &kinds).finish()
    }
}

impl Default for ExtractorSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl ExtractorSet {
    /// Newspaper, article and book extractors, in that order.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            extractors: vec![
                Box::new(NewspaperExtractor),
                Box::new(ArticleExtractor),
                Box::new(BookExtractor),
            ],
            fallback: BookExtractor,
        }
    }

    /// Builds a set from custom extractors; unmatched pages use the book fallback.
    #[must_use]
    pub fn with_extractors(extractors: Vec<Box<dyn Extractor>>) -> Self {
        Self {
            extractors,
            fallback: BookExtractor,
        }
    }

    /// The extractor that will handle `page`.
    #[must_use]
    pub fn select(&self, page: &DetailPage) -> &dyn Extractor {
        self.extractors
            .iter()
            .find(|e| e.matches(page))
            .map_or(&self.fallback as &dyn Extractor, |e| e.as_ref())
    }

    /// Selects an extractor for `page` and runs it.
    ///
    /// # Errors
    ///
    /// Propagates the selected extractor's [`ExtractError`].
    pub fn extract(
        &self,
        page: &DetailPage,
        urls: &CatalogUrls,
    ) -> Result<DownloadDescriptor, ExtractError> {
        let extractor = self.select(page);
        debug!(item_id = %page.item_id, kind = %extractor.kind(), "extracting descriptor");
        extractor.extract(page, urls)
    }
}
