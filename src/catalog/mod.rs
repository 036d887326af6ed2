//! Remote catalog model: query modes, items, chunks and download descriptors.
//!
//! - [`pages`] builds catalog URLs and parses listing and detail HTML
//! - [`extract`] turns detail pages into [`DownloadDescriptor`]s per content kind
//! - [`resolver`] paginates a query into chunks of item ids

pub mod extract;
pub mod pages;
pub mod resolver;

use std::fmt;

use serde::Serialize;

use crate::download::filename::item_filename;
use crate::progress::ItemStatus;

pub use extract::{
    ArticleExtractor, BookExtractor, ExtractError, Extractor, ExtractorSet, NewspaperExtractor,
};
pub use pages::{BaseUrlError, CatalogUrls, DetailPage, item_id_from_href, parse_listing};
pub use resolver::{QueryResolver, ResolveError};

/// Default catalog site.
pub const DEFAULT_BASE_URL: &str = "https://rusneb.ru";

/// Content type every catalog payload is served as.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// How a query string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// The query is a collection identifier whose listing is paginated.
    #[default]
    CatalogId,
    /// The query is submitted to the site search.
    SearchTerm,
}

impl QueryMode {
    /// Whether this is a free-text search.
    #[must_use]
    pub fn is_search(self) -> bool {
        matches!(self, Self::SearchTerm)
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CatalogId => write!(f, "catalog-id"),
            Self::SearchTerm => write!(f, "search-term"),
        }
    }
}

/// Document kind, decided by the extractor that handled the detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Book,
    Article,
    Newspaper,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Book => write!(f, "book"),
            Self::Article => write!(f, "article"),
            Self::Newspaper => write!(f, "newspaper"),
        }
    }
}

/// One catalog entry as enumerated by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: Option<String>,
    pub status: ItemStatus,
}

impl Item {
    /// A freshly enumerated, pending item.
    #[must_use]
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            status: ItemStatus::Pending,
        }
    }
}

/// Ordered batch of items; the unit of backpressure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the resolver's output.
    pub index: usize,
    pub items: Vec<Item>,
}

impl Chunk {
    /// Number of items in the chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the chunk holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.id.as_str())
    }
}

/// Ready-to-fetch reference to an item's payload. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadDescriptor {
    pub item_id: String,
    pub title: Option<String>,
    pub kind: ContentKind,
    /// Candidate URLs, tried in rotation across attempts.
    pub targets: Vec<String>,
    pub suggested_filename: String,
    pub content_type_hint: String,
}

impl DownloadDescriptor {
    /// Builds a PDF descriptor for `page`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::NoTarget`] when `targets` is empty.
    pub fn new(
        page: &DetailPage,
        kind: ContentKind,
        targets: Vec<String>,
    ) -> Result<Self, ExtractError> {
        if targets.is_empty() {
            return Err(ExtractError::NoTarget {
                item_id: page.item_id.clone(),
                kind,
            });
        }
        Ok(Self {
            item_id: page.item_id.clone(),
            title: page.title.clone(),
            kind,
            targets,
            suggested_filename: item_filename(&page.item_id, PDF_CONTENT_TYPE),
            content_type_hint: PDF_CONTENT_TYPE.to_string(),
        })
    }

    /// Target for a 1-based attempt number, rotating through `targets`.
    #[must_use]
    pub fn target_for_attempt(&self, attempt: u32) -> &str {
        let index = (attempt.saturating_sub(1) as usize) % self.targets.len().max(1);
        self.targets.get(index).map_or("", String::as_str)
    }
}
