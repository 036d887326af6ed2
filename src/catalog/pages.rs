//! Catalog URL construction and HTML page parsing.
//!
//! Parsing is synchronous and returns owned data; `scraper::Html` never lives
//! across an await point.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::trace;
use url::Url;

use super::QueryMode;

#[allow(clippy::expect_used)]
static RESULT_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#".cards-results__item a.cards-results__link, .search-list__item a[href*="/catalog/"]"#,
    )
    .expect("result link selector is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("title selector is valid"));

#[allow(clippy::expect_used)]
static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[property="og:title"]"#).expect("og:title selector is valid")
});

#[allow(clippy::expect_used)]
static KIND_LABEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".card-type, .search-result__type").expect("kind selector is valid")
});

#[allow(clippy::expect_used)]
static KIND_META: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="document-type"]"#).expect("kind meta selector is valid")
});

#[allow(clippy::expect_used)]
static FILE_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"a[href*="getFiles.php"]"#).expect("file link selector is valid")
});

#[allow(clippy::expect_used)]
static READ_BUTTON: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".search-result__content-main-read-button")
        .expect("read button selector is valid")
});

const FILES_PATH: &str = "local/tools/exalead/getFiles.php";

/// Errors raised for an unusable catalog base URL.
#[derive(Debug, thiserror::Error)]
pub enum BaseUrlError {
    /// Not a URL at all.
    #[error("invalid base URL '{url}': {source}")]
    Parse {
        /// Rejected input.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// Parsed, but not http or https.
    #[error("base URL must be http or https, got '{0}'")]
    UnsupportedScheme(String),
}

/// URL builder for one catalog site.
#[derive(Debug, Clone)]
pub struct CatalogUrls {
    base: Url,
}

impl CatalogUrls {
    /// Parses `base` (e.g. `https://rusneb.ru`).
    ///
    /// # Errors
    ///
    /// Returns [`BaseUrlError`] for malformed or non-HTTP base URLs.
    pub fn new(base: &str) -> Result<Self, BaseUrlError> {
        let mut base = Url::parse(base).map_err(|source| BaseUrlError::Parse {
            url: base.to_string(),
            source,
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(BaseUrlError::UnsupportedScheme(base.scheme().to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        Ok(Self { base })
    }

    /// The site root.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn join(&self, path: &str) -> Url {
        // Fixed, percent-encoded relative paths onto a '/'-terminated base.
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }

    /// `{base}/catalog/{id}/?volumes=page-{page}`
    #[must_use]
    pub fn listing_url(&self, collection_id: &str, page: u32) -> String {
        let mut url = self.join(&format!("catalog/{}/", urlencoding::encode(collection_id)));
        url.query_pairs_mut()
            .append_pair("volumes", &format!("page-{page}"));
        url.into()
    }

    /// `{base}/search/?q={query}&PAGEN_1={page}`
    #[must_use]
    pub fn search_url(&self, query: &str, page: u32) -> String {
        let mut url = self.join("search/");
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("PAGEN_1", &page.to_string());
        url.into()
    }

    /// Page URL for `query` in `mode`.
    #[must_use]
    pub fn page_url(&self, mode: QueryMode, query: &str, page: u32) -> String {
        match mode {
            QueryMode::CatalogId => self.listing_url(query, page),
            QueryMode::SearchTerm => self.search_url(query, page),
        }
    }

    /// `{base}/catalog/{id}/`
    #[must_use]
    pub fn detail_url(&self, item_id: &str) -> String {
        self.join(&format!("catalog/{}/", urlencoding::encode(item_id)))
            .into()
    }

    /// `{base}/local/tools/exalead/getFiles.php?book_id={id}&doc_type=pdf`
    #[must_use]
    pub fn files_url(&self, item_id: &str) -> String {
        let mut url = self.join(FILES_PATH);
        url.query_pairs_mut()
            .append_pair("book_id", item_id)
            .append_pair("doc_type", "pdf");
        url.into()
    }

    /// Resolves a possibly relative `href` against the site root.
    #[must_use]
    pub fn absolutize(&self, href: &str) -> Option<String> {
        self.base.join(href.trim()).ok().map(Into::into)
    }
}

/// Extracts the item id from an `href` containing `/catalog/<id>`.
#[must_use]
pub fn item_id_from_href(href: &str) -> Option<String> {
    let (_, rest) = href.split_once("/catalog/")?;
    let id = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    if id.is_empty() {
        return None;
    }
    Some(
        urlencoding::decode(id)
            .map(std::borrow::Cow::into_owned)
            .unwrap_or_else(|_| id.to_string()),
    )
}

/// Item ids from a listing or search results page, in page order.
/// Duplicates within the page are dropped.
#[must_use]
pub fn parse_listing(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut ids: Vec<String> = Vec::new();
    for link in document.select(&RESULT_LINK) {
        let Some(id) = link.value().attr("href").and_then(item_id_from_href) else {
            continue;
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    trace!(count = ids.len(), "listing parsed");
    ids
}

/// Facts extracted from an item's detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailPage {
    /// Catalog item identifier the page belongs to.
    pub item_id: String,
    /// Human-readable title, if present.
    pub title: Option<String>,
    /// Document type label as shown by the site (e.g. "Книга", "Статья").
    pub kind_label: Option<String>,
    /// Absolute URLs of direct file links, in page order.
    pub file_links: Vec<String>,
    /// Whether the page offers an online reader (the scan is accessible).
    pub has_read_button: bool,
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

impl DetailPage {
    /// Parses a detail page.
    #[must_use]
    pub fn parse(item_id: &str, html: &str, urls: &CatalogUrls) -> Self {
        let document = Html::parse_document(html);

        let title = document
            .select(&TITLE)
            .find_map(element_text)
            .or_else(|| meta_content(&document, &OG_TITLE));

        let kind_label = document
            .select(&KIND_LABEL)
            .find_map(element_text)
            .or_else(|| meta_content(&document, &KIND_META));

        let mut file_links: Vec<String> = Vec::new();
        for link in document.select(&FILE_LINK) {
            if let Some(url) = link.value().attr("href").and_then(|h| urls.absolutize(h))
                && !file_links.contains(&url)
            {
                file_links.push(url);
            }
        }

        let has_read_button = document.select(&READ_BUTTON).next().is_some();

        Self {
            item_id: item_id.to_string(),
            title,
            kind_label,
            file_links,
            has_read_button,
        }
    }
}
