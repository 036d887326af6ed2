//! Mock catalog site: listing pages, detail pages and PDF payloads.

use std::path::Path;
use std::time::Duration;

use catalog_core::{PipelineConfig, QueryMode};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const COLLECTION: &str = "COLL";
pub const FILES_PATH: &str = "/local/tools/exalead/getFiles.php";

/// Fast settings against `server`, results under `results`.
pub fn test_config(server: &MockServer, results: &Path, chunk_size: usize) -> PipelineConfig {
    let mut config = PipelineConfig::new(COLLECTION, QueryMode::CatalogId);
    config.base_url = server.uri();
    config.results_dir = results.to_path_buf();
    config.chunk_size = chunk_size;
    config.parser_workers = 2;
    config.download_workers = 2;
    config.max_attempts = 3;
    config.retry_base_delay = Duration::from_millis(5);
    config.request_delay = Duration::ZERO;
    config.connect_timeout = Duration::from_secs(2);
    config.read_timeout = Duration::from_secs(5);
    config
}

pub fn listing_html(ids: &[&str]) -> String {
    let cards: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<div class="cards-results__item"><a class="cards-results__link" href="/catalog/{id}">Открыть</a></div>"#
            )
        })
        .collect();
    format!("<html><body><div class=\"cards-results\">{cards}</div></body></html>")
}

/// Detail page for a book with a direct PDF link.
pub fn book_html(id: &str) -> String {
    format!(
        r#"<html><body>
            <h1>Издание {id}</h1>
            <span class="card-type">Книга</span>
            <a href="{FILES_PATH}?book_id={id}&doc_type=pdf">Скачать PDF</a>
        </body></html>"#
    )
}

/// Detail page with nothing to download.
pub fn empty_detail_html(id: &str) -> String {
    format!(
        r#"<html><body><h1>Издание {id}</h1><span class="card-type">Книга</span>
           <p>Доступ к изданию ограничен</p></body></html>"#
    )
}

pub fn pdf_bytes(id: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% payload for {id}\n%%EOF\n").into_bytes()
}

pub fn pdf_response(id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(pdf_bytes(id), "application/pdf")
}

/// Mounts `pages` as the collection listing; the page after the last is empty.
pub async fn mount_listing(server: &MockServer, pages: &[&[&str]]) {
    for (index, ids) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/catalog/{COLLECTION}/")))
            .and(query_param("volumes", format!("page-{}", index + 1)))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(ids)))
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(format!("/catalog/{COLLECTION}/")))
        .and(query_param("volumes", format!("page-{}", pages.len() + 1)))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&[])))
        .mount(server)
        .await;
}

pub async fn mount_detail(server: &MockServer, id: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(format!("/catalog/{id}/")))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;
}

pub async fn mount_pdf(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .and(query_param("book_id", id))
        .respond_with(pdf_response(id))
        .mount(server)
        .await;
}

fn item_id_from_request(request: &Request) -> String {
    request
        .url
        .path()
        .trim_start_matches("/catalog/")
        .trim_end_matches('/')
        .to_string()
}

/// Serves a book detail page for any `/catalog/I<n>/` id.
pub struct BookDetails {
    pub delay: Duration,
}

impl Respond for BookDetails {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = item_id_from_request(request);
        ResponseTemplate::new(200)
            .set_body_string(book_html(&id))
            .set_delay(self.delay)
    }
}

/// Serves a PDF for any `book_id`.
pub struct AnyPdf;

impl Respond for AnyPdf {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "book_id")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        pdf_response(&id)
    }
}

/// Mounts generic detail and PDF responders for ids shaped `I<n>`.
pub async fn mount_generic_items(server: &MockServer, detail_delay: Duration) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/catalog/I\d+/$"))
        .respond_with(BookDetails {
            delay: detail_delay,
        })
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .respond_with(AnyPdf)
        .mount(server)
        .await;
}

/// Requests received so far whose path satisfies `pred`.
pub async fn count_requests(server: &MockServer, pred: impl Fn(&str) -> bool) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| pred(request.url.path()))
        .count()
}

pub fn is_detail_path(path: &str) -> bool {
    path.starts_with("/catalog/") && path != format!("/catalog/{COLLECTION}/")
}

pub fn is_files_path(path: &str) -> bool {
    path == FILES_PATH
}

/// Files in `dir` whose name ends with `.part`.
pub fn partial_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".part"))
                .collect()
        })
        .unwrap_or_default()
}
