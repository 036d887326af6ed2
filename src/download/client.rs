//! HTTP client construction, page fetches and atomic payload publishing.
//!
//! Payloads are streamed to `<final>.part` and renamed into place only after
//! the byte count checks out, so the final path only ever holds a complete
//! file. Any failure removes the partial file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Proxy, Response};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::error::FetchError;
use super::filename::content_type_matches;
use crate::proxy::ProxyEndpoint;
use crate::user_agent;

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP read timeout (per read, so large scans still stream).
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Suffix appended to the final path while a payload is being written.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Timeouts applied to every client the pool builds.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Maximum idle time between reads.
    pub read_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

/// Builds a client routed through `proxy`, or a direct client that ignores
/// environment proxy variables when `proxy` is `None`.
///
/// # Errors
///
/// Returns the reqwest error if the proxy URL is rejected or the TLS backend
/// cannot be initialised.
pub fn build_client(
    proxy: Option<&ProxyEndpoint>,
    settings: &ClientSettings,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.read_timeout)
        .gzip(true)
        .cookie_store(true)
        .user_agent(user_agent::random_browser_user_agent());
    builder = match proxy {
        Some(endpoint) => builder.proxy(Proxy::all(endpoint.proxy_url())?),
        None => builder.no_proxy(),
    };
    builder.build()
}

/// Turns a non-2xx response into [`FetchError::HttpStatus`], carrying any
/// Retry-After header.
///
/// # Errors
///
/// Returns [`FetchError::HttpStatus`] for non-success statuses.
pub fn check_status(response: Response, url: &str) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Err(FetchError::http_status_with_retry_after(
        url,
        status.as_u16(),
        retry_after,
    ))
}

/// GETs `url` and returns the body as text.
///
/// # Errors
///
/// Returns [`FetchError`] for transport failures and non-2xx statuses.
#[instrument(skip(client))]
pub async fn fetch_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::network(url, e))?;
    let response = check_status(response, url)?;
    response.text().await.map_err(|e| FetchError::network(url, e))
}

/// Result of a published payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFile {
    /// Final path of the payload.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
}

/// GETs `url`, checks status and content type against `content_type_hint`,
/// and publishes the body at `final_path`.
///
/// # Errors
///
/// Returns [`FetchError`] for transport failures, non-2xx statuses, content
/// type mismatches, empty or short bodies and file system errors.
#[instrument(skip(client, final_path), fields(path = %final_path.display()))]
pub async fn download_to_path(
    client: &Client,
    url: &str,
    final_path: &Path,
    content_type_hint: &str,
) -> Result<PublishedFile, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::network(url, e))?;
    let response = check_status(response, url)?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type_matches(content_type_hint, &content_type) {
        return Err(FetchError::unexpected_content(
            url,
            content_type_hint,
            content_type,
        ));
    }

    let expected_len = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| FetchError::network(url, e)));
    let bytes = stream_to_path(stream, url, final_path, expected_len).await?;

    Ok(PublishedFile {
        path: final_path.to_path_buf(),
        bytes,
    })
}

/// `<final>.part` alongside the final path.
#[must_use]
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = OsString::from(final_path.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Streams `stream` into `<final>.part`, verifies it, then renames it to
/// `final_path`. The partial file is removed on every error path.
///
/// # Errors
///
/// Returns the stream's own error, [`FetchError::Io`] for file system
/// failures, [`FetchError::EmptyBody`] for zero bytes, or
/// [`FetchError::Integrity`] when `expected_len` is declared and differs.
pub async fn stream_to_path<S, B>(
    stream: S,
    url: &str,
    final_path: &Path,
    expected_len: Option<u64>,
) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<B, FetchError>>,
    B: AsRef<[u8]>,
{
    let part = partial_path(final_path);
    let result = write_partial(stream, url, &part, expected_len).await;

    match result {
        Ok(bytes) => {
            if let Err(e) = tokio::fs::rename(&part, final_path).await {
                remove_partial(&part).await;
                return Err(FetchError::io(final_path, e));
            }
            debug!(bytes, "payload published");
            Ok(bytes)
        }
        Err(e) => {
            remove_partial(&part).await;
            Err(e)
        }
    }
}

async fn write_partial<S, B>(
    stream: S,
    url: &str,
    part: &Path,
    expected_len: Option<u64>,
) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<B, FetchError>>,
    B: AsRef<[u8]>,
{
    let file = File::create(part)
        .await
        .map_err(|e| FetchError::io(part, e))?;
    let mut writer = BufWriter::new(file);
    let mut bytes_written: u64 = 0;

    futures_util::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let chunk = chunk.as_ref();
        writer
            .write_all(chunk)
            .await
            .map_err(|e| FetchError::io(part, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| FetchError::io(part, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| FetchError::io(part, e))?;

    if bytes_written == 0 {
        return Err(FetchError::EmptyBody {
            url: url.to_string(),
        });
    }
    if let Some(expected) = expected_len
        && expected != bytes_written
    {
        return Err(FetchError::integrity(part, expected, bytes_written));
    }
    Ok(bytes_written)
}

async fn remove_partial(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => debug!(path = %part.display(), "removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %part.display(), error = %e, "could not remove partial file"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::stream;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<&'static [u8], FetchError>> {
        stream::iter(parts.iter().copied().map(Ok).collect::<Vec<_>>())
    }

    // ==================== Publish Tests ====================

    #[tokio::test]
    async fn test_stream_to_path_publishes_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("A.pdf");

        let bytes = stream_to_path(chunks(&[b"%PDF", b"-1.4"]), "u", &final_path, Some(8))
            .await
            .unwrap();

        assert_eq!(bytes, 8);
        assert_eq!(std::fs::read(&final_path).unwrap(), b"%PDF-1.4");
        assert!(!partial_path(&final_path).exists());
    }

    #[tokio::test]
    async fn test_interrupted_stream_leaves_no_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("A.pdf");
        let broken = stream::iter(vec![
            Ok(&b"%PDF"[..]),
            Err(FetchError::timeout("u")),
        ]);

        let err = stream_to_path(broken, "u", &final_path, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout { .. }));
        assert!(!final_path.exists());
        assert!(!partial_path(&final_path).exists());
    }

    #[tokio::test]
    async fn test_short_body_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("A.pdf");

        let err = stream_to_path(chunks(&[b"%PDF"]), "u", &final_path, Some(100))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Integrity {
                expected_bytes: 100,
                actual_bytes: 4,
                ..
            }
        ));
        assert!(!final_path.exists());
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("A.pdf");

        let err = stream_to_path(chunks(&[]), "u", &final_path, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::EmptyBody { .. }));
        assert!(!final_path.exists());
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/A.pdf")),
            PathBuf::from("/tmp/A.pdf.part")
        );
    }

    // ==================== HTTP Tests ====================

    #[tokio::test]
    async fn test_download_to_path_rejects_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>captcha</html>"),
            )
            .mount(&server)
            .await;
        let client = build_client(None, &ClientSettings::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("A.pdf");

        let err = download_to_path(
            &client,
            &format!("{}/file", server.uri()),
            &final_path,
            "application/pdf",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::UnexpectedContent { .. }));
        assert!(!final_path.exists());
    }

    #[tokio::test]
    async fn test_download_to_path_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.7 body".to_vec()),
            )
            .mount(&server)
            .await;
        let client = build_client(None, &ClientSettings::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("A.pdf");

        let published = download_to_path(
            &client,
            &format!("{}/file", server.uri()),
            &final_path,
            "application/pdf",
        )
        .await
        .unwrap();

        assert_eq!(published.bytes, 13);
        assert_eq!(std::fs::read(&final_path).unwrap(), b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn test_fetch_text_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;
        let client = build_client(None, &ClientSettings::default()).unwrap();

        let err = fetch_text(&client, &server.uri()).await.unwrap_err();

        match err {
            FetchError::HttpStatus {
                status,
                retry_after,
                ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after.as_deref(), Some("7"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
