//! Proxy list file parsing.
//!
//! Accepted line formats:
//!
//! - `host:port:user:password`
//! - `host:port`
//! - `http://[user:pass@]host:port`, `https://...`, `socks5://...`
//!
//! Blank lines and lines starting with `#` are ignored. Invalid lines are
//! logged and skipped so one typo does not abort a long run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[allow(clippy::expect_used)]
static COLON_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<host>[^:\s/]+):(?P<port>\d{1,5})(?::(?P<user>[^:]*):(?P<pass>.*))?$")
        .expect("proxy line regex is valid") // Static pattern, safe to panic
});

/// Errors raised while reading or parsing a proxy list.
#[derive(Debug, Error)]
pub enum ProxyListError {
    /// The proxy file could not be read.
    #[error("cannot read proxy file {path}: {source}")]
    Read {
        /// File that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A single line did not match any accepted format.
    #[error("line {line_no}: invalid proxy entry '{line}': {reason}")]
    InvalidLine {
        /// 1-based line number.
        line_no: usize,
        /// Offending line, trimmed.
        line: String,
        /// Why the line was rejected.
        reason: String,
    },

    /// The file contained no usable entries.
    #[error("proxy file {path} contains no valid entries\n  Suggestion: use host:port:user:password, host:port or a proxy URL per line")]
    Empty {
        /// File that was read.
        path: PathBuf,
    },
}

/// Proxy protocol understood by the HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    /// Plain HTTP proxy (CONNECT for https targets).
    Http,
    /// TLS connection to the proxy itself.
    Https,
    /// SOCKS5 with remote DNS.
    Socks5,
}

impl ProxyScheme {
    fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5h",
        }
    }
}

/// One egress endpoint from the proxy list.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Proxy protocol.
    pub scheme: ProxyScheme,
    /// Hostname or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Optional `(username, password)`.
    pub credentials: Option<(String, String)>,
}

impl ProxyEndpoint {
    /// URL handed to `reqwest::Proxy::all`, credentials percent-encoded.
    #[must_use]
    pub fn proxy_url(&self) -> String {
        match &self.credentials {
            Some((user, pass)) => format!(
                "{}://{}:{}@{}:{}",
                self.scheme.as_str(),
                urlencoding::encode(user),
                urlencoding::encode(pass),
                self.host,
                self.port
            ),
            None => format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port),
        }
    }
}

/// Displays without credentials; safe for logs and summaries.
impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("has_credentials", &self.credentials.is_some())
            .finish()
    }
}

/// Parses one non-comment proxy line.
///
/// # Errors
///
/// Returns the rejection reason as a string; the caller attaches the line
/// number.
pub fn parse_proxy_line(line: &str) -> Result<ProxyEndpoint, String> {
    let line = line.trim();
    if line.contains("://") {
        return parse_url_form(line);
    }

    let caps = COLON_FORM
        .captures(line)
        .ok_or_else(|| "expected host:port or host:port:user:password".to_string())?;
    let port = parse_port(&caps["port"])?;
    let credentials = match (caps.name("user"), caps.name("pass")) {
        (Some(user), Some(pass)) if !user.as_str().is_empty() => {
            Some((user.as_str().to_string(), pass.as_str().to_string()))
        }
        (Some(_), Some(_)) => return Err("empty proxy username".to_string()),
        _ => None,
    };

    Ok(ProxyEndpoint {
        scheme: ProxyScheme::Http,
        host: caps["host"].to_string(),
        port,
        credentials,
    })
}

fn parse_url_form(line: &str) -> Result<ProxyEndpoint, String> {
    let url = Url::parse(line).map_err(|e| e.to_string())?;
    let scheme = match url.scheme() {
        "http" => ProxyScheme::Http,
        "https" => ProxyScheme::Https,
        "socks5" | "socks5h" => ProxyScheme::Socks5,
        other => return Err(format!("unsupported proxy scheme '{other}'")),
    };
    let host = url
        .host_str()
        .ok_or_else(|| "proxy URL has no host".to_string())?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| "proxy URL has no port".to_string())?;
    let credentials = if url.username().is_empty() {
        None
    } else {
        let user = urlencoding::decode(url.username())
            .map_err(|e| e.to_string())?
            .into_owned();
        let pass = urlencoding::decode(url.password().unwrap_or_default())
            .map_err(|e| e.to_string())?
            .into_owned();
        Some((user, pass))
    };

    Ok(ProxyEndpoint {
        scheme,
        host,
        port,
        credentials,
    })
}

fn parse_port(raw: &str) -> Result<u16, String> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port '{raw}'")),
        Ok(port) => Ok(port),
    }
}

/// Parses a whole proxy list, returning valid endpoints and per-line errors.
#[must_use]
pub fn parse_proxy_list(content: &str) -> (Vec<ProxyEndpoint>, Vec<ProxyListError>) {
    let mut endpoints = Vec::new();
    let mut errors = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_proxy_line(line) {
            Ok(endpoint) => {
                if endpoints.contains(&endpoint) {
                    debug!(line_no = idx + 1, proxy = %endpoint, "duplicate proxy entry skipped");
                } else {
                    endpoints.push(endpoint);
                }
            }
            Err(reason) => errors.push(ProxyListError::InvalidLine {
                line_no: idx + 1,
                line: line.to_string(),
                reason,
            }),
        }
    }

    (endpoints, errors)
}

/// Reads and parses the proxy file at `path`. Invalid lines are logged.
///
/// # Errors
///
/// Returns [`ProxyListError::Read`] if the file cannot be read, or
/// [`ProxyListError::Empty`] if no line is usable.
pub fn load_proxy_file(path: &Path) -> Result<Vec<ProxyEndpoint>, ProxyListError> {
    let content = std::fs::read_to_string(path).map_err(|source| ProxyListError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let (endpoints, errors) = parse_proxy_list(&content);
    for error in &errors {
        warn!(error = %error, "skipping proxy entry");
    }
    if endpoints.is_empty() {
        return Err(ProxyListError::Empty {
            path: path.to_path_buf(),
        });
    }
    debug!(count = endpoints.len(), path = %path.display(), "proxy list loaded");
    Ok(endpoints)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port_user_password() {
        let endpoint = parse_proxy_line("10.0.0.1:8080:alice:s3cr:et").unwrap();
        assert_eq!(endpoint.host, "10.0.0.1");
        assert_eq!(endpoint.port, 8080);
        assert_eq!(
            endpoint.credentials,
            Some(("alice".to_string(), "s3cr:et".to_string()))
        );
        assert_eq!(endpoint.scheme, ProxyScheme::Http);
    }

    #[test]
    fn test_parse_host_port_only() {
        let endpoint = parse_proxy_line("proxy.local:3128").unwrap();
        assert_eq!(endpoint.credentials, None);
        assert_eq!(endpoint.proxy_url(), "http://proxy.local:3128");
    }

    #[test]
    fn test_parse_url_forms() {
        let http = parse_proxy_line("http://bob:pw@1.2.3.4:8000").unwrap();
        assert_eq!(http.credentials, Some(("bob".to_string(), "pw".to_string())));

        let socks = parse_proxy_line("socks5://5.6.7.8:1080").unwrap();
        assert_eq!(socks.scheme, ProxyScheme::Socks5);
        assert_eq!(socks.proxy_url(), "socks5h://5.6.7.8:1080");
    }

    #[test]
    fn test_proxy_url_encodes_credentials() {
        let endpoint = parse_proxy_line("h:1:us er:p@ss").unwrap();
        assert_eq!(endpoint.proxy_url(), "http://us%20er:p%40ss@h:1");
    }

    #[test]
    fn test_display_hides_credentials() {
        let endpoint = parse_proxy_line("h:1:user:secret").unwrap();
        assert_eq!(endpoint.to_string(), "h:1");
        assert!(!format!("{endpoint:?}").contains("secret"));
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(parse_proxy_line("no-port").is_err());
        assert!(parse_proxy_line("host:0").is_err());
        assert!(parse_proxy_line("host:99999").is_err());
        assert!(parse_proxy_line("ftp://host:21").is_err());
        assert!(parse_proxy_line("host:80::pw").is_err());
    }

    #[test]
    fn test_parse_proxy_list_skips_comments_and_collects_errors() {
        let content = "# pool\n\n1.1.1.1:80\nbroken\n2.2.2.2:81:u:p\n1.1.1.1:80\n";
        let (endpoints, errors) = parse_proxy_list(content);

        assert_eq!(endpoints.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("line 4"));
    }

    #[test]
    fn test_load_proxy_file_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        std::fs::write(&path, "# nothing here\n").unwrap();

        let err = load_proxy_file(&path).unwrap_err();
        assert!(matches!(err, ProxyListError::Empty { .. }));
    }

    #[test]
    fn test_load_proxy_file_missing_is_read_error() {
        let err = load_proxy_file(Path::new("/nonexistent/proxies.txt")).unwrap_err();
        assert!(matches!(err, ProxyListError::Read { .. }));
    }
}
