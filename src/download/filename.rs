//! File and directory naming for downloaded items and per-query results.
//!
//! Sanitizing is lossy, so any name derived from an id or a query that did not
//! survive sanitizing intact carries a short digest of the original.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Longest slug kept for a query directory name.
const MAX_SLUG_CHARS: usize = 120;

/// Replaces characters that are unsafe in file names with `_`, collapsing
/// runs of separators. Letters in any script are kept.
#[must_use]
pub fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    trimmed.to_string()
}

/// File name for an item: `<sanitized id><extension>`.
///
/// Ids that sanitize to nothing fall back to `item`. Ids changed by
/// sanitizing get a `-<digest>` suffix so `A:1` and `A_1` never share a path.
#[must_use]
pub fn item_filename(item_id: &str, content_type_hint: &str) -> String {
    let stem = sanitize_filename_component(item_id);
    let extension = extension_from_content_type(content_type_hint);
    if stem == item_id {
        return format!("{stem}{extension}");
    }
    let stem = if stem.is_empty() { "item" } else { stem.as_str() };
    format!("{stem}-{}{extension}", short_digest(item_id))
}

/// Directory name for a query's results: a readable slug plus a digest of the
/// mode and the exact query, so distinct queries never share a store.
///
/// Search queries get a `search_` prefix.
#[must_use]
pub fn query_slug(query: &str, is_search: bool) -> String {
    let mut slug: String = sanitize_filename_component(query)
        .chars()
        .take(MAX_SLUG_CHARS)
        .collect();
    if slug.is_empty() {
        slug.push_str("query");
    }
    let (prefix, mode) = if is_search {
        ("search_", "search")
    } else {
        ("", "catalog")
    };
    let digest = short_digest(&format!("{mode}\n{query}"));
    format!("{prefix}{slug}-{digest}")
}

/// First eight hex digits of the SHA-256 of `input`.
fn short_digest(input: &str) -> String {
    Sha256::digest(input.as_bytes())[..4]
        .iter()
        .fold(String::with_capacity(8), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

/// Guess file extension from a Content-Type value.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> &'static str {
    match mime_essence(content_type).as_str() {
        "application/pdf" => ".pdf",
        "image/vnd.djvu" | "image/x-djvu" => ".djvu",
        "application/epub+zip" => ".epub",
        "application/zip" => ".zip",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "text/html" => ".html",
        "text/plain" => ".txt",
        _ => ".bin",
    }
}

/// Returns `true` when `actual` (a response Content-Type) satisfies `hint`.
///
/// Parameters such as `charset` are ignored. `application/octet-stream` is
/// accepted for any binary hint, since some mirrors serve scans that way.
#[must_use]
pub fn content_type_matches(hint: &str, actual: &str) -> bool {
    let hint = mime_essence(hint);
    let actual = mime_essence(actual);
    if hint.is_empty() || hint == actual {
        return true;
    }
    actual == "application/octet-stream" && !hint.starts_with("text/")
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component_replaces_separators() {
        assert_eq!(sanitize_filename_component("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename_component("  spaced   out "), "spaced_out");
    }

    #[test]
    fn test_sanitize_component_keeps_cyrillic() {
        assert_eq!(
            sanitize_filename_component("Война и мир"),
            "Война_и_мир"
        );
    }

    #[test]
    fn test_sanitize_component_blocks_traversal() {
        assert_eq!(sanitize_filename_component("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename_component(".."), "");
    }

    #[test]
    fn test_item_filename_uses_hint_extension() {
        assert_eq!(
            item_filename("000199_000009_003687734", "application/pdf"),
            "000199_000009_003687734.pdf"
        );
        assert_eq!(item_filename("x", "application/unknown"), "x.bin");

        let fallback = item_filename("..", "application/pdf");
        assert!(fallback.starts_with("item-"));
        assert!(fallback.ends_with(".pdf"));
    }

    #[test]
    fn test_item_filename_distinguishes_sanitized_ids() {
        let colon = item_filename("A:1", "application/pdf");
        let underscore = item_filename("A_1", "application/pdf");
        assert_eq!(underscore, "A_1.pdf");
        assert!(colon.starts_with("A_1-"));
        assert_ne!(colon, underscore);
        assert_eq!(colon, item_filename("A:1", "application/pdf"));
    }

    #[test]
    fn test_query_slug_prefixes_search() {
        assert!(query_slug("000200_000018", false).starts_with("000200_000018-"));
        assert!(query_slug("пушкин стихи", true).starts_with("search_пушкин_стихи-"));
        assert!(query_slug("???", false).starts_with("query-"));
    }

    #[test]
    fn test_query_slug_is_stable() {
        assert_eq!(query_slug("COLL", false), query_slug("COLL", false));
        assert_eq!(query_slug("COLL", false).len(), "COLL".len() + 9);
    }

    #[test]
    fn test_query_slug_separates_colliding_queries() {
        assert_ne!(query_slug("search_abc", false), query_slug("abc", true));
        assert_ne!(query_slug("war peace", true), query_slug("war/peace", true));
        assert_ne!(query_slug("COLL", false), query_slug("COLL", true));

        let long = "a".repeat(500);
        let longer = "a".repeat(501);
        assert_ne!(query_slug(&long, false), query_slug(&longer, false));
    }

    #[test]
    fn test_query_slug_truncates_long_queries() {
        let long = "a".repeat(500);
        assert_eq!(query_slug(&long, false).chars().count(), MAX_SLUG_CHARS + 9);
    }

    #[test]
    fn test_content_type_matches() {
        assert!(content_type_matches("application/pdf", "application/pdf"));
        assert!(content_type_matches(
            "application/pdf",
            "Application/PDF; charset=binary"
        ));
        assert!(content_type_matches(
            "application/pdf",
            "application/octet-stream"
        ));
        assert!(!content_type_matches("application/pdf", "text/html; charset=utf-8"));
        assert!(content_type_matches("", "text/html"));
    }
}
