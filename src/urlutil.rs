// ABOUTME: Shared URL resolution turning relative/protocol-relative hrefs into absolute URLs.
// ABOUTME: Used by every backend that extracts href/src-like attributes.

use url::Url;

/// Resolve an extracted href against a base URL.
///
/// - Absolute http(s) URLs pass through unchanged.
/// - `//host/path` gets `https:` prepended.
/// - `/path` roots against the scheme+host of the base.
/// - Anything else is joined against the base with the last path segment
///   (after the final `/`) stripped.
///
/// Resolution never fails: an unparseable base or join falls back to the
/// href as given.
pub fn resolve(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    let base_url = match Url::parse(base) {
        Ok(u) => u,
        Err(_) => return href.to_string(),
    };
    match base_url.join(href) {
        Ok(u) => u.to_string(),
        Err(_) => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.example.com/book/123/index.html";

    #[test]
    fn test_absolute_passes_through() {
        assert_eq!(
            resolve(BASE, "https://other.com/a"),
            "https://other.com/a"
        );
        assert_eq!(resolve(BASE, "http://other.com/a"), "http://other.com/a");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let once = resolve(BASE, "/chapter/1");
        let twice = resolve(BASE, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_protocol_relative_gets_https() {
        assert_eq!(
            resolve(BASE, "//cdn.example.com/cover.jpg"),
            "https://cdn.example.com/cover.jpg"
        );
    }

    #[test]
    fn test_root_relative_uses_scheme_and_host() {
        assert_eq!(
            resolve(BASE, "/chapter/1.html"),
            "https://www.example.com/chapter/1.html"
        );
    }

    #[test]
    fn test_relative_strips_last_segment() {
        assert_eq!(
            resolve(BASE, "2.html"),
            "https://www.example.com/book/123/2.html"
        );
    }

    #[test]
    fn test_empty_href() {
        assert_eq!(resolve(BASE, ""), "");
        assert_eq!(resolve(BASE, "   "), "");
    }

    #[test]
    fn test_unparseable_base_returns_href() {
        assert_eq!(resolve("not a url", "page.html"), "page.html");
    }
}
