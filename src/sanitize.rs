use url::Url;

/// Returns the identifier when every character is ASCII alphanumeric, `_`, or `-`.
///
/// Anything else (including the empty string) is treated as absent.
pub fn sanitize_identifier(raw: &str) -> Option<&str> {
    if raw.is_empty() {
        return None;
    }
    raw.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        .then_some(raw)
}

/// Resolves `raw` against `base` and returns the absolute URL if it is http(s).
///
/// `base` is normally the origin of the page that received the query string.
/// An unparsable base only matters for relative input; absolute URLs are
/// accepted without one.
pub fn sanitize_url(raw: &str, base: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok();
    let parsed = Url::options().base_url(base.as_ref()).parse(raw).ok()?;
    is_http_url(&parsed).then(|| parsed.to_string())
}

pub fn is_http_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
