//! URL helpers shared by link interception and cache keying.

/// Error type for link resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Resolve an `href` the way a browser does for an anchor on `base`.
///
/// Resolution steps:
/// 1. Trim leading/trailing whitespace
/// 2. Join against the base (relative, root-relative, protocol-relative or absolute)
/// 3. Accept only http/https results (`mailto:`, `javascript:` are rejected)
pub fn resolve_href(base: &url::Url, href: &str) -> Result<url::Url, UrlError> {
    let trimmed = href.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let resolved = base.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match resolved.scheme() {
        "http" | "https" => Ok(resolved),
        scheme => Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }
}

/// Scheme, host and port all match.
pub fn is_same_origin(a: &url::Url, b: &url::Url) -> bool {
    a.origin() == b.origin()
}

/// Copy of `url` without its fragment; the form used for cache and prefetch keys.
pub fn strip_fragment(url: &url::Url) -> url::Url {
    let mut stripped = url.clone();
    stripped.set_fragment(None);
    stripped
}
