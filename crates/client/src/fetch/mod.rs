//! HTTP transport seam and the reqwest-backed client.
//!
//! Every component talks to the network through [`Transport`]. The router's
//! transport is normally the cache agent, whose own upstream is the
//! connectivity gate wrapping [`FetchClient`]:
//!
//! ```text
//! Router / MutationQueue -> CacheAgent -> Connectivity -> FetchClient -> origin
//! ```
//!
//! ### Semantics
//! - A response with any status is `Ok`; callers decide what a 4xx/5xx means.
//! - `Err` is reserved for transport-class failures (unreachable, offline,
//!   body over the byte limit) and invalid requests.
//! - Redirects are followed; `final_url` records where the body came from.

pub mod gate;
pub mod url;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use shell_core::{AppConfig, Error, StoredResponse};
use std::time::{Duration, Instant};

pub use gate::Connectivity;
pub use self::url::{UrlError, is_same_origin, resolve_href, strip_fragment};

use ::url::Url;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Anything that can answer an HTTP request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, Error>;
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self { method: Method::GET, url, headers: HeaderMap::new(), body: None }
    }

    /// POST with a JSON body.
    pub fn post_json<T: serde::Serialize>(url: Url, body: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(body).map_err(|e| Error::InvalidInput(format!("unserializable body: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self { method: Method::POST, url, headers, body: Some(Bytes::from(json)) })
    }

    /// Add a header, rejecting names or values that are not valid HTTP.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, Error> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| Error::InvalidInput(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The original URL requested
    pub url: Url,
    /// The final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
    /// Response headers
    pub headers: HeaderMap,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

impl FetchResponse {
    /// A locally generated response that never touched the network.
    pub fn synthetic(url: Url, status: StatusCode, body: &'static str) -> Self {
        Self {
            final_url: url.clone(),
            url,
            status,
            content_type: Some("text/plain; charset=utf-8".into()),
            bytes: Bytes::from_static(body.as_bytes()),
            headers: HeaderMap::new(),
            fetch_ms: 0,
        }
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
    }

    pub fn is_redirected(&self) -> bool {
        self.url != self.final_url
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// The same body answering a different request, as a fallback rather than a redirect.
    pub fn served_for(mut self, url: Url) -> Self {
        self.final_url = url.clone();
        self.url = url;
        self
    }

    /// Convert into the stored form, keyed on the request URL.
    pub fn to_stored(&self) -> StoredResponse {
        let mut stored = StoredResponse::new(
            self.url.as_str(),
            self.status.as_u16(),
            self.content_type.clone(),
            self.bytes.to_vec(),
        );
        stored.headers = self
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        if self.is_redirected() {
            stored.final_url = Some(self.final_url.to_string());
        }
        stored
    }

    /// Rebuild a response from a cache tier entry.
    pub fn from_stored(stored: StoredResponse) -> Result<Self, Error> {
        let url = Url::parse(&stored.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let status =
            StatusCode::from_u16(stored.status_code).map_err(|e| Error::InvalidInput(format!("stored status: {e}")))?;
        let mut headers = HeaderMap::new();
        for (name, value) in &stored.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                headers.append(name, value);
            }
        }
        let final_url = match stored.final_url.as_deref() {
            Some(target) => Url::parse(target).map_err(|e| Error::InvalidUrl(e.to_string()))?,
            None => url.clone(),
        };
        Ok(Self {
            url,
            final_url,
            status,
            content_type: stored.content_type,
            bytes: Bytes::from(stored.body),
            headers,
            fetch_ms: 0,
        })
    }
}

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "markgo-shell/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "markgo-shell/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl FetchConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self { user_agent: app.user_agent.clone(), max_bytes: app.max_bytes, timeout: app.timeout(), ..Default::default() }
    }
}

/// HTTP client backed by reqwest.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Perform one request, returning raw bytes and metadata.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let url = request.url.clone();

        let mut builder = self.http.request(request.method.clone(), url.as_str());
        if request.method == Method::GET && !request.headers.contains_key(header::ACCEPT) {
            builder = builder.header(header::ACCEPT, ACCEPT_HTML);
        }
        builder = builder.headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {}: {}", request.method, url, e)))?;

        let status = response.status();
        if let Some(len) = response.content_length() {
            self.check_size(len as usize)?;
        }

        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("{} {}: reading body: {}", request.method, url, e)))?;
        self.check_size(bytes.len())?;

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(%url, %final_url, status = status.as_u16(), fetch_ms, bytes = bytes.len(), "fetched");
        Ok(FetchResponse { url, final_url, status, content_type, bytes, headers, fetch_ms })
    }

    fn check_size(&self, len: usize) -> Result<(), Error> {
        if len > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }
        Ok(())
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for FetchClient {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        self.fetch(request).await
    }
}
