//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (MARKGO_SHELL_*)
//! 2. TOML config file (if MARKGO_SHELL_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (MARKGO_SHELL_*)
/// 2. TOML config file (if MARKGO_SHELL_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Origin of the blog, e.g. `https://blog.example.com`.
    ///
    /// Set via MARKGO_SHELL_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Path to the SQLite store holding cache tiers and queued mutations.
    ///
    /// Set via MARKGO_SHELL_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix shared by every cache tier name.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Cache tier version. Bumping it discards every tier of older versions on activation.
    ///
    /// Set via MARKGO_SHELL_CACHE_VERSION environment variable.
    #[serde(default = "default_cache_version")]
    pub cache_version: u32,

    /// Maximum number of entries in the content-page tier.
    #[serde(default = "default_content_cache_max")]
    pub content_cache_max: usize,

    /// Resources fetched into the precache tier on install.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Path of the offline fallback page. Must be part of `precache`.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,

    /// Maximum live prefetch entries.
    #[serde(default = "default_prefetch_max")]
    pub prefetch_max: usize,

    /// Prefetch entry time-to-live in milliseconds.
    #[serde(default = "default_prefetch_ttl_ms")]
    pub prefetch_ttl_ms: u64,

    /// Hover debounce before a prefetch fires, in milliseconds.
    #[serde(default = "default_prefetch_debounce_ms")]
    pub prefetch_debounce_ms: u64,

    /// Fade-out duration before a content swap, in milliseconds.
    #[serde(default = "default_fade_ms")]
    pub fade_out_ms: u64,

    /// Fade-in duration after a content swap, in milliseconds.
    #[serde(default = "default_fade_ms")]
    pub fade_in_ms: u64,

    /// CSS selector of the swappable content region.
    #[serde(default = "default_content_selector")]
    pub content_selector: String,

    /// Path of the content-creation endpoint.
    #[serde(default = "default_compose_endpoint")]
    pub compose_endpoint: String,

    /// Header carrying the CSRF token on replayed submissions.
    #[serde(default = "default_csrf_header")]
    pub csrf_header: String,

    /// How long a drain lease is held before another context may take it over.
    #[serde(default = "default_drain_lease_ms")]
    pub drain_lease_ms: u64,

    /// Optional page cap on the store, emulating a browser storage quota.
    #[serde(default)]
    pub store_quota_pages: Option<u32>,
}

fn default_origin() -> String {
    "http://localhost:3000".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./markgo-shell.sqlite")
}

fn default_user_agent() -> String {
    "markgo-shell/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_cache_prefix() -> String {
    "markgo".into()
}

fn default_cache_version() -> u32 {
    1
}

fn default_content_cache_max() -> usize {
    50
}

fn default_precache() -> Vec<String> {
    vec![
        "/offline".into(),
        "/static/css/main.css".into(),
        "/static/js/app.js".into(),
        "/static/img/favicon.svg".into(),
    ]
}

fn default_offline_page() -> String {
    "/offline".into()
}

fn default_prefetch_max() -> usize {
    5
}

fn default_prefetch_ttl_ms() -> u64 {
    30_000
}

fn default_prefetch_debounce_ms() -> u64 {
    65
}

fn default_fade_ms() -> u64 {
    150
}

fn default_content_selector() -> String {
    "#main-content".into()
}

fn default_compose_endpoint() -> String {
    "/compose/quick".into()
}

fn default_csrf_header() -> String {
    "X-CSRF-Token".into()
}

fn default_drain_lease_ms() -> u64 {
    60_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            cache_prefix: default_cache_prefix(),
            cache_version: default_cache_version(),
            content_cache_max: default_content_cache_max(),
            precache: default_precache(),
            offline_page: default_offline_page(),
            prefetch_max: default_prefetch_max(),
            prefetch_ttl_ms: default_prefetch_ttl_ms(),
            prefetch_debounce_ms: default_prefetch_debounce_ms(),
            fade_out_ms: default_fade_ms(),
            fade_in_ms: default_fade_ms(),
            content_selector: default_content_selector(),
            compose_endpoint: default_compose_endpoint(),
            csrf_header: default_csrf_header(),
            drain_lease_ms: default_drain_lease_ms(),
            store_quota_pages: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parsed site origin.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `origin` is not an absolute http(s) URL.
    pub fn origin_url(&self) -> Result<url::Url, ConfigError> {
        url::Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `MARKGO_SHELL_`
    /// 2. TOML file from `MARKGO_SHELL_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("MARKGO_SHELL_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("MARKGO_SHELL_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
