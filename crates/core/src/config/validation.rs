//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` is not an http(s) URL without a path
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `cache_version`, `content_cache_max` or `prefetch_max` is 0
    /// - a precache path or `offline_page` does not start with `/`
    ///
    /// Returns `ConfigError::Missing` if `offline_page` is not part of `precache`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = self.origin_url()?;
        if origin.scheme() != "http" && origin.scheme() != "https" {
            return Err(invalid("origin", "scheme must be http or https"));
        }
        if origin.path() != "/" || origin.query().is_some() {
            return Err(invalid("origin", "must not carry a path or query"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.cache_prefix.is_empty() {
            return Err(invalid("cache_prefix", "must not be empty"));
        }
        if self.cache_version == 0 {
            return Err(invalid("cache_version", "must be greater than 0"));
        }
        if self.content_cache_max == 0 {
            return Err(invalid("content_cache_max", "must be greater than 0"));
        }
        if self.prefetch_max == 0 {
            return Err(invalid("prefetch_max", "must be greater than 0"));
        }

        if let Some(path) = self.precache.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid {
                field: "precache".into(),
                reason: format!("{path} must start with '/'"),
            });
        }
        if !self.offline_page.starts_with('/') {
            return Err(invalid("offline_page", "must start with '/'"));
        }
        if !self.precache.contains(&self.offline_page) {
            return Err(ConfigError::Missing {
                field: "precache".into(),
                hint: format!("add {} so it is available offline", self.offline_page),
            });
        }

        if !self.compose_endpoint.starts_with('/') {
            return Err(invalid("compose_endpoint", "must start with '/'"));
        }
        if self.csrf_header.is_empty() {
            return Err(invalid("csrf_header", "must not be empty"));
        }

        if self.prefetch_ttl_ms < self.prefetch_debounce_ms {
            tracing::warn!(
                prefetch_ttl_ms = self.prefetch_ttl_ms,
                prefetch_debounce_ms = self.prefetch_debounce_ms,
                "prefetch TTL is shorter than the hover debounce; prefetched pages will rarely be used"
            );
        }

        Ok(())
    }
}
