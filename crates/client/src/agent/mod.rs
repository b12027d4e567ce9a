//! Cache-tier agent: the background context answering every same-origin read.
//!
//! ### Lifecycle
//! `Uninstalled -> install() -> Installed -> activate() -> Activated`.
//! Install fetches the precache list and only succeeds if every resource does;
//! activate deletes every tier outside the current version set and starts
//! intercepting immediately.
//!
//! ### Routing
//! See [`policy::classify`]. Network-only paths pass straight through, static
//! assets are stale-while-revalidate, documents are network-first with a
//! cached page, offline page and synthetic response as successive fallbacks.
//!
//! Tier writes and eviction run as background tasks whose failures are
//! recorded as [`IgnoredFailure`]s instead of reaching the requester.

pub mod policy;

pub use policy::{RouteClass, classify};

use crate::fetch::{FetchRequest, FetchResponse, Transport, is_same_origin, strip_fragment};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use shell_core::{AppConfig, BestEffort, Error, StoreDb, TierSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use url::Url;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub origin: Url,
    pub tiers: TierSet,
    /// Paths fetched into the precache tier on install.
    pub precache: Vec<String>,
    pub offline_page: String,
    pub content_cache_max: usize,
}

impl AgentConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            tiers: TierSet::new("markgo", 1),
            precache: vec![
                "/offline".into(),
                "/static/css/main.css".into(),
                "/static/js/app.js".into(),
                "/static/img/favicon.svg".into(),
            ],
            offline_page: "/offline".into(),
            content_cache_max: 50,
        }
    }

    pub fn from_app(app: &AppConfig) -> Result<Self, Error> {
        let origin = app.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self {
            origin,
            tiers: TierSet::new(app.cache_prefix.clone(), app.cache_version),
            precache: app.precache.clone(),
            offline_page: app.offline_page.clone(),
            content_cache_max: app.content_cache_max,
        })
    }

    fn resolve(&self, path: &str) -> Result<Url, Error> {
        self.origin.join(path).map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Uninstalled,
    Installed,
    Activated,
}

/// A background failure that was observed and deliberately ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IgnoredFailure {
    pub operation: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub name: String,
    pub entries: usize,
    pub current: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub phase: AgentPhase,
    pub version: u32,
    pub tiers: Vec<TierStatus>,
    pub ignored_failures: usize,
}

#[derive(Clone, Default)]
struct FailureLog(Arc<Mutex<Vec<IgnoredFailure>>>);

impl FailureLog {
    fn record<T>(&self, operation: &str, result: Result<T, Error>) {
        if let BestEffort::Ignored(err) = BestEffort::from_result(result, operation) {
            lock(&self.0).push(IgnoredFailure { operation: operation.to_string(), error: err.to_string() });
        }
    }
}

pub struct CacheAgent {
    config: AgentConfig,
    store: StoreDb,
    upstream: Arc<dyn Transport>,
    phase: Mutex<AgentPhase>,
    background: Mutex<JoinSet<()>>,
    failures: FailureLog,
}

impl CacheAgent {
    pub fn new(config: AgentConfig, store: StoreDb, upstream: Arc<dyn Transport>) -> Self {
        Self {
            config,
            store,
            upstream,
            phase: Mutex::new(AgentPhase::Uninstalled),
            background: Mutex::new(JoinSet::new()),
            failures: FailureLog::default(),
        }
    }

    pub fn phase(&self) -> AgentPhase {
        *lock(&self.phase)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Populate the precache tier. Nothing is written unless every resource was fetched.
    ///
    /// # Errors
    ///
    /// Returns `Error::InstallFailed` if any precache resource is unreachable or not a success.
    pub async fn install(&self) -> Result<(), Error> {
        let tier = self.config.tiers.precache();
        let mut fetched = Vec::with_capacity(self.config.precache.len());

        for path in &self.config.precache {
            let url = self.config.resolve(path)?;
            let response = self
                .upstream
                .send(FetchRequest::get(url.clone()))
                .await
                .map_err(|e| Error::InstallFailed(format!("{url}: {e}")))?;
            if !response.status.is_success() {
                return Err(Error::InstallFailed(format!("{url} returned {}", response.status)));
            }
            fetched.push(response.to_stored());
        }

        self.store.open_tier(&tier).await?;
        for stored in &fetched {
            if let Err(err) = self.store.put_entry(&tier, stored).await {
                self.failures.record("discard partial precache", self.store.delete_tier(&tier).await);
                return Err(Error::InstallFailed(format!("storing {}: {err}", stored.url)));
            }
        }

        *lock(&self.phase) = AgentPhase::Installed;
        tracing::info!(tier, resources = fetched.len(), "cache agent installed");
        Ok(())
    }

    /// Drop every tier outside the current version set and take control.
    ///
    /// Returns the names of the deleted tiers.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        if self.phase() == AgentPhase::Uninstalled {
            return Err(Error::InstallFailed("activate called before a successful install".into()));
        }

        let mut removed = Vec::new();
        for name in self.store.tier_names().await? {
            if !self.config.tiers.contains(&name) && self.store.delete_tier(&name).await? {
                removed.push(name);
            }
        }

        *lock(&self.phase) = AgentPhase::Activated;
        tracing::info!(version = self.config.tiers.version(), removed = ?removed, "cache agent activated");
        Ok(removed)
    }

    /// Delete the current version's tiers. The agent must be installed again afterwards.
    pub async fn clear(&self) -> Result<Vec<String>, Error> {
        self.settle().await;
        let mut removed = Vec::new();
        for name in self.config.tiers.names() {
            if self.store.delete_tier(&name).await? {
                removed.push(name);
            }
        }
        *lock(&self.phase) = AgentPhase::Uninstalled;
        tracing::info!(removed = ?removed, "cache tiers cleared");
        Ok(removed)
    }

    pub async fn status(&self) -> Result<AgentStatus, Error> {
        let mut tiers = Vec::new();
        for name in self.store.tier_names().await? {
            let entries = self.store.tier_len(&name).await?;
            let current = self.config.tiers.contains(&name);
            tiers.push(TierStatus { name, entries, current });
        }
        Ok(AgentStatus {
            phase: self.phase(),
            version: self.config.tiers.version(),
            tiers,
            ignored_failures: lock(&self.failures.0).len(),
        })
    }

    pub fn ignored_failures(&self) -> Vec<IgnoredFailure> {
        lock(&self.failures.0).clone()
    }

    /// Wait for every background write spawned so far.
    pub async fn settle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *lock(&self.background));
            if tasks.is_empty() {
                return;
            }
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Answer one request.
    pub async fn handle(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        if request.method != Method::GET
            || !is_same_origin(&request.url, &self.config.origin)
            || self.phase() != AgentPhase::Activated
        {
            return self.upstream.send(request).await;
        }

        let request = FetchRequest { url: strip_fragment(&request.url), ..request };
        match classify(request.url.path()) {
            RouteClass::NetworkOnly => {
                tracing::debug!(url = %request.url, "network only");
                self.upstream.send(request).await
            }
            RouteClass::StaleWhileRevalidate => Ok(self.stale_while_revalidate(request).await),
            RouteClass::NetworkFirst => Ok(self.network_first(request).await),
        }
    }

    fn lookup_order(&self) -> Vec<String> {
        let tiers = &self.config.tiers;
        vec![tiers.static_assets(), tiers.pages(), tiers.precache()]
    }

    async fn lookup(&self, url: &Url) -> Option<FetchResponse> {
        let found = match self.store.match_any(&self.lookup_order(), url.as_str()).await {
            Ok(found) => found,
            Err(err) => {
                self.failures.record::<()>("cache lookup", Err(err));
                return None;
            }
        };
        match FetchResponse::from_stored(found?) {
            Ok(response) => Some(response),
            Err(err) => {
                self.failures.record::<()>("decode cached response", Err(err));
                None
            }
        }
    }

    fn spawn_background(&self, work: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = lock(&self.background);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(work);
    }

    fn store_later(&self, tier: String, response: &FetchResponse, trim_to: Option<usize>) {
        let store = self.store.clone();
        let failures = self.failures.clone();
        let stored = response.to_stored();
        self.spawn_background(async move {
            failures.record("store response", store.put_entry(&tier, &stored).await);
            if let Some(max) = trim_to {
                failures.record("trim pages tier", store.trim_tier_fifo(&tier, max).await);
            }
        });
    }

    async fn stale_while_revalidate(&self, request: FetchRequest) -> FetchResponse {
        let url = request.url.clone();
        let tier = self.config.tiers.static_assets();

        if let Some(cached) = self.lookup(&url).await {
            tracing::debug!(%url, "static cache hit, revalidating");
            let upstream = self.upstream.clone();
            let store = self.store.clone();
            let failures = self.failures.clone();
            self.spawn_background(async move {
                let refreshed = async {
                    let response = upstream.send(request).await?;
                    if response.status.is_success() {
                        store.put_entry(&tier, &response.to_stored()).await?;
                    }
                    Ok::<(), Error>(())
                };
                failures.record("revalidate static asset", refreshed.await);
            });
            return cached;
        }

        match self.upstream.send(request).await {
            Ok(response) => {
                if response.status.is_success() {
                    self.store_later(tier, &response, None);
                }
                response
            }
            Err(err) => {
                tracing::debug!(%url, error = %err, "static asset unavailable");
                FetchResponse::synthetic(url, StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
        }
    }

    async fn network_first(&self, request: FetchRequest) -> FetchResponse {
        let url = request.url.clone();

        let err = match self.upstream.send(request).await {
            Ok(response) => {
                if response.status.is_success() && response.is_html() {
                    self.store_later(self.config.tiers.pages(), &response, Some(self.config.content_cache_max));
                }
                return response;
            }
            Err(err) => err,
        };

        if let Some(cached) = self.lookup(&url).await {
            tracing::debug!(%url, error = %err, "network failed, serving cached page");
            return cached;
        }
        if let Ok(offline_url) = self.config.resolve(&self.config.offline_page)
            && let Some(offline) = self.lookup(&offline_url).await
        {
            tracing::debug!(%url, error = %err, "network failed, serving offline page");
            return offline.served_for(url);
        }

        tracing::warn!(%url, error = %err, "network failed with nothing cached");
        FetchResponse::synthetic(url, StatusCode::SERVICE_UNAVAILABLE, "offline")
    }
}

#[async_trait]
impl Transport for CacheAgent {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        self.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ORIGIN: &str = "https://blog.example.com";

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    #[derive(Default)]
    struct Origin {
        offline: AtomicBool,
        routes: Mutex<HashMap<String, (u16, &'static str, Vec<u8>)>>,
        hits: Mutex<Vec<(Method, String)>>,
    }

    impl Origin {
        fn blog() -> Arc<Self> {
            let origin = Self::default();
            origin.set("/offline", 200, "text/html", "<main id=\"main-content\">You are offline</main>");
            origin.set("/static/css/main.css", 200, "text/css", "body{}");
            origin.set("/static/js/app.js", 200, "application/javascript", "init()");
            origin.set("/static/img/favicon.svg", 200, "image/svg+xml", "<svg/>");
            origin.set("/writing", 200, "text/html", "<main id=\"main-content\">Writing</main>");
            origin.set("/writing/my-post", 200, "text/html", "<main id=\"main-content\">My Post</main>");
            origin.set("/admin", 200, "text/html", "<main id=\"main-content\">Admin</main>");
            Arc::new(origin)
        }

        fn set(&self, path: &str, status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) {
            lock(&self.routes).insert(path.to_string(), (status, content_type, body.into()));
        }

        fn go_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn hits(&self, path: &str) -> usize {
            lock(&self.hits).iter().filter(|(_, p)| p == path).count()
        }
    }

    #[async_trait]
    impl Transport for Origin {
        async fn send(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
            lock(&self.hits).push((request.method.clone(), request.url.path().to_string()));
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::Network("unreachable".into()));
            }
            let route = lock(&self.routes).get(request.url.path()).cloned();
            let (status, content_type, body) = route.unwrap_or((404, "text/html", b"not found".to_vec()));
            Ok(FetchResponse {
                final_url: request.url.clone(),
                url: request.url,
                status: StatusCode::from_u16(status).unwrap(),
                content_type: Some(content_type.to_string()),
                bytes: Bytes::from(body),
                headers: HeaderMap::new(),
                fetch_ms: 0,
            })
        }
    }

    async fn active_agent(origin: Arc<Origin>, version: u32, store: StoreDb) -> CacheAgent {
        let mut config = AgentConfig::new(Url::parse(ORIGIN).unwrap());
        config.tiers = TierSet::new("markgo", version);
        let agent = CacheAgent::new(config, store, origin);
        agent.install().await.unwrap();
        agent.activate().await.unwrap();
        agent
    }

    #[tokio::test]
    async fn test_install_populates_precache() {
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(Origin::blog(), 1, store.clone()).await;

        assert_eq!(agent.phase(), AgentPhase::Activated);
        let keys = store.tier_keys("markgo-precache-v1").await.unwrap();
        assert_eq!(
            keys,
            vec![
                url("/offline").to_string(),
                url("/static/css/main.css").to_string(),
                url("/static/js/app.js").to_string(),
                url("/static/img/favicon.svg").to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_install_fails_if_any_resource_missing() {
        let origin = Origin::blog();
        origin.set("/static/js/app.js", 500, "text/plain", "boom");
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = CacheAgent::new(AgentConfig::new(Url::parse(ORIGIN).unwrap()), store.clone(), origin);

        assert!(matches!(agent.install().await, Err(Error::InstallFailed(_))));
        assert_eq!(agent.phase(), AgentPhase::Uninstalled);
        assert!(store.tier_names().await.unwrap().is_empty());
        assert!(agent.activate().await.is_err());
    }

    #[tokio::test]
    async fn test_activating_new_version_drops_old_tiers() {
        let origin = Origin::blog();
        let store = StoreDb::open_in_memory().await.unwrap();
        let v1 = active_agent(origin.clone(), 1, store.clone()).await;
        v1.handle(FetchRequest::get(url("/writing"))).await.unwrap();
        v1.settle().await;
        assert_eq!(store.tier_len("markgo-pages-v1").await.unwrap(), 1);

        let v2 = CacheAgent::new(
            AgentConfig { tiers: TierSet::new("markgo", 2), ..AgentConfig::new(Url::parse(ORIGIN).unwrap()) },
            store.clone(),
            origin,
        );
        v2.install().await.unwrap();
        let removed = v2.activate().await.unwrap();

        assert!(removed.contains(&"markgo-precache-v1".to_string()));
        assert!(removed.contains(&"markgo-pages-v1".to_string()));
        assert_eq!(store.tier_names().await.unwrap(), vec!["markgo-precache-v2".to_string()]);
        assert_eq!(store.tier_len("markgo-precache-v2").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_network_first_caches_and_falls_back() {
        let origin = Origin::blog();
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(origin.clone(), 1, store).await;

        let live = agent.handle(FetchRequest::get(url("/writing/my-post"))).await.unwrap();
        assert!(live.text().contains("My Post"));
        agent.settle().await;

        origin.go_offline(true);
        let cached = agent.handle(FetchRequest::get(url("/writing/my-post"))).await.unwrap();
        assert_eq!(cached.status, StatusCode::OK);
        assert!(cached.text().contains("My Post"));

        let fallback = agent.handle(FetchRequest::get(url("/never-visited"))).await.unwrap();
        assert!(fallback.text().contains("You are offline"));
        assert_eq!(fallback.final_url, url("/never-visited"));
        assert!(!fallback.is_redirected());
    }

    #[tokio::test]
    async fn test_synthetic_offline_without_precache() {
        let origin = Origin::blog();
        let store = StoreDb::open_in_memory().await.unwrap();
        let mut config = AgentConfig::new(Url::parse(ORIGIN).unwrap());
        config.precache = vec!["/static/css/main.css".into()];
        let agent = CacheAgent::new(config, store, origin.clone());
        agent.install().await.unwrap();
        agent.activate().await.unwrap();

        origin.go_offline(true);
        let response = agent.handle(FetchRequest::get(url("/about"))).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text(), "offline");
    }

    #[tokio::test]
    async fn test_error_and_non_html_pages_not_cached() {
        let origin = Origin::blog();
        origin.set("/data", 200, "application/json", "{}");
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(origin, 1, store.clone()).await;

        agent.handle(FetchRequest::get(url("/missing"))).await.unwrap();
        agent.handle(FetchRequest::get(url("/data"))).await.unwrap();
        agent.settle().await;

        assert_eq!(store.tier_len("markgo-pages-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pages_tier_is_bounded_fifo() {
        let origin = Origin::blog();
        for i in 0..3 {
            origin.set(&format!("/p/{i}"), 200, "text/html", format!("<p>{i}</p>"));
        }
        let store = StoreDb::open_in_memory().await.unwrap();
        let mut config = AgentConfig::new(Url::parse(ORIGIN).unwrap());
        config.content_cache_max = 2;
        let agent = CacheAgent::new(config, store.clone(), origin);
        agent.install().await.unwrap();
        agent.activate().await.unwrap();

        for i in 0..3 {
            agent.handle(FetchRequest::get(url(&format!("/p/{i}")))).await.unwrap();
            agent.settle().await;
        }

        let keys = store.tier_keys("markgo-pages-v1").await.unwrap();
        assert_eq!(keys, vec![url("/p/1").to_string(), url("/p/2").to_string()]);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_cached_then_refreshes() {
        let origin = Origin::blog();
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(origin.clone(), 1, store).await;
        origin.set("/static/css/main.css", 200, "text/css", "body{color:red}");

        let first = agent.handle(FetchRequest::get(url("/static/css/main.css"))).await.unwrap();
        assert_eq!(first.text(), "body{}");
        agent.settle().await;

        let second = agent.handle(FetchRequest::get(url("/static/css/main.css"))).await.unwrap();
        assert_eq!(second.text(), "body{color:red}");
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_without_copy() {
        let origin = Origin::blog();
        origin.set("/static/img/logo.png", 200, "image/png", vec![1u8, 2, 3]);
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(origin.clone(), 1, store.clone()).await;

        let fetched = agent.handle(FetchRequest::get(url("/static/img/logo.png"))).await.unwrap();
        assert_eq!(fetched.bytes.as_ref(), &[1u8, 2, 3]);
        agent.settle().await;
        assert_eq!(store.tier_len("markgo-static-v1").await.unwrap(), 1);

        origin.go_offline(true);
        let missing = agent.handle(FetchRequest::get(url("/static/img/other.png"))).await.unwrap();
        assert_eq!(missing.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(missing.text(), "unavailable");

        agent.settle().await;
        let revalidated = agent.handle(FetchRequest::get(url("/static/img/logo.png"))).await.unwrap();
        assert_eq!(revalidated.status, StatusCode::OK);
        agent.settle().await;
        assert!(agent.ignored_failures().iter().any(|f| f.operation == "revalidate static asset"));
    }

    #[tokio::test]
    async fn test_network_only_paths_never_cached() {
        let origin = Origin::blog();
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(origin.clone(), 1, store.clone()).await;

        agent.handle(FetchRequest::get(url("/admin"))).await.unwrap();
        agent.settle().await;
        assert_eq!(store.tier_len("markgo-pages-v1").await.unwrap(), 0);

        origin.go_offline(true);
        let err = agent.handle(FetchRequest::get(url("/admin"))).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_non_get_and_cross_origin_pass_through() {
        let origin = Origin::blog();
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(origin.clone(), 1, store.clone()).await;

        let post = FetchRequest::post_json(url("/writing"), &serde_json::json!({"content": "x"})).unwrap();
        agent.handle(post).await.unwrap();
        let foreign = Url::parse("https://cdn.example.net/writing").unwrap();
        agent.handle(FetchRequest::get(foreign)).await.unwrap();
        agent.settle().await;

        assert_eq!(store.tier_len("markgo-pages-v1").await.unwrap(), 0);
        assert_eq!(origin.hits("/writing"), 2);
    }

    #[tokio::test]
    async fn test_quota_failure_is_ignored_not_fatal() {
        let origin = Origin::blog();
        origin.set("/big", 200, "text/html", vec![b'x'; 256 * 1024]);
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(origin, 1, store.clone()).await;
        store.set_quota_pages(2).await.unwrap();

        let response = agent.handle(FetchRequest::get(url("/big"))).await.unwrap();
        agent.settle().await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.bytes.len(), 256 * 1024);
        let failures = agent.ignored_failures();
        assert!(failures.iter().any(|f| f.operation == "store response" && f.error.starts_with("QUOTA_EXCEEDED")));
        assert_eq!(agent.status().await.unwrap().ignored_failures, failures.len());
    }

    #[tokio::test]
    async fn test_clear_uninstalls() {
        let origin = Origin::blog();
        let store = StoreDb::open_in_memory().await.unwrap();
        let agent = active_agent(origin.clone(), 1, store.clone()).await;

        let removed = agent.clear().await.unwrap();
        assert_eq!(removed, vec!["markgo-precache-v1".to_string()]);
        assert_eq!(agent.phase(), AgentPhase::Uninstalled);

        origin.go_offline(true);
        assert!(agent.handle(FetchRequest::get(url("/writing"))).await.is_err());
    }
}
