//! One browser tab over the blog: document context plus background context.
//!
//! ```text
//! Router / MutationQueue -> CacheAgent -> Connectivity -> FetchClient -> origin
//! ```

use shell_client::router::TemplateModules;
use shell_client::{
    AgentConfig, CacheAgent, Connectivity, EventBus, FetchClient, FetchConfig, MutationQueue, NavOutcome, QueueConfig,
    Router, RouterConfig, TokenSource, Transport,
};
use shell_core::{AppConfig, BestEffort, Error, StoreDb};
use std::sync::Arc;

pub struct Shell {
    pub config: AppConfig,
    pub store: StoreDb,
    pub bus: EventBus,
    pub gate: Arc<Connectivity>,
    pub agent: Arc<CacheAgent>,
    pub router: Arc<Router>,
    pub queue: Arc<MutationQueue>,
}

impl Shell {
    /// Open the configured store and talk to the real origin.
    pub async fn open(config: AppConfig) -> Result<Self, Error> {
        let store = StoreDb::open(&config.db_path).await?;
        if let Some(pages) = config.store_quota_pages {
            BestEffort::from_result(store.set_quota_pages(pages).await, "apply store quota");
        }
        let upstream = Arc::new(FetchClient::new(FetchConfig::from_app(&config))?);
        Self::assemble(config, store, upstream)
    }

    /// Wire every component over `upstream`.
    pub fn assemble(config: AppConfig, store: StoreDb, upstream: Arc<dyn Transport>) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let bus = EventBus::new();

        let gate = Arc::new(Connectivity::new(upstream, bus.clone()));
        let agent = Arc::new(CacheAgent::new(AgentConfig::from_app(&config)?, store.clone(), gate.clone()));

        let hooks = TemplateModules::new().on_every(|page| {
            tracing::debug!(url = %page.url, template = ?page.template, "page modules initialised");
        });
        let router = Arc::new(Router::new(
            RouterConfig::from_app(&config)?,
            agent.clone(),
            Arc::new(hooks),
            bus.clone(),
            origin,
        ));

        let tokens: Arc<dyn TokenSource> = router.clone();
        let queue = Arc::new(MutationQueue::new(
            QueueConfig::from_app(&config)?,
            store.clone(),
            agent.clone(),
            tokens,
            bus.clone(),
        ));

        Ok(Self { config, store, bus, gate, agent, router, queue })
    }

    /// Install and activate the agent, load the home page, drain anything left over.
    ///
    /// Every step is best-effort; a failed install leaves the agent passing requests through.
    pub async fn start(&self) {
        match self.agent.install().await {
            Ok(()) => {
                BestEffort::from_result(self.agent.activate().await, "activate cache agent");
            }
            Err(err) => tracing::warn!(error = %err, "cache agent not installed, running uncached"),
        }

        match self.config.origin_url() {
            Ok(home) => {
                BestEffort::from_result(self.router.load(home).await, "initial page load");
            }
            Err(err) => tracing::warn!(error = %err, "no origin to load"),
        }

        BestEffort::from_result(self.queue.drain_on_startup(self.gate.is_online()).await, "startup drain");
    }

    /// Do what the browser does when soft navigation gives up.
    pub async fn follow(&self, outcome: &NavOutcome) -> Option<String> {
        let NavOutcome::FullReload { url, .. } = outcome else {
            return None;
        };
        match self.router.load(url.clone()).await {
            Ok(()) => None,
            Err(err) => Some(err.to_string()),
        }
    }
}
