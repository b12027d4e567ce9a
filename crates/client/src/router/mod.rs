//! Soft navigation: intercept same-origin link activations, fetch the target
//! page, swap its content region into the live page and keep history and
//! scroll behaving as they would for a normal page load.
//!
//! ### One navigation at a time
//! Every navigation takes a fresh [`CancellationToken`] and bumps a generation
//! counter; starting a new one cancels the previous token. A superseded
//! navigation re-checks the generation under the state lock before touching the
//! page, so it can never apply its swap after a newer one started.
//!
//! ### Full-load fallback
//! Any failure (transport error, non-2xx, missing content region) resolves to
//! [`NavOutcome::FullReload`] and a [`Signal::FullNavigation`]; the host answers
//! it with [`Router::load`], which shows whatever the origin (or the cache
//! agent in front of it) returns.

pub mod history;
pub mod intercept;
pub mod page;
pub mod prefetch;

pub use history::{History, HistoryEntry};
pub use intercept::{BypassRules, Intercept, LinkActivation, Modifiers, MouseButton, SkipReason, evaluate};
pub use page::{LivePage, NoHooks, PageHooks, TemplateModules, active_links};
pub use prefetch::{PrefetchCache, PrefetchEntry, Prefetcher};

use crate::events::{EventBus, Signal};
use crate::extract::{PageSelectors, parse_page};
use crate::fetch::{FetchRequest, FetchResponse, Transport, resolve_href, strip_fragment};
use shell_core::{AppConfig, Error};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub selectors: PageSelectors,
    pub bypass: BypassRules,
    pub prefetch_max: usize,
    pub prefetch_ttl: Duration,
    pub prefetch_debounce: Duration,
    pub fade_out: Duration,
    pub fade_in: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            selectors: PageSelectors::default(),
            bypass: BypassRules::default(),
            prefetch_max: 5,
            prefetch_ttl: Duration::from_secs(30),
            prefetch_debounce: Duration::from_millis(65),
            fade_out: Duration::from_millis(150),
            fade_in: Duration::from_millis(150),
        }
    }
}

impl RouterConfig {
    pub fn from_app(app: &AppConfig) -> Result<Self, Error> {
        Ok(Self {
            selectors: PageSelectors::new(&app.content_selector)?,
            bypass: BypassRules::default(),
            prefetch_max: app.prefetch_max,
            prefetch_ttl: Duration::from_millis(app.prefetch_ttl_ms),
            prefetch_debounce: Duration::from_millis(app.prefetch_debounce_ms),
            fade_out: Duration::from_millis(app.fade_out_ms),
            fade_in: Duration::from_millis(app.fade_in_ms),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavPhase {
    Idle,
    Navigating,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    /// Content for `url` (the final URL after redirects) is now live.
    Swapped { url: Url },
    /// Soft navigation gave up; the host must fully load `url`.
    FullReload { url: Url, reason: String },
    /// A newer navigation (or an explicit cancel) superseded this one.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Intercepted(NavOutcome),
    NotIntercepted(SkipReason),
}

#[derive(Debug, Clone, Copy)]
enum Departure {
    Push,
    Replay { scroll_y: f64 },
}

struct RouterState {
    page: LivePage,
    history: History,
    loaded: bool,
    phase: NavPhase,
    generation: u64,
    token: CancellationToken,
}

pub struct Router {
    config: RouterConfig,
    transport: Arc<dyn Transport>,
    prefetcher: Arc<Prefetcher>,
    hooks: Arc<dyn PageHooks>,
    bus: EventBus,
    state: Mutex<RouterState>,
}

impl Router {
    /// Router for a tab sitting at `start`; nothing is fetched until [`Router::load`].
    pub fn new(
        config: RouterConfig, transport: Arc<dyn Transport>, hooks: Arc<dyn PageHooks>, bus: EventBus, start: Url,
    ) -> Self {
        let cache = Arc::new(PrefetchCache::new(config.prefetch_max, config.prefetch_ttl));
        let prefetcher = Arc::new(Prefetcher::new(cache, transport.clone(), config.prefetch_debounce));
        let state = RouterState {
            page: LivePage::blank(start.clone()),
            history: History::new(start),
            loaded: false,
            phase: NavPhase::Idle,
            generation: 0,
            token: CancellationToken::new(),
        };
        Self { config, transport, prefetcher, hooks, bus, state: Mutex::new(state) }
    }

    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn page(&self) -> LivePage {
        self.state().page.clone()
    }

    pub fn current_url(&self) -> Url {
        self.state().page.url.clone()
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.state().page.csrf_token.clone()
    }

    pub fn phase(&self) -> NavPhase {
        self.state().phase
    }

    pub fn history(&self) -> History {
        self.state().history.clone()
    }

    pub fn prefetcher(&self) -> &Arc<Prefetcher> {
        &self.prefetcher
    }

    pub fn set_scroll(&self, scroll_y: f64) {
        self.state().page.scroll_y = scroll_y.max(0.0);
    }

    /// Cancel the in-flight navigation, if any.
    pub fn cancel(&self) -> bool {
        let mut state = self.state();
        if state.phase != NavPhase::Navigating {
            return false;
        }
        state.token.cancel();
        state.generation += 1;
        state.phase = NavPhase::Cancelled;
        true
    }

    fn begin(&self, departure: Departure) -> (u64, CancellationToken) {
        let mut state = self.state();
        state.token.cancel();
        state.generation += 1;
        state.token = CancellationToken::new();
        state.phase = NavPhase::Navigating;
        // After a traversal that fell back, the current entry is the target, not the live page.
        let on_current_entry = strip_fragment(&state.history.current().url) == strip_fragment(&state.page.url);
        if matches!(departure, Departure::Push) && on_current_entry {
            let scroll_y = state.page.scroll_y;
            state.history.save_scroll(scroll_y);
        }
        (state.generation, state.token.clone())
    }

    /// Full browser load of `url`. Supersedes any soft navigation in flight.
    ///
    /// # Errors
    ///
    /// Returns the transport error if nothing could be fetched at all.
    pub async fn load(&self, url: Url) -> Result<(), Error> {
        let (generation, _token) = self.begin(Departure::Push);

        let response = match self.transport.send(FetchRequest::get(strip_fragment(&url))).await {
            Ok(response) => response,
            Err(err) => {
                let mut state = self.state();
                if state.generation == generation {
                    state.phase = NavPhase::Idle;
                }
                return Err(err);
            }
        };

        let final_url = landing_url(&response, &url);
        let body = response.text();
        let page = match parse_page(&body, &final_url, &self.config.selectors) {
            Ok(document) => LivePage::from_document(final_url.clone(), document),
            Err(Error::StructureMismatch(reason)) => {
                tracing::debug!(%final_url, %reason, "loaded page without content region");
                LivePage::opaque(final_url.clone(), body)
            }
            Err(err) => return Err(err),
        };

        let snapshot = {
            let mut state = self.state();
            if state.generation != generation {
                return Ok(());
            }
            let same_entry = strip_fragment(&state.history.current().url) == strip_fragment(&final_url);
            let mut page = page;
            if !state.loaded || same_entry {
                state.history.replace(final_url.clone());
                page.scroll_y = state.history.current().scroll_y;
            } else {
                state.history.push(final_url.clone());
            }
            state.loaded = true;
            state.page = page;
            state.phase = NavPhase::Idle;
            state.page.clone()
        };

        tracing::info!(url = %final_url, status = response.status.as_u16(), "page loaded");
        self.hooks.page_ready(&snapshot);
        Ok(())
    }

    /// Handle a link activation on the current page.
    pub async fn activate(&self, activation: &LinkActivation) -> Activation {
        let current = self.current_url();
        match evaluate(activation, &current, &self.config.bypass) {
            Intercept::Skip(reason) => {
                tracing::debug!(href = %activation.href, ?reason, "activation left to the browser");
                Activation::NotIntercepted(reason)
            }
            Intercept::Navigate(url) => Activation::Intercepted(self.navigate(url).await),
        }
    }

    /// Soft-navigate to `url`, pushing a history entry on success.
    pub async fn navigate(&self, url: Url) -> NavOutcome {
        self.run(url, Departure::Push).await
    }

    pub async fn back(&self) -> Option<NavOutcome> {
        let entry = {
            let mut state = self.state();
            let scroll_y = state.page.scroll_y;
            state.history.save_scroll(scroll_y);
            state.history.back()?
        };
        Some(self.run(entry.url, Departure::Replay { scroll_y: entry.scroll_y }).await)
    }

    pub async fn forward(&self) -> Option<NavOutcome> {
        let entry = {
            let mut state = self.state();
            let scroll_y = state.page.scroll_y;
            state.history.save_scroll(scroll_y);
            state.history.forward()?
        };
        Some(self.run(entry.url, Departure::Replay { scroll_y: entry.scroll_y }).await)
    }

    /// Pointer entered a link. Returns true if a prefetch was scheduled.
    pub fn hover(&self, href: &str) -> bool {
        let current = self.current_url();
        let Intercept::Navigate(url) = evaluate(&LinkActivation::click(href), &current, &self.config.bypass) else {
            return false;
        };
        if strip_fragment(&url) == strip_fragment(&current) || self.prefetcher.cache().contains(&url) {
            return false;
        }
        self.prefetcher.pointer_enter(url);
        true
    }

    /// Pointer left a link.
    pub fn leave(&self, href: &str) {
        let current = self.current_url();
        if let Ok(url) = resolve_href(&current, href) {
            self.prefetcher.pointer_leave(&url);
        }
    }

    async fn run(&self, url: Url, departure: Departure) -> NavOutcome {
        let (generation, token) = self.begin(departure);
        tracing::debug!(%url, "soft navigation starting");
        self.bus.emit(Signal::NavigationStarting { url: url.clone() });

        let fade_out = async {
            tokio::time::sleep(self.config.fade_out).await;
            Ok::<(), Error>(())
        };
        let retrieved = tokio::select! {
            _ = token.cancelled() => return NavOutcome::Cancelled,
            result = async { tokio::try_join!(self.retrieve(&url), fade_out) } => result.map(|(page, _)| page),
        };
        let (final_url, html, prefetched) = match retrieved {
            Ok(page) => page,
            Err(err) => return self.fall_back(generation, url, err),
        };
        let document = match parse_page(&html, &final_url, &self.config.selectors) {
            Ok(document) => document,
            Err(err) => return self.fall_back(generation, url, err),
        };

        let snapshot = {
            let mut state = self.state();
            if state.generation != generation || token.is_cancelled() {
                return NavOutcome::Cancelled;
            }
            state.page.apply(final_url.clone(), document);
            match departure {
                Departure::Push => state.history.push(final_url.clone()),
                Departure::Replay { scroll_y } => state.page.scroll_y = scroll_y,
            }
            state.phase = NavPhase::Idle;
            state.page.clone()
        };
        if prefetched {
            self.prefetcher.cache().take(&url);
        }

        tracing::debug!(url = %final_url, template = ?snapshot.template, "content swapped");
        self.hooks.page_ready(&snapshot);
        self.bus.emit(Signal::NavigationFinished { url: final_url.clone(), template: snapshot.template.clone() });

        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(self.config.fade_in) => {}
        }
        NavOutcome::Swapped { url: final_url }
    }

    /// The document for `url` as `(landing URL, HTML, came from the prefetch cache)`.
    ///
    /// A prefetched entry is left in place; it is consumed only once the swap commits.
    async fn retrieve(&self, url: &Url) -> Result<(Url, String, bool), Error> {
        if let Some(entry) = self.prefetcher.cache().get(url) {
            tracing::debug!(%url, "prefetch hit");
            return Ok((carry_fragment(entry.final_url, url), entry.html, true));
        }

        let response = self.transport.send(FetchRequest::get(strip_fragment(url))).await?;
        if !response.status.is_success() {
            return Err(Error::HttpError(format!("{} returned {}", url, response.status)));
        }
        if !response.is_html() {
            return Err(Error::StructureMismatch(format!(
                "{} is {}",
                url,
                response.content_type.as_deref().unwrap_or("untyped")
            )));
        }
        Ok((landing_url(&response, url), response.text(), false))
    }

    fn fall_back(&self, generation: u64, url: Url, err: Error) -> NavOutcome {
        {
            let mut state = self.state();
            if state.generation != generation {
                return NavOutcome::Cancelled;
            }
            state.phase = NavPhase::Idle;
        }
        tracing::warn!(%url, error = %err, "soft navigation failed, forcing full load");
        self.bus.emit(Signal::FullNavigation { url: url.clone() });
        NavOutcome::FullReload { url, reason: err.to_string() }
    }
}

/// Where a response leaves the tab: the redirect target if the transport followed one, else the request.
fn landing_url(response: &FetchResponse, requested: &Url) -> Url {
    if response.is_redirected() {
        carry_fragment(response.final_url.clone(), requested)
    } else {
        requested.clone()
    }
}

/// Keep the requested fragment across a redirect that dropped it.
fn carry_fragment(mut final_url: Url, requested: &Url) -> Url {
    if final_url.fragment().is_none() {
        final_url.set_fragment(requested.fragment());
    }
    final_url
}
