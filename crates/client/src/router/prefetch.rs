//! Hover-intent prefetching.
//!
//! Pointer-enter over an eligible link arms a short debounce timer; if the
//! pointer is still there when it fires, the page HTML is fetched into a small
//! cache the next real navigation consults. Entries are consumed once a
//! navigation completes with them, the oldest is evicted when the cache is
//! full, and every entry expires after its TTL whether or not the cap was reached.

use crate::fetch::{FetchRequest, Transport, strip_fragment};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use url::Url;

/// One prefetched page.
#[derive(Debug, Clone)]
pub struct PrefetchEntry {
    /// Where the HTML actually came from, after redirects.
    pub final_url: Url,
    pub html: String,
    pub fetched_at: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key(url: &Url) -> String {
    strip_fragment(url).to_string()
}

/// Bounded, time-limited store of prefetched pages keyed by URL.
pub struct PrefetchCache {
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<Vec<(String, PrefetchEntry)>>,
}

impl PrefetchCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self { max_entries: max_entries.max(1), ttl, entries: Mutex::new(Vec::new()) }
    }

    fn drop_expired(&self, entries: &mut Vec<(String, PrefetchEntry)>) {
        let ttl = self.ttl;
        entries.retain(|(_, e)| e.fetched_at.elapsed() < ttl);
    }

    /// Store a page, evicting the oldest entry if the cache is full.
    pub fn insert(&self, url: &Url, final_url: Url, html: String) {
        let key = key(url);
        let mut entries = lock(&self.entries);
        self.drop_expired(&mut entries);
        entries.retain(|(k, _)| *k != key);
        while entries.len() >= self.max_entries {
            let (evicted, _) = entries.remove(0);
            tracing::debug!(url = %evicted, "prefetch evicted");
        }
        entries.push((key, PrefetchEntry { final_url, html, fetched_at: Instant::now() }));
    }

    /// A copy of a live entry, left in the cache.
    pub fn get(&self, url: &Url) -> Option<PrefetchEntry> {
        let key = key(url);
        let mut entries = lock(&self.entries);
        self.drop_expired(&mut entries);
        entries.iter().find(|(k, _)| *k == key).map(|(_, e)| e.clone())
    }

    /// Remove and return a live entry.
    pub fn take(&self, url: &Url) -> Option<PrefetchEntry> {
        let key = key(url);
        let mut entries = lock(&self.entries);
        self.drop_expired(&mut entries);
        let index = entries.iter().position(|(k, _)| *k == key)?;
        Some(entries.remove(index).1)
    }

    pub fn contains(&self, url: &Url) -> bool {
        let key = key(url);
        let mut entries = lock(&self.entries);
        self.drop_expired(&mut entries);
        entries.iter().any(|(k, _)| *k == key)
    }

    pub fn len(&self) -> usize {
        let mut entries = lock(&self.entries);
        self.drop_expired(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Debounced background fetcher feeding a [`PrefetchCache`].
pub struct Prefetcher {
    cache: Arc<PrefetchCache>,
    transport: Arc<dyn Transport>,
    debounce: Duration,
    pending: Mutex<HashMap<String, AbortHandle>>,
}

impl Prefetcher {
    pub fn new(cache: Arc<PrefetchCache>, transport: Arc<dyn Transport>, debounce: Duration) -> Self {
        Self { cache, transport, debounce, pending: Mutex::new(HashMap::new()) }
    }

    pub fn cache(&self) -> &Arc<PrefetchCache> {
        &self.cache
    }

    /// Arm the debounce timer for `url`. A timer already armed for it is kept.
    pub fn pointer_enter(self: &Arc<Self>, url: Url) {
        let key = key(&url);
        let mut pending = lock(&self.pending);
        if pending.contains_key(&key) {
            return;
        }

        let this = Arc::clone(self);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            lock(&this.pending).remove(&task_key);
            this.fetch_into_cache(url).await;
        });
        pending.insert(key, handle.abort_handle());
    }

    /// Disarm a timer that has not fired yet. A fetch already under way is left alone.
    pub fn pointer_leave(&self, url: &Url) {
        if let Some(handle) = lock(&self.pending).remove(&key(url)) {
            handle.abort();
            tracing::debug!(%url, "prefetch cancelled before firing");
        }
    }

    /// Number of armed, not yet fired timers.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    async fn fetch_into_cache(&self, url: Url) {
        let request = FetchRequest::get(strip_fragment(&url));
        match self.transport.send(request).await {
            Ok(response) if response.status.is_success() && response.is_html() => {
                tracing::debug!(%url, bytes = response.bytes.len(), "prefetched");
                let html = response.text();
                self.cache.insert(&url, response.final_url, html);
            }
            Ok(response) => {
                tracing::debug!(%url, status = response.status.as_u16(), "prefetch skipped non-HTML or error response");
            }
            Err(err) => {
                tracing::debug!(%url, error = %err, "prefetch failed");
            }
        }
    }
}
