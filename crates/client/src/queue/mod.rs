//! Offline mutation queue.
//!
//! A content submission that fails at the transport layer is persisted and
//! replayed once connectivity returns. Replay is strictly serial, in enqueue
//! order, and stops at the first failure; an item is deleted only after the
//! origin confirmed it.
//!
//! Two guards keep drains single-flight: an in-process flag, and the store's
//! drain lease for other contexts sharing the same store. A crash between a
//! confirmed publish and the delete can republish that one item on the next
//! drain (at-least-once).

use crate::events::{EventBus, Signal};
use crate::fetch::{FetchRequest, FetchResponse, Transport};
use crate::router::Router;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use shell_core::{AppConfig, Error, MutationPayload, QueuedMutation, StoreDb};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

const MESSAGE_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Content-creation endpoint.
    pub endpoint: Url,
    pub csrf_header: String,
    pub lease_ttl: Duration,
}

impl QueueConfig {
    pub fn new(endpoint: Url) -> Self {
        Self { endpoint, csrf_header: "X-CSRF-Token".into(), lease_ttl: Duration::from_secs(60) }
    }

    pub fn from_app(app: &AppConfig) -> Result<Self, Error> {
        let origin = app.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let endpoint = origin
            .join(&app.compose_endpoint)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", app.compose_endpoint)))?;
        Ok(Self {
            endpoint,
            csrf_header: app.csrf_header.clone(),
            lease_ttl: Duration::from_millis(app.drain_lease_ms),
        })
    }
}

/// Where the queue reads the anti-forgery token from, right before each use.
pub trait TokenSource: Send + Sync {
    fn current_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_token(&self) -> Option<String> {
        self()
    }
}

impl TokenSource for Router {
    fn current_token(&self) -> Option<String> {
        self.csrf_token()
    }
}

/// Body of a `201` from the quick-publish endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Published(PublishReceipt),
    /// Saved offline; will publish when reconnected.
    Queued { id: i64 },
    /// Unreachable and the store refused the item too.
    Unsaved { error: String },
}

/// Items a drain did not publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum FailedCount {
    /// Attempted-or-remaining items left in the store.
    Items(usize),
    /// No token was available; nothing was attempted.
    Unresolvable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub published: usize,
    pub failed: FailedCount,
    /// Why replay stopped early, if it did.
    pub halted: Option<String>,
}

impl DrainReport {
    fn unresolvable() -> Self {
        Self { published: 0, failed: FailedCount::Unresolvable, halted: Some("no token available".into()) }
    }

    pub fn retained(&self) -> usize {
        match self.failed {
            FailedCount::Items(n) => n,
            FailedCount::Unresolvable => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another drain (here or in another context) holds the queue.
    AlreadyDraining,
}

struct DrainFlag<'a>(&'a AtomicBool);

impl Drop for DrainFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MutationQueue {
    config: QueueConfig,
    store: StoreDb,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    bus: EventBus,
    draining: AtomicBool,
    holder: String,
}

impl MutationQueue {
    pub fn new(
        config: QueueConfig, store: StoreDb, transport: Arc<dyn Transport>, tokens: Arc<dyn TokenSource>, bus: EventBus,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            tokens,
            bus,
            draining: AtomicBool::new(false),
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub async fn pending(&self) -> Result<usize, Error> {
        self.store.mutation_count().await
    }

    pub async fn list(&self) -> Result<Vec<QueuedMutation>, Error> {
        self.store.list_mutations().await
    }

    pub async fn enqueue(&self, payload: &MutationPayload) -> Result<i64, Error> {
        let id = self.store.enqueue_mutation(payload).await?;
        tracing::info!(id, "submission saved offline");
        Ok(id)
    }

    fn request(&self, payload: &MutationPayload, token: Option<&str>) -> Result<FetchRequest, Error> {
        let request = FetchRequest::post_json(self.config.endpoint.clone(), payload)?;
        match token {
            Some(token) => request.header(&self.config.csrf_header, token),
            None => Ok(request),
        }
    }

    /// Publish now, or queue the submission if the origin is unreachable.
    ///
    /// # Errors
    ///
    /// Empty content is `InvalidInput`. A response from the origin refusing the
    /// submission is `AuthRejected` or `Rejected` and is not queued.
    pub async fn submit(&self, payload: MutationPayload) -> Result<SubmitOutcome, Error> {
        if payload.content.trim().is_empty() {
            return Err(Error::InvalidInput("content is required".into()));
        }

        let token = self.tokens.current_token();
        let request = self.request(&payload, token.as_deref())?;
        match self.transport.send(request).await {
            Ok(response) => {
                check_status(&response)?;
                let receipt = serde_json::from_slice::<PublishReceipt>(&response.bytes).unwrap_or_default();
                tracing::info!(slug = ?receipt.slug, "submission published");
                Ok(SubmitOutcome::Published(receipt))
            }
            Err(err) if err.is_transport() => {
                tracing::debug!(error = %err, "submission unreachable, queueing");
                match self.enqueue(&payload).await {
                    Ok(id) => Ok(SubmitOutcome::Queued { id }),
                    Err(store_err) => {
                        tracing::warn!(error = %store_err, "could not save submission offline");
                        Ok(SubmitOutcome::Unsaved { error: store_err.to_string() })
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Drain only if the host reports being online and something is queued.
    pub async fn drain_on_startup(&self, online: bool) -> Result<Option<DrainOutcome>, Error> {
        if !online || self.pending().await? == 0 {
            return Ok(None);
        }
        self.drain().await.map(Some)
    }

    /// Replay queued submissions in order until one fails.
    pub async fn drain(&self) -> Result<DrainOutcome, Error> {
        if self.draining.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            tracing::debug!("drain already running in this context");
            return Ok(DrainOutcome::AlreadyDraining);
        }
        let _flag = DrainFlag(&self.draining);

        let Some(token) = self.tokens.current_token() else {
            tracing::warn!("no token available, drain not attempted");
            return Ok(DrainOutcome::Completed(DrainReport::unresolvable()));
        };

        if !self.store.try_acquire_drain_lease(&self.holder, self.config.lease_ttl).await? {
            tracing::debug!("drain lease held by another context");
            return Ok(DrainOutcome::AlreadyDraining);
        }

        let report = self.replay(&token).await;
        if let Err(err) = self.store.release_drain_lease(&self.holder).await {
            tracing::warn!(error = %err, "failed to release drain lease");
        }
        let report = report?;

        tracing::info!(published = report.published, retained = report.retained(), halted = ?report.halted, "queue drained");
        self.bus.emit(Signal::QueueDrained { published: report.published, retained: report.retained() });
        Ok(DrainOutcome::Completed(report))
    }

    async fn replay(&self, token: &str) -> Result<DrainReport, Error> {
        let items = self.store.list_mutations().await?;
        let mut published = 0;

        for (index, item) in items.iter().enumerate() {
            let remaining = items.len() - index;
            let halt = |reason: String| DrainReport { published, failed: FailedCount::Items(remaining), halted: Some(reason) };

            if !self.store.try_acquire_drain_lease(&self.holder, self.config.lease_ttl).await? {
                return Ok(halt("drain lease lost".into()));
            }

            let request = self.request(&item.payload, Some(token))?;
            let response = match self.transport.send(request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(id = item.id, error = %err, "replay failed");
                    return Ok(halt(err.to_string()));
                }
            };
            if let Err(err) = check_status(&response) {
                tracing::debug!(id = item.id, error = %err, "replay rejected");
                return Ok(halt(err.to_string()));
            }

            if let Err(err) = self.store.delete_mutation(item.id).await {
                tracing::warn!(id = item.id, error = %err, "published but could not remove from queue");
                return Ok(DrainReport {
                    published: published + 1,
                    failed: FailedCount::Items(remaining),
                    halted: Some(err.to_string()),
                });
            }
            published += 1;
            tracing::debug!(id = item.id, "replayed");
        }

        Ok(DrainReport { published, failed: FailedCount::Items(0), halted: None })
    }
}

fn check_status(response: &FetchResponse) -> Result<(), Error> {
    let status = response.status;
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::AuthRejected(status.as_u16()));
    }
    let mut message = response.text().trim().to_string();
    if message.len() > MESSAGE_LIMIT {
        let cut = (0..=MESSAGE_LIMIT).rev().find(|&i| message.is_char_boundary(i)).unwrap_or(0);
        message.truncate(cut);
    }
    Err(Error::Rejected { status: status.as_u16(), message })
}

/// Drain every time connectivity is restored, until `shutdown` fires.
pub fn spawn_connectivity_listener(
    queue: Arc<MutationQueue>, bus: &EventBus, shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut signals = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let trigger = tokio::select! {
                _ = shutdown.cancelled() => break,
                signal = signals.recv() => match signal {
                    Ok(Signal::ConnectivityRestored) => true,
                    Ok(_) => false,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "signal listener lagged, draining to be safe");
                        true
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if !trigger {
                continue;
            }
            match queue.drain().await {
                Ok(outcome) => tracing::debug!(?outcome, "drain after reconnect"),
                Err(err) => tracing::warn!(error = %err, "drain after reconnect failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn endpoint() -> Url {
        Url::parse("https://blog.example.com/compose/quick").unwrap()
    }

    enum Reply {
        Status(u16, &'static str),
        Unreachable,
        Slow(u16),
    }

    #[derive(Default)]
    struct Publisher {
        script: Mutex<VecDeque<Reply>>,
        seen: Mutex<Vec<(MutationPayload, Option<String>)>>,
    }

    impl Publisher {
        fn scripted(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(replies.into()), ..Default::default() })
        }

        fn contents(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|(p, _)| p.content.clone()).collect()
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for Publisher {
        async fn send(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
            let payload: MutationPayload = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
            let token = request.headers.get("x-csrf-token").map(|v| v.to_str().unwrap().to_string());
            self.seen.lock().unwrap().push((payload, token));

            let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Status(201, "{}"));
            let (status, body) = match reply {
                Reply::Unreachable => return Err(Error::Network("connection refused".into())),
                Reply::Status(status, body) => (status, body),
                Reply::Slow(status) => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    (status, "{}")
                }
            };
            Ok(FetchResponse {
                final_url: request.url.clone(),
                url: request.url,
                status: StatusCode::from_u16(status).unwrap(),
                content_type: Some("application/json".into()),
                bytes: Bytes::from_static(body.as_bytes()),
                headers: HeaderMap::new(),
                fetch_ms: 0,
            })
        }
    }

    fn token() -> Arc<dyn TokenSource> {
        Arc::new(|| Some("tok-fresh".to_string()))
    }

    fn queue(store: &StoreDb, publisher: Arc<Publisher>, tokens: Arc<dyn TokenSource>) -> MutationQueue {
        MutationQueue::new(QueueConfig::new(endpoint()), store.clone(), publisher, tokens, EventBus::new())
    }

    async fn seed(store: &StoreDb, contents: &[&str]) {
        for content in contents {
            store.enqueue_mutation(&MutationPayload::new(*content)).await.unwrap();
        }
    }

    async fn stored_contents(store: &StoreDb) -> Vec<String> {
        store.list_mutations().await.unwrap().into_iter().map(|m| m.payload.content).collect()
    }

    #[tokio::test]
    async fn test_submit_online_publishes() {
        let store = StoreDb::open_in_memory().await.unwrap();
        let body = r#"{"slug":"hello","url":"/writing/hello","type":"note","message":"Published"}"#;
        let publisher = Publisher::scripted(vec![Reply::Status(201, body)]);
        let queue = queue(&store, publisher.clone(), token());

        let outcome = queue.submit(MutationPayload::new("hello").with_title("Hi")).await.unwrap();

        let SubmitOutcome::Published(receipt) = outcome else { panic!("expected publish, got {outcome:?}") };
        assert_eq!(receipt.slug.as_deref(), Some("hello"));
        assert_eq!(receipt.kind.as_deref(), Some("note"));
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert_eq!(publisher.seen.lock().unwrap()[0].1.as_deref(), Some("tok-fresh"));
    }

    #[tokio::test]
    async fn test_submit_unreachable_queues() {
        let store = StoreDb::open_in_memory().await.unwrap();
        let queue = queue(&store, Publisher::scripted(vec![Reply::Unreachable]), token());

        let outcome = queue.submit(MutationPayload::new("hello")).await.unwrap();

        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(stored_contents(&store).await, vec!["hello"]);
    }

    #[tokio::test]
    async fn test_submit_rejection_is_not_queued() {
        let store = StoreDb::open_in_memory().await.unwrap();
        let publisher = Publisher::scripted(vec![Reply::Status(400, r#"{"error":"too long"}"#), Reply::Status(403, "")]);
        let queue = queue(&store, publisher, token());

        let rejected = queue.submit(MutationPayload::new("x")).await.unwrap_err();
        assert!(matches!(rejected, Error::Rejected { status: 400, ref message } if message.contains("too long")));
        let forbidden = queue.submit(MutationPayload::new("x")).await.unwrap_err();
        assert!(matches!(forbidden, Error::AuthRejected(403)));
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_empty_content_rejected_locally() {
        let store = StoreDb::open_in_memory().await.unwrap();
        let publisher = Publisher::scripted(vec![]);
        let queue = queue(&store, publisher.clone(), token());

        assert!(matches!(queue.submit(MutationPayload::new("   ")).await, Err(Error::InvalidInput(_))));
        assert_eq!(publisher.calls(), 0);
    }

    #[tokio::test]
    async fn test_drain_stops_at_first_failure_and_keeps_order() {
        let store = StoreDb::open_in_memory().await.unwrap();
        seed(&store, &["A", "B", "C"]).await;
        let publisher = Publisher::scripted(vec![Reply::Status(201, "{}"), Reply::Status(500, "oops")]);
        let queue = queue(&store, publisher.clone(), token());

        let DrainOutcome::Completed(report) = queue.drain().await.unwrap() else { panic!("drain skipped") };

        assert_eq!(report.published, 1);
        assert_eq!(report.failed, FailedCount::Items(2));
        assert!(report.halted.is_some());
        assert_eq!(stored_contents(&store).await, vec!["B", "C"]);
        assert_eq!(publisher.contents(), vec!["A", "B"]);

        let DrainOutcome::Completed(report) = queue.drain().await.unwrap() else { panic!("drain skipped") };
        assert_eq!(report.published, 2);
        assert_eq!(report.failed, FailedCount::Items(0));
        assert_eq!(publisher.contents(), vec!["A", "B", "B", "C"]);
        assert!(stored_contents(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_mid_drain_retains_rest() {
        let store = StoreDb::open_in_memory().await.unwrap();
        seed(&store, &["A", "B"]).await;
        let queue = queue(&store, Publisher::scripted(vec![Reply::Unreachable]), token());

        let DrainOutcome::Completed(report) = queue.drain().await.unwrap() else { panic!("drain skipped") };

        assert_eq!(report.published, 0);
        assert_eq!(report.failed, FailedCount::Items(2));
        assert_eq!(stored_contents(&store).await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_auth_rejection_halts_drain() {
        let store = StoreDb::open_in_memory().await.unwrap();
        seed(&store, &["A", "B", "C"]).await;
        let publisher = Publisher::scripted(vec![Reply::Status(401, "")]);
        let queue = queue(&store, publisher.clone(), token());

        let DrainOutcome::Completed(report) = queue.drain().await.unwrap() else { panic!("drain skipped") };

        assert_eq!(report.failed, FailedCount::Items(3));
        assert!(report.halted.unwrap().starts_with("AUTH_REJECTED"));
        assert_eq!(publisher.calls(), 1);
        assert_eq!(stored_contents(&store).await, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_drain_without_token_is_unresolvable() {
        let store = StoreDb::open_in_memory().await.unwrap();
        seed(&store, &["A", "B"]).await;
        let publisher = Publisher::scripted(vec![]);
        let queue = queue(&store, publisher.clone(), Arc::new(|| None::<String>));

        let outcome = queue.drain().await.unwrap();

        let DrainOutcome::Completed(report) = outcome else { panic!("drain skipped") };
        assert_eq!(report.published, 0);
        assert_eq!(report.failed, FailedCount::Unresolvable);
        assert_eq!(publisher.calls(), 0);
        assert_eq!(stored_contents(&store).await, vec!["A", "B"]);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_token_read_fresh_for_each_drain() {
        let store = StoreDb::open_in_memory().await.unwrap();
        let current = Arc::new(Mutex::new("tok-1".to_string()));
        let source = current.clone();
        let publisher = Publisher::scripted(vec![]);
        let queue = queue(&store, publisher.clone(), Arc::new(move || Some(source.lock().unwrap().clone())));

        seed(&store, &["A"]).await;
        queue.drain().await.unwrap();
        *current.lock().unwrap() = "tok-2".to_string();
        seed(&store, &["B"]).await;
        queue.drain().await.unwrap();

        let tokens: Vec<_> = publisher.seen.lock().unwrap().iter().map(|(_, t)| t.clone().unwrap()).collect();
        assert_eq!(tokens, vec!["tok-1", "tok-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_drains_are_single_flight() {
        let store = StoreDb::open_in_memory().await.unwrap();
        seed(&store, &["A"]).await;
        let publisher = Publisher::scripted(vec![Reply::Slow(201)]);
        let queue = queue(&store, publisher.clone(), token());

        let (first, second) = tokio::join!(queue.drain(), async {
            tokio::task::yield_now().await;
            queue.drain().await
        });

        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| **o == DrainOutcome::AlreadyDraining).count(), 1);
        assert_eq!(publisher.calls(), 1);
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lease_held_elsewhere_blocks_drain() {
        let store = StoreDb::open_in_memory().await.unwrap();
        seed(&store, &["A"]).await;
        assert!(store.try_acquire_drain_lease("other-tab", Duration::from_secs(60)).await.unwrap());
        let publisher = Publisher::scripted(vec![]);
        let queue = queue(&store, publisher.clone(), token());

        assert_eq!(queue.drain().await.unwrap(), DrainOutcome::AlreadyDraining);
        assert_eq!(publisher.calls(), 0);

        store.release_drain_lease("other-tab").await.unwrap();
        assert!(matches!(queue.drain().await.unwrap(), DrainOutcome::Completed(_)));
        assert_eq!(publisher.calls(), 1);
    }

    #[tokio::test]
    async fn test_drain_on_startup_requires_online_and_items() {
        let store = StoreDb::open_in_memory().await.unwrap();
        let publisher = Publisher::scripted(vec![]);
        let queue = queue(&store, publisher.clone(), token());

        assert!(queue.drain_on_startup(true).await.unwrap().is_none());
        seed(&store, &["A"]).await;
        assert!(queue.drain_on_startup(false).await.unwrap().is_none());
        assert!(queue.drain_on_startup(true).await.unwrap().is_some());
        assert_eq!(publisher.calls(), 1);
    }

    #[tokio::test]
    async fn test_listener_drains_on_reconnect() {
        let store = StoreDb::open_in_memory().await.unwrap();
        seed(&store, &["hello"]).await;
        let bus = EventBus::new();
        let publisher = Publisher::scripted(vec![]);
        let queue = Arc::new(MutationQueue::new(
            QueueConfig::new(endpoint()),
            store.clone(),
            publisher.clone(),
            token(),
            bus.clone(),
        ));
        let mut drained = bus.subscribe();
        let shutdown = CancellationToken::new();
        let listener = spawn_connectivity_listener(queue, &bus, shutdown.clone());

        bus.emit(Signal::ConnectivityLost);
        bus.emit(Signal::ConnectivityRestored);

        loop {
            if let Signal::QueueDrained { published, retained } = drained.recv().await.unwrap() {
                assert_eq!((published, retained), (1, 0));
                break;
            }
        }
        assert_eq!(publisher.contents(), vec!["hello"]);
        shutdown.cancel();
        listener.await.unwrap();
    }
}
