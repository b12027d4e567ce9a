//! Cross-component signals.
//!
//! Components never call each other for these notifications; they publish on a
//! broadcast bus and whoever cares subscribes (overlay shells close on
//! `NavigationStarting`, the mutation queue drains on `ConnectivityRestored`).

use tokio::sync::broadcast;
use url::Url;

const DEFAULT_CAPACITY: usize = 64;

/// Origin-local notifications exchanged between the router, the queue and the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// A soft navigation is about to fetch `url`.
    NavigationStarting { url: Url },
    /// Content was swapped in for `url`.
    NavigationFinished { url: Url, template: Option<String> },
    /// Soft navigation gave up; the host must perform a full load of `url`.
    FullNavigation { url: Url },
    ConnectivityLost,
    ConnectivityRestored,
    /// A drain finished with this many items published and retained.
    QueueDrained { published: usize, retained: usize },
}

/// Broadcast bus for [`Signal`]s. Cloning yields another handle to the same bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Signal>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Publish a signal. Having no subscribers is not an error.
    pub fn emit(&self, signal: Signal) {
        tracing::debug!(?signal, "signal");
        let _ = self.tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
