//! Connectivity gate in front of a transport.
//!
//! While offline every request fails with a transport-class error without
//! reaching the inner transport. Transitions are published on the event bus;
//! offline to online is the "connectivity restored" signal the mutation queue
//! drains on.

use super::{FetchRequest, FetchResponse, Transport};
use crate::events::{EventBus, Signal};
use async_trait::async_trait;
use shell_core::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct Connectivity {
    inner: Arc<dyn Transport>,
    online: AtomicBool,
    bus: EventBus,
}

impl Connectivity {
    pub fn new(inner: Arc<dyn Transport>, bus: EventBus) -> Self {
        Self { inner, online: AtomicBool::new(true), bus }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flip the gate. Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        tracing::info!(online, "connectivity changed");
        self.bus
            .emit(if online { Signal::ConnectivityRestored } else { Signal::ConnectivityLost });
        true
    }
}

#[async_trait]
impl Transport for Connectivity {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        if !self.is_online() {
            return Err(Error::Network(format!("offline: {} {}", request.method, request.url)));
        }
        self.inner.send(request).await
    }
}
