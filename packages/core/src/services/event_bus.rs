//! Event Bus - fan-out of committed outline events
//!
//! A thin wrapper around a tokio `broadcast` channel. The command processor
//! emits each event after its transaction commits; any number of receivers
//! observe events in commit order.
//!
//! # Subscribers
//!
//! - [`EventBus::subscribe`] - every event of every container
//! - [`EventBus::subscribe_container`] - events affecting one container
//! - [`EventBus::spawn_listener`] - a background task feeding an
//!   [`EventListener`] (notifications, search indexing, ...)
//!
//! A receiver that falls more than the channel capacity behind skips the
//! oldest events and is told how many it missed; the event store remains the
//! authoritative log.

use crate::db::OutlineEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Side-effect consumer of outline events
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "event-listener"
    }

    /// Handle one event. Errors are logged and do not stop the listener.
    async fn on_event(&self, event: &OutlineEvent) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct EventBus {
    event_tx: broadcast::Sender<OutlineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutlineEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_container(&self, container_id: impl Into<String>) -> ContainerSubscription {
        ContainerSubscription {
            container_id: container_id.into(),
            rx: self.event_tx.subscribe(),
        }
    }

    /// Publish to all current subscribers
    ///
    /// Having no subscribers is not an error.
    pub fn emit(&self, event: OutlineEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.event_tx.receiver_count()
    }

    /// Run `listener` on every event until the bus is dropped
    pub fn spawn_listener<L>(&self, listener: L) -> JoinHandle<()>
    where
        L: EventListener + 'static,
    {
        let mut rx = self.event_tx.subscribe();
        tokio::spawn(async move {
            info!(listener = listener.name(), "event listener started");
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = listener.on_event(&event).await {
                            warn!(
                                listener = listener.name(),
                                event_id = %event.event_id,
                                event_type = event.event_type(),
                                "listener failed: {:#}",
                                e
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(listener = listener.name(), skipped, "event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(listener = listener.name(), "event bus closed, listener stopping");
                        break;
                    }
                }
            }
        })
    }
}

/// Receiver filtered to the events affecting one container
pub struct ContainerSubscription {
    container_id: String,
    rx: broadcast::Receiver<OutlineEvent>,
}

impl ContainerSubscription {
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Next event for this container
    ///
    /// Same error semantics as `broadcast::Receiver::recv`.
    pub async fn recv(&mut self) -> Result<OutlineEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.affects_container(&self.container_id) {
                return Ok(event);
            }
            debug!(
                container_id = %self.container_id,
                event_container = %event.container_id,
                "skipping event for another container"
            );
        }
    }
}
