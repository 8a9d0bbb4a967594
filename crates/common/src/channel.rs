//! Device event channel between the engine and its subscribers
//!
//! Every subscription gets its own bounded queue and sees only events
//! published after it was created. The engine publishes from blocking worker
//! threads as well as from async tasks, so the publisher never waits: a full
//! queue drops the event for that subscription only.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use records::DeviceEvent;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Maximum number of undelivered events per subscription
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Publishing half, owned by the engine
///
/// Clones share the same set of subscriptions.
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    subscribers: Arc<Mutex<Vec<Sender<DeviceEvent>>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Sender<DeviceEvent>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a new subscription
    pub fn subscribe(&self) -> EventSubscriber {
        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        self.subscribers().push(event_tx);
        EventSubscriber { event_rx }
    }

    /// Publish an event to every subscription without blocking
    ///
    /// Returns false if no subscription received it. Subscriptions whose
    /// receivers are all dropped are forgotten.
    pub fn publish(&self, event: DeviceEvent) -> bool {
        let mut delivered = false;
        self.subscribers()
            .retain(|event_tx| match event_tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered = true;
                    true
                }
                Err(TrySendError::Full(event)) => {
                    debug!("Subscriber queue full, dropping event for {}", event.device_id());
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        delivered
    }

    /// Number of open subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

/// Receiving half of one subscription
///
/// Clones share the subscription's queue: each event is delivered to exactly
/// one of them.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    event_rx: Receiver<DeviceEvent>,
}

impl EventSubscriber {
    /// Receive the next event
    pub async fn recv(&self) -> crate::Result<DeviceEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|_| crate::Error::ChannelClosed)
    }

    /// Receive an event without waiting
    pub fn try_recv(&self) -> Option<DeviceEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Drain every event currently queued
    pub fn drain(&self) -> Vec<DeviceEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Number of events waiting to be received
    pub fn pending(&self) -> usize {
        self.event_rx.len()
    }
}

/// Create a publisher with one subscription
///
/// Returns (EventPublisher for the engine, EventSubscriber for the caller)
pub fn create_event_channel() -> (EventPublisher, EventSubscriber) {
    let publisher = EventPublisher::new();
    let subscriber = publisher.subscribe();
    (publisher, subscriber)
}
