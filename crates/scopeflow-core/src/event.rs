/*!
 * Event system for ScopeFlow.
 *
 * This module provides a typed publish/subscribe bus. Each event type gets its
 * own broadcast channel, created lazily on first publish or subscribe.
 */
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{Error, Result};

/// Maximum number of events that can be buffered in a channel
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type EventSender<T> = broadcast::Sender<T>;

/// Receiver half for one event type
pub type EventReceiver<T> = broadcast::Receiver<T>;

/// Event bus for publishing and subscribing to events
#[derive(Debug)]
pub struct EventBus {
    channels: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    channel_capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity.max(1),
        }
    }

    fn sender<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventSender<T>> {
        let type_id = TypeId::of::<T>();
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::event("Failed to lock channels"))?;

        if let Some(sender) = channels.get(&type_id) {
            return sender
                .downcast_ref::<EventSender<T>>()
                .cloned()
                .ok_or_else(|| Error::event("Failed to downcast sender"));
        }

        let (sender, _) = broadcast::channel(self.channel_capacity);
        channels.insert(type_id, Box::new(sender.clone()));
        Ok(sender)
    }

    /// Publish an event, returning the number of receivers that saw it
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        let sender = self.sender::<T>()?;
        match sender.send(event) {
            Ok(n) => {
                trace!("Published event to {} receivers", n);
                Ok(n)
            }
            Err(_) => Ok(0),
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        Ok(self.sender::<T>()?.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared event bus that can be cloned
#[derive(Debug, Clone, Default)]
pub struct SharedEventBus(Arc<EventBus>);

impl SharedEventBus {
    /// Create a new shared event bus
    pub fn new() -> Self {
        Self(Arc::new(EventBus::new()))
    }

    /// Create a new shared event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(EventBus::with_capacity(capacity)))
    }

    /// Get a reference to the event bus
    pub fn bus(&self) -> &EventBus {
        &self.0
    }
}

impl std::ops::Deref for SharedEventBus {
    type Target = EventBus;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Moved(u32);

    #[derive(Debug, Clone, PartialEq)]
    struct Exposed(&'static str);

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Moved(1)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_typed_channels_are_separate() {
        let bus = SharedEventBus::new();
        let mut moved = bus.subscribe::<Moved>().unwrap();
        let mut exposed = bus.subscribe::<Exposed>().unwrap();

        assert_eq!(bus.publish(Moved(7)).unwrap(), 1);
        assert_eq!(bus.publish(Exposed("frame")).unwrap(), 1);

        assert_eq!(moved.recv().await.unwrap(), Moved(7));
        assert_eq!(exposed.recv().await.unwrap(), Exposed("frame"));
        assert!(moved.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shared_bus_clones_share_channels() {
        let bus = SharedEventBus::with_capacity(4);
        let clone = bus.clone();
        let mut rx = bus.subscribe::<Moved>().unwrap();
        clone.publish(Moved(3)).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Moved(3));
    }
}
