use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{LockEvent, ResourceKey};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub: one channel per resource key, so editors watching a room
/// or professor see reservations, releases, and commits as they happen.
pub struct NotifyHub {
    channels: DashMap<ResourceKey, broadcast::Sender<LockEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource: ResourceKey) -> broadcast::Receiver<LockEvent> {
        let sender = self
            .channels
            .entry(resource)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, resource: ResourceKey, event: &LockEvent) {
        if let Some(sender) = self.channels.get(&resource) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a resource disappears from the catalog).
    pub fn remove(&self, resource: &ResourceKey) {
        self.channels.remove(resource);
    }
}
