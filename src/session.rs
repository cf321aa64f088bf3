use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::engine::EngineError;
use crate::limits::MAX_WATCHES_PER_SESSION;
use crate::model::{ResourceKey, SessionId};
use crate::notify::NotifyHub;
use crate::protocol::ResponseEnvelope;

/// Connection-scoped editing session. Owns the outbound channel and the set
/// of live watch forwarders; dropping the watches stops the fan-out.
pub struct Session {
    pub id: SessionId,
    outbound: mpsc::Sender<ResponseEnvelope>,
    watches: HashMap<ResourceKey, JoinHandle<()>>,
}

impl Session {
    pub fn new(id: SessionId, outbound: mpsc::Sender<ResponseEnvelope>) -> Self {
        Self {
            id,
            outbound,
            watches: HashMap::new(),
        }
    }

    /// Start forwarding a resource's events to this session. Watching the
    /// same resource twice is a no-op.
    pub fn watch(&mut self, hub: &NotifyHub, resource: ResourceKey) -> Result<(), EngineError> {
        if self.watches.contains_key(&resource) {
            return Ok(());
        }
        if self.watches.len() >= MAX_WATCHES_PER_SESSION {
            return Err(EngineError::LimitExceeded("too many watches for session"));
        }
        let mut rx = hub.subscribe(resource);
        let tx = self.outbound.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(ResponseEnvelope::event(event)).await.is_err() {
                            break;
                        }
                    }
                    // A slow consumer misses events rather than stalling
                    // the hub; the grid re-queries on reconnect anyway.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.watches.insert(resource, handle);
        Ok(())
    }

    pub fn unwatch(&mut self, resource: &ResourceKey) {
        if let Some(handle) = self.watches.remove(resource) {
            handle.abort();
        }
    }

    /// Tear down all forwarders. Called when the connection ends.
    pub fn close(&mut self) {
        for (_, handle) in self.watches.drain() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::*;
    use crate::model::{LockEvent, LockKey};
    use crate::protocol::{Response, EVENT_ID};
    use ulid::Ulid;

    #[tokio::test]
    async fn watch_forwards_events() {
        let hub = NotifyHub::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = Session::new(SessionId::new(), tx);
        let resource = ResourceKey::room(Ulid::new());
        session.watch(&hub, resource).unwrap();

        // Subscription is registered synchronously in watch(); the spawned
        // task drains whatever the receiver buffered.
        let event = LockEvent::Reserved {
            key: LockKey { resource, slot: slot(1, 9, 0, 10, 30) },
            owner: SessionId::new(),
        };
        hub.send(resource, &event);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.id, EVENT_ID);
        assert_eq!(envelope.response, Response::Event { event });
    }

    #[tokio::test]
    async fn unwatch_stops_forwarding() {
        let hub = NotifyHub::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = Session::new(SessionId::new(), tx);
        let resource = ResourceKey::professor(Ulid::new());
        session.watch(&hub, resource).unwrap();
        session.unwatch(&resource);

        hub.send(
            resource,
            &LockEvent::Released {
                key: LockKey { resource, slot: slot(1, 9, 0, 10, 30) },
                owner: SessionId::new(),
            },
        );
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn watch_limit_enforced() {
        let hub = NotifyHub::new();
        let (tx, _rx) = mpsc::channel(8);
        let mut session = Session::new(SessionId::new(), tx);
        for _ in 0..MAX_WATCHES_PER_SESSION {
            session
                .watch(&hub, ResourceKey::room(Ulid::new()))
                .unwrap();
        }
        let result = session.watch(&hub, ResourceKey::room(Ulid::new()));
        assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    }

    #[tokio::test]
    async fn duplicate_watch_is_noop() {
        let hub = NotifyHub::new();
        let (tx, _rx) = mpsc::channel(8);
        let mut session = Session::new(SessionId::new(), tx);
        let resource = ResourceKey::room(Ulid::new());
        session.watch(&hub, resource).unwrap();
        session.watch(&hub, resource).unwrap();
    }
}
