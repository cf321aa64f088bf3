use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::limits::MAX_LOCKS_PER_SESSION;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// All live soft locks on one resource, guarded together so check-and-set is
/// atomic per resource.
#[derive(Debug, Default)]
pub struct Shelf {
    pub locks: Vec<SoftLock>,
}

pub type SharedShelf = Arc<RwLock<Shelf>>;

/// Process-wide registry of tentative reservations. The only shared mutable
/// state in the core; everything else is a pure read.
pub struct LockTable {
    shelves: DashMap<ResourceKey, SharedShelf>,
    /// Reverse lookup: session → keys it holds, for bulk release.
    by_session: DashMap<SessionId, Vec<LockKey>>,
    ttl_ms: Ms,
}

impl LockTable {
    pub fn new(ttl_ms: Ms) -> Self {
        Self {
            shelves: DashMap::new(),
            by_session: DashMap::new(),
            ttl_ms,
        }
    }

    pub fn ttl_ms(&self) -> Ms {
        self.ttl_ms
    }

    fn shelf(&self, resource: ResourceKey) -> SharedShelf {
        self.shelves.entry(resource).or_default().clone()
    }

    /// Atomic check-and-set on the resource's shelf. Any live lock whose slot
    /// overlaps the requested slot rejects the call, including an identical
    /// key held by the requesting session itself. Expired locks never block;
    /// the reaper removes them later.
    pub async fn reserve(
        &self,
        key: LockKey,
        owner: SessionId,
        now: Ms,
    ) -> Result<(), EngineError> {
        // Claim the reverse-index seat up front; check-and-push under one
        // entry guard keeps the per-session cap exact under concurrent
        // reserves from the same session.
        {
            let mut keys = self.by_session.entry(owner).or_default();
            if keys.len() >= MAX_LOCKS_PER_SESSION {
                return Err(EngineError::LimitExceeded("too many locks for session"));
            }
            keys.push(key);
        }

        let shelf = self.shelf(key.resource);
        let mut guard = shelf.write().await;
        for lock in &guard.locks {
            if lock.is_expired(now) {
                continue;
            }
            if lock.slot.overlaps(&key.slot) {
                let held_by = lock.owner;
                drop(guard);
                self.unindex(key, owner);
                return Err(EngineError::AlreadyReserved { held_by });
            }
        }
        guard.locks.push(SoftLock {
            slot: key.slot,
            owner,
            expires_at: now + self.ttl_ms,
        });
        drop(guard);

        metrics::gauge!(crate::observability::LOCKS_ACTIVE).increment(1.0);
        Ok(())
    }

    fn unindex(&self, key: LockKey, owner: SessionId) {
        if let Some(mut keys) = self.by_session.get_mut(&owner)
            && let Some(idx) = keys.iter().position(|k| *k == key)
        {
            keys.remove(idx);
        }
    }

    /// Remove the matching lock if owned by `owner`. A miss (absent key or
    /// foreign owner) is a no-op, not an error. Returns whether a lock was
    /// actually removed.
    pub async fn release(&self, key: LockKey, owner: SessionId) -> bool {
        let Some(shelf) = self.shelves.get(&key.resource).map(|e| e.value().clone()) else {
            return false;
        };
        let mut guard = shelf.write().await;
        let Some(pos) = guard
            .locks
            .iter()
            .position(|l| l.slot == key.slot && l.owner == owner)
        else {
            return false;
        };
        guard.locks.remove(pos);
        drop(guard);

        self.unindex(key, owner);
        metrics::gauge!(crate::observability::LOCKS_ACTIVE).decrement(1.0);
        true
    }

    /// Remove every lock owned by the session. Returns the keys released.
    pub async fn release_all(&self, owner: SessionId) -> Vec<LockKey> {
        let Some((_, keys)) = self.by_session.remove(&owner) else {
            return Vec::new();
        };
        let mut released = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(shelf) = self.shelves.get(&key.resource).map(|e| e.value().clone()) else {
                continue;
            };
            let mut guard = shelf.write().await;
            if let Some(pos) = guard
                .locks
                .iter()
                .position(|l| l.slot == key.slot && l.owner == owner)
            {
                guard.locks.remove(pos);
                metrics::gauge!(crate::observability::LOCKS_ACTIVE).decrement(1.0);
                released.push(key);
            }
        }
        released
    }

    /// Snapshot of expired locks for the reaper. Shelves under contention are
    /// skipped and picked up on the next tick.
    pub fn collect_expired(&self, now: Ms) -> Vec<(LockKey, SessionId)> {
        let mut expired = Vec::new();
        for entry in self.shelves.iter() {
            let resource = *entry.key();
            if let Ok(guard) = entry.value().try_read() {
                for lock in &guard.locks {
                    if lock.is_expired(now) {
                        expired.push((LockKey { resource, slot: lock.slot }, lock.owner));
                    }
                }
            }
        }
        expired
    }

    pub fn locks_for_session(&self, owner: &SessionId) -> Vec<LockKey> {
        self.by_session
            .get(owner)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    pub fn live_count(&self, now: Ms) -> usize {
        self.shelves
            .iter()
            .filter_map(|e| e.value().try_read().ok().map(|g| {
                g.locks.iter().filter(|l| !l.is_expired(now)).count()
            }))
            .sum()
    }
}
