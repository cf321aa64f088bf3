mod conflict;
mod error;
mod locks;

pub use error::EngineError;
pub use locks::{LockTable, Shelf, SharedShelf};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::{BlockStore, ReferenceData};

use conflict::validate_slot;
use locks::now_ms;

/// The reservation engine: soft-lock table plus conflict queries, bound to
/// the external reference-data and block-store collaborators.
pub struct Engine {
    pub(crate) locks: LockTable,
    pub(crate) refdata: Arc<dyn ReferenceData>,
    pub(crate) blocks: Arc<dyn BlockStore>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(
        refdata: Arc<dyn ReferenceData>,
        blocks: Arc<dyn BlockStore>,
        notify: Arc<NotifyHub>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            locks: LockTable::new(lock_ttl.as_millis() as Ms),
            refdata,
            blocks,
            notify,
        }
    }

    /// Take a soft lock on one resource/slot for the session. First come,
    /// first served; the loser sees `AlreadyReserved` before it can run any
    /// conflict check.
    pub async fn reserve(
        &self,
        kind: ResourceKind,
        resource_id: Ulid,
        slot: TimeSlot,
        session: SessionId,
    ) -> Result<(), EngineError> {
        validate_slot(&slot)?;
        if !self.refdata.resource_exists(kind, resource_id).await {
            return Err(EngineError::ResourceNotFound(kind, resource_id));
        }
        let key = LockKey {
            resource: ResourceKey { kind, id: resource_id },
            slot,
        };
        self.locks.reserve(key, session, now_ms()).await?;
        self.notify
            .send(key.resource, &LockEvent::Reserved { key, owner: session });
        Ok(())
    }

    /// Release one soft lock. Absent or foreign-owned locks are a no-op.
    pub async fn release(
        &self,
        kind: ResourceKind,
        resource_id: Ulid,
        slot: TimeSlot,
        session: SessionId,
    ) {
        let key = LockKey {
            resource: ResourceKey { kind, id: resource_id },
            slot,
        };
        if self.locks.release(key, session).await {
            self.notify
                .send(key.resource, &LockEvent::Released { key, owner: session });
        }
    }

    /// Reserve the room and professor keys for one candidate all-or-nothing:
    /// if the second reservation fails, the first is rolled back so a
    /// rejection never leaves a stray lock behind.
    pub async fn reserve_pair(
        &self,
        room_id: Ulid,
        professor_id: Ulid,
        slot: TimeSlot,
        session: SessionId,
    ) -> Result<(), EngineError> {
        self.reserve(ResourceKind::Room, room_id, slot, session)
            .await?;
        if let Err(e) = self
            .reserve(ResourceKind::Professor, professor_id, slot, session)
            .await
        {
            self.release(ResourceKind::Room, room_id, slot, session).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn release_pair(
        &self,
        room_id: Ulid,
        professor_id: Ulid,
        slot: TimeSlot,
        session: SessionId,
    ) {
        self.release(ResourceKind::Room, room_id, slot, session).await;
        self.release(ResourceKind::Professor, professor_id, slot, session)
            .await;
    }

    /// Persist a validated block through the storage collaborator, then drop
    /// both soft locks. The locks are released even when the write fails;
    /// a failed commit is an abandonment, never a held reservation.
    pub async fn commit_block(
        &self,
        block: Block,
        is_update: bool,
        session: SessionId,
    ) -> Result<(), EngineError> {
        let write = if is_update {
            self.blocks.update_block(block.clone()).await
        } else {
            self.blocks.create_block(block.clone()).await
        };
        self.release_pair(block.room_id, block.professor_id, block.slot, session)
            .await;
        write.map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;

        let event = LockEvent::BlockCommitted { block: block.clone() };
        self.notify.send(ResourceKey::room(block.room_id), &event);
        self.notify
            .send(ResourceKey::professor(block.professor_id), &event);
        debug!("committed block {} for session {session}", block.id);
        Ok(())
    }

    /// Explicit "clear my buffer": purge every lock the session holds.
    pub async fn clear_session_buffer(&self, session: SessionId) -> usize {
        let released = self.locks.release_all(session).await;
        for key in &released {
            self.notify
                .send(key.resource, &LockEvent::Released { key: *key, owner: session });
        }
        released.len()
    }

    /// Disconnect hook: same purge as an explicit clear. The transport layer
    /// must call this for every connection that ends, clean or not.
    pub async fn session_disconnected(&self, session: SessionId) {
        let released = self.clear_session_buffer(session).await;
        if released > 0 {
            info!("session {session} disconnected, released {released} lock(s)");
        }
    }

    /// Reaper path: drop an expired lock. Indistinguishable from an explicit
    /// release except for the event kind.
    pub async fn expire_lock(&self, key: LockKey, owner: SessionId) -> bool {
        let removed = self.locks.release(key, owner).await;
        if removed {
            metrics::counter!(crate::observability::LOCKS_REAPED_TOTAL).increment(1);
            self.notify
                .send(key.resource, &LockEvent::Expired { key, owner });
        }
        removed
    }

    pub fn collect_expired_locks(&self, now: Ms) -> Vec<(LockKey, SessionId)> {
        self.locks.collect_expired(now)
    }

    pub fn locks_for_session(&self, session: &SessionId) -> Vec<LockKey> {
        self.locks.locks_for_session(session)
    }

    pub fn live_lock_count(&self) -> usize {
        self.locks.live_count(now_ms())
    }
}
