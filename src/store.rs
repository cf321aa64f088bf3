//! Boundary to the external collaborators: the reference-data catalogs
//! (rooms, professors, schedules) and the persisted block store. The engine
//! only ever talks to these traits; the admin CRUD screens and the real
//! database live on the far side.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::warn;
use ulid::Ulid;

use crate::model::{Block, ResourceKind, ScheduleWindow};

/// Failure surfaced by a collaborator. The engine wraps these in
/// `EngineError::PersistenceFailure` on the write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Read-only reference data: resource catalogs and schedule metadata.
#[async_trait]
pub trait ReferenceData: Send + Sync {
    async fn resource_exists(&self, kind: ResourceKind, id: Ulid) -> bool;
    async fn schedule_window(&self, schedule_id: Ulid) -> Option<ScheduleWindow>;
    async fn list_resources(&self, kind: ResourceKind) -> Vec<Ulid>;
}

/// Persisted block storage. Reads feed the conflict checker; writes run only
/// after a candidate reaches the Validated phase.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn list_blocks_for_resource(
        &self,
        kind: ResourceKind,
        resource_id: Ulid,
    ) -> Result<Vec<Block>, StoreError>;
    async fn create_block(&self, block: Block) -> Result<(), StoreError>;
    async fn update_block(&self, block: Block) -> Result<(), StoreError>;
    async fn delete_block(&self, block_id: Ulid) -> Result<(), StoreError>;
}

// ── In-memory directory ──────────────────────────────────────────

/// Seed file shape for the demo binary and tests.
#[derive(Debug, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub rooms: Vec<Ulid>,
    #[serde(default)]
    pub professors: Vec<Ulid>,
    #[serde(default)]
    pub schedules: HashMap<Ulid, ScheduleWindow>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// In-memory implementation of both collaborator traits. Stands in for the
/// external admin/persistence system in tests and the demo server.
#[derive(Default)]
pub struct MemoryDirectory {
    rooms: DashMap<Ulid, ()>,
    professors: DashMap<Ulid, ()>,
    schedules: DashMap<Ulid, ScheduleWindow>,
    blocks: DashMap<Ulid, Block>,
    /// When set, every write fails; used to exercise the rollback path.
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_seed(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let seed: Seed = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let dir = Self::new();
        for id in seed.rooms {
            dir.add_room(id);
        }
        for id in seed.professors {
            dir.add_professor(id);
        }
        for (id, window) in seed.schedules {
            dir.add_schedule(id, window);
        }
        for block in seed.blocks {
            dir.blocks.insert(block.id, block);
        }
        Ok(dir)
    }

    pub fn add_room(&self, id: Ulid) {
        self.rooms.insert(id, ());
    }

    pub fn add_professor(&self, id: Ulid) {
        self.professors.insert(id, ());
    }

    pub fn add_schedule(&self, id: Ulid, window: ScheduleWindow) {
        if !window.is_canonical() {
            warn!("schedule {id} window is not Monday-to-Saturday");
        }
        self.schedules.insert(id, window);
    }

    pub fn add_block(&self, block: Block) {
        self.blocks.insert(block.id, block);
    }

    pub fn get_block(&self, id: &Ulid) -> Option<Block> {
        self.blocks.get(id).map(|b| b.value().clone())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn writes_failing(&self) -> bool {
        self.fail_writes.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceData for MemoryDirectory {
    async fn resource_exists(&self, kind: ResourceKind, id: Ulid) -> bool {
        match kind {
            ResourceKind::Room => self.rooms.contains_key(&id),
            ResourceKind::Professor => self.professors.contains_key(&id),
        }
    }

    async fn schedule_window(&self, schedule_id: Ulid) -> Option<ScheduleWindow> {
        self.schedules.get(&schedule_id).map(|w| *w.value())
    }

    async fn list_resources(&self, kind: ResourceKind) -> Vec<Ulid> {
        let map = match kind {
            ResourceKind::Room => &self.rooms,
            ResourceKind::Professor => &self.professors,
        };
        map.iter().map(|e| *e.key()).collect()
    }
}

#[async_trait]
impl BlockStore for MemoryDirectory {
    async fn list_blocks_for_resource(
        &self,
        kind: ResourceKind,
        resource_id: Ulid,
    ) -> Result<Vec<Block>, StoreError> {
        Ok(self
            .blocks
            .iter()
            .filter(|e| e.value().resource_id(kind) == resource_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn create_block(&self, block: Block) -> Result<(), StoreError> {
        if self.writes_failing() {
            return Err(StoreError("write failed".into()));
        }
        if self.blocks.contains_key(&block.id) {
            return Err(StoreError(format!("block already exists: {}", block.id)));
        }
        self.blocks.insert(block.id, block);
        Ok(())
    }

    async fn update_block(&self, block: Block) -> Result<(), StoreError> {
        if self.writes_failing() {
            return Err(StoreError("write failed".into()));
        }
        if !self.blocks.contains_key(&block.id) {
            return Err(StoreError(format!("block not found: {}", block.id)));
        }
        self.blocks.insert(block.id, block);
        Ok(())
    }

    async fn delete_block(&self, block_id: Ulid) -> Result<(), StoreError> {
        if self.writes_failing() {
            return Err(StoreError("write failed".into()));
        }
        self.blocks
            .remove(&block_id)
            .map(|_| ())
            .ok_or_else(|| StoreError(format!("block not found: {block_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::*;

    fn make_block(room: Ulid, professor: Ulid, schedule: Ulid) -> Block {
        Block {
            id: Ulid::new(),
            subject_id: Ulid::new(),
            professor_id: professor,
            room_id: room,
            schedule_id: schedule,
            slot: slot(1, 9, 0, 10, 30),
        }
    }

    #[tokio::test]
    async fn blocks_filtered_per_resource_axis() {
        let dir = MemoryDirectory::new();
        let room_a = Ulid::new();
        let room_b = Ulid::new();
        let prof = Ulid::new();
        let sched = Ulid::new();

        dir.add_block(make_block(room_a, prof, sched));
        dir.add_block(make_block(room_b, prof, sched));

        let in_a = dir
            .list_blocks_for_resource(ResourceKind::Room, room_a)
            .await
            .unwrap();
        assert_eq!(in_a.len(), 1);

        let by_prof = dir
            .list_blocks_for_resource(ResourceKind::Professor, prof)
            .await
            .unwrap();
        assert_eq!(by_prof.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let dir = MemoryDirectory::new();
        let block = make_block(Ulid::new(), Ulid::new(), Ulid::new());
        dir.create_block(block.clone()).await.unwrap();
        assert!(dir.create_block(block).await.is_err());
    }

    #[tokio::test]
    async fn update_requires_existing_block() {
        let dir = MemoryDirectory::new();
        let block = make_block(Ulid::new(), Ulid::new(), Ulid::new());
        assert!(dir.update_block(block.clone()).await.is_err());
        dir.create_block(block.clone()).await.unwrap();
        let mut moved = block;
        moved.slot = slot(2, 11, 0, 12, 0);
        dir.update_block(moved.clone()).await.unwrap();
        assert_eq!(dir.get_block(&moved.id).unwrap().slot, moved.slot);
    }

    #[tokio::test]
    async fn catalogs_listed_per_kind() {
        let dir = MemoryDirectory::new();
        let room = Ulid::new();
        let prof = Ulid::new();
        dir.add_room(room);
        dir.add_professor(prof);
        assert_eq!(dir.list_resources(ResourceKind::Room).await, vec![room]);
        assert_eq!(dir.list_resources(ResourceKind::Professor).await, vec![prof]);
    }

    #[tokio::test]
    async fn delete_removes_block() {
        let dir = MemoryDirectory::new();
        let block = make_block(Ulid::new(), Ulid::new(), Ulid::new());
        dir.create_block(block.clone()).await.unwrap();
        dir.delete_block(block.id).await.unwrap();
        assert!(dir.get_block(&block.id).is_none());
        assert!(dir.delete_block(block.id).await.is_err());
    }

    #[tokio::test]
    async fn failing_writes_leave_state_untouched() {
        let dir = MemoryDirectory::new();
        dir.set_fail_writes(true);
        let block = make_block(Ulid::new(), Ulid::new(), Ulid::new());
        assert!(dir.create_block(block).await.is_err());
        assert_eq!(dir.block_count(), 0);
    }

    #[tokio::test]
    async fn seed_parses_minimal_document() {
        let dir = std::env::temp_dir().join("gridlock_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed.json");
        let room = Ulid::new();
        let sched = Ulid::new();
        let doc = format!(
            r#"{{
                "rooms": ["{room}"],
                "schedules": {{"{sched}": {{"start_date": "2025-03-03", "end_date": "2025-06-28"}}}}
            }}"#
        );
        std::fs::write(&path, doc).unwrap();

        let loaded = MemoryDirectory::load_seed(&path).unwrap();
        assert!(loaded.resource_exists(ResourceKind::Room, room).await);
        assert_eq!(
            loaded.schedule_window(sched).await.unwrap(),
            window((2025, 3, 3), (2025, 6, 28))
        );
    }
}
