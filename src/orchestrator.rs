//! Per-editing-session state machine driving the engine: select resource →
//! reserve → query conflicts → commit-or-abort → release. Single-flight per
//! candidate: a new proposal is refused while one cycle is outstanding.

use std::sync::Arc;

use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{Block, ScheduleWindow, SessionId, TimeSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SlotProposed,
    Reserved,
    Validated,
    Committed,
    Rejected,
}

/// One proposed assignment: subject + professor + room + slot within a
/// schedule. `existing_block_id` is set when editing an already-persisted
/// block, so validation excludes it and commit becomes an update.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub subject_id: Ulid,
    pub professor_id: Ulid,
    pub room_id: Ulid,
    pub schedule_id: Ulid,
    pub slot: TimeSlot,
    pub window: ScheduleWindow,
    pub existing_block_id: Option<Ulid>,
}

pub struct EditSession {
    engine: Arc<Engine>,
    session: SessionId,
    /// Blocks staged during this editing session; a new candidate must not
    /// overlap its own staged set on either resource axis.
    drafts: Vec<Block>,
    current: Option<Candidate>,
    phase: Phase,
}

impl EditSession {
    pub fn new(engine: Arc<Engine>, session: SessionId) -> Self {
        Self {
            engine,
            session,
            drafts: Vec::new(),
            current: None,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn drafts(&self) -> &[Block] {
        &self.drafts
    }

    fn in_flight(&self) -> bool {
        matches!(
            self.phase,
            Phase::SlotProposed | Phase::Reserved | Phase::Validated
        )
    }

    /// `Idle → SlotProposed`. Slot ordering and overlap against the
    /// session's own staged blocks are checked before any reservation
    /// round trip.
    pub fn propose(&mut self, candidate: Candidate) -> Result<(), EngineError> {
        if self.in_flight() {
            return Err(EngineError::InvalidState("candidate already in flight"));
        }
        if candidate.slot.start >= candidate.slot.end {
            self.phase = Phase::Rejected;
            return Err(EngineError::InvalidSlot("start must be before end"));
        }
        for draft in &self.drafts {
            if Some(draft.id) == candidate.existing_block_id {
                continue;
            }
            let same_resource = draft.room_id == candidate.room_id
                || draft.professor_id == candidate.professor_id;
            if same_resource && candidate.slot.overlaps(&draft.slot) {
                self.phase = Phase::Rejected;
                return Err(EngineError::ConflictDetected(draft.id));
            }
        }
        self.current = Some(candidate);
        self.phase = Phase::SlotProposed;
        Ok(())
    }

    /// `SlotProposed → Reserved`. Room and professor locks are taken
    /// all-or-nothing; a rejection leaves nothing held.
    pub async fn reserve(&mut self) -> Result<(), EngineError> {
        let candidate = self.expect_phase(Phase::SlotProposed)?;
        match self
            .engine
            .reserve_pair(
                candidate.room_id,
                candidate.professor_id,
                candidate.slot,
                self.session,
            )
            .await
        {
            Ok(()) => {
                self.phase = Phase::Reserved;
                Ok(())
            }
            Err(e) => {
                self.phase = Phase::Rejected;
                Err(e)
            }
        }
    }

    /// `Reserved → Validated`, or `Rejected` with both locks released when a
    /// committed block truly overlaps.
    pub async fn validate(&mut self) -> Result<(), EngineError> {
        let candidate = self.expect_phase(Phase::Reserved)?;
        let room_hit = self
            .engine
            .has_conflict(
                crate::model::ResourceKind::Room,
                candidate.room_id,
                candidate.slot,
                candidate.window,
                candidate.existing_block_id,
            )
            .await;
        let hit = match room_hit {
            Ok(None) => {
                self.engine
                    .has_conflict(
                        crate::model::ResourceKind::Professor,
                        candidate.professor_id,
                        candidate.slot,
                        candidate.window,
                        candidate.existing_block_id,
                    )
                    .await
            }
            other => other,
        };

        match hit {
            Ok(None) => {
                self.phase = Phase::Validated;
                Ok(())
            }
            Ok(Some(block_id)) => {
                self.release_current().await;
                self.phase = Phase::Rejected;
                Err(EngineError::ConflictDetected(block_id))
            }
            Err(e) => {
                self.release_current().await;
                self.phase = Phase::Rejected;
                Err(e)
            }
        }
    }

    /// `Validated → Committed`. Persists through the storage collaborator;
    /// the engine releases both locks whether or not the write succeeds, so
    /// a persistence failure rolls back to pre-reservation.
    pub async fn commit(&mut self) -> Result<Block, EngineError> {
        let candidate = self.expect_phase(Phase::Validated)?;
        let is_update = candidate.existing_block_id.is_some();
        let block = Block {
            id: candidate.existing_block_id.unwrap_or_else(Ulid::new),
            subject_id: candidate.subject_id,
            professor_id: candidate.professor_id,
            room_id: candidate.room_id,
            schedule_id: candidate.schedule_id,
            slot: candidate.slot,
        };
        match self
            .engine
            .commit_block(block.clone(), is_update, self.session)
            .await
        {
            Ok(()) => {
                self.drafts.retain(|d| d.id != block.id);
                self.drafts.push(block.clone());
                self.current = None;
                self.phase = Phase::Committed;
                Ok(block)
            }
            Err(e) => {
                self.current = None;
                self.phase = Phase::Rejected;
                Err(e)
            }
        }
    }

    /// Abandon from any non-terminal state: releases whatever is held and
    /// returns to `Idle`.
    pub async fn abandon(&mut self) {
        if matches!(self.phase, Phase::Reserved | Phase::Validated) {
            self.release_current().await;
        }
        self.current = None;
        self.phase = Phase::Idle;
    }

    async fn release_current(&self) {
        if let Some(candidate) = &self.current {
            self.engine
                .release_pair(
                    candidate.room_id,
                    candidate.professor_id,
                    candidate.slot,
                    self.session,
                )
                .await;
        }
    }

    fn expect_phase(&self, phase: Phase) -> Result<Candidate, EngineError> {
        if self.phase != phase {
            return Err(EngineError::InvalidState("phase out of order"));
        }
        self.current
            .clone()
            .ok_or(EngineError::InvalidState("no candidate in flight"))
    }
}
