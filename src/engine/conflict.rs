use tracing::warn;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

pub(crate) fn validate_slot(slot: &TimeSlot) -> Result<(), EngineError> {
    if slot.start >= slot.end {
        return Err(EngineError::InvalidSlot("start must be before end"));
    }
    Ok(())
}

impl Engine {
    /// Pure read query against the persisted block store: every block on the
    /// resource whose schedule window intersects the candidate window comes
    /// back with a verdict. Overlapping blocks are conflicts unless excluded;
    /// the rest are co-resident information for the grid.
    pub async fn check_conflicts(
        &self,
        kind: ResourceKind,
        resource_id: Ulid,
        slot: TimeSlot,
        window: ScheduleWindow,
        exclude_block_id: Option<Ulid>,
    ) -> Result<Vec<ConflictResult>, EngineError> {
        validate_slot(&slot)?;
        if !self.refdata.resource_exists(kind, resource_id).await {
            return Err(EngineError::ResourceNotFound(kind, resource_id));
        }

        let blocks = self
            .blocks
            .list_blocks_for_resource(kind, resource_id)
            .await
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;

        let mut results = Vec::new();
        for block in blocks {
            let Some(block_window) = self.refdata.schedule_window(block.schedule_id).await else {
                // Dangling schedule reference in the store. Not this core's
                // inconsistency to repair, so skip rather than fail the query.
                warn!(
                    "block {} references unknown schedule {}",
                    block.id, block.schedule_id
                );
                continue;
            };
            if !block_window.intersects(&window) {
                continue;
            }
            let overlap = slot.overlaps(&block.slot);
            let conflict = overlap && exclude_block_id != Some(block.id);
            if conflict {
                metrics::counter!(crate::observability::CONFLICTS_DETECTED_TOTAL).increment(1);
            }
            results.push(ConflictResult {
                block_id: block.id,
                slot: block.slot,
                conflict,
            });
        }
        Ok(results)
    }

    /// True when any result is a real conflict; the orchestrator's gate.
    pub async fn has_conflict(
        &self,
        kind: ResourceKind,
        resource_id: Ulid,
        slot: TimeSlot,
        window: ScheduleWindow,
        exclude_block_id: Option<Ulid>,
    ) -> Result<Option<Ulid>, EngineError> {
        let results = self
            .check_conflicts(kind, resource_id, slot, window, exclude_block_id)
            .await?;
        Ok(results.into_iter().find(|r| r.conflict).map(|r| r.block_id))
    }
}
