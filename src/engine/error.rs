use ulid::Ulid;

use crate::model::{ResourceKind, SessionId};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed time range, rejected before any state is touched.
    InvalidSlot(&'static str),
    /// Unknown room/professor id.
    ResourceNotFound(ResourceKind, Ulid),
    /// Soft-lock contention; recoverable by retrying or picking another slot.
    AlreadyReserved { held_by: SessionId },
    /// A committed block truly overlaps; not retryable for the same slot.
    ConflictDetected(Ulid),
    /// The write collaborator failed after validation passed.
    PersistenceFailure(String),
    LimitExceeded(&'static str),
    /// Operation issued out of phase order by the editing flow.
    InvalidState(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidSlot(msg) => write!(f, "invalid slot: {msg}"),
            EngineError::ResourceNotFound(kind, id) => {
                write!(f, "{kind} not found: {id}")
            }
            EngineError::AlreadyReserved { held_by } => {
                write!(f, "already reserved by session {held_by}")
            }
            EngineError::ConflictDetected(block_id) => {
                write!(f, "conflict with block: {block_id}")
            }
            EngineError::PersistenceFailure(msg) => {
                write!(f, "persistence failure: {msg}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
