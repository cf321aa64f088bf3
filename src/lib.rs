pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod protocol;
pub mod reaper;
pub mod session;
pub mod store;
pub mod wire;

pub use engine::{Engine, EngineError};
pub use model::{
    Block, ConflictResult, Day, LockKey, ResourceKey, ResourceKind, ScheduleWindow, SessionId,
    TimeSlot,
};
