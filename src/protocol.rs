//! The request/response contract an editing session speaks. One JSON object
//! per line; the caller tags each request with a correlation id and the
//! matching response echoes it. Server-pushed events use id 0.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{ConflictResult, LockEvent, ResourceKind, ScheduleWindow, TimeSlot};

/// Correlation id reserved for server-initiated pushes.
pub const EVENT_ID: u64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    ReserveRoom {
        room_id: Ulid,
        slot: TimeSlot,
    },
    ReleaseRoom {
        room_id: Ulid,
        slot: TimeSlot,
    },
    ReserveProfessor {
        professor_id: Ulid,
        slot: TimeSlot,
    },
    ReleaseProfessor {
        professor_id: Ulid,
        slot: TimeSlot,
    },
    CheckRoomConflicts {
        room_id: Ulid,
        slot: TimeSlot,
        window: ScheduleWindow,
        #[serde(default)]
        exclude_block_id: Option<Ulid>,
    },
    CheckProfessorConflicts {
        professor_id: Ulid,
        slot: TimeSlot,
        window: ScheduleWindow,
        #[serde(default)]
        exclude_block_id: Option<Ulid>,
    },
    ClearSessionBuffer,
    Watch {
        kind: ResourceKind,
        resource_id: Ulid,
    },
    Unwatch {
        kind: ResourceKind,
        resource_id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Response {
    Ok,
    Ack,
    Rejected {
        reason: String,
    },
    Conflicts {
        results: Vec<ConflictResult>,
    },
    Error {
        message: String,
    },
    Event {
        #[serde(flatten)]
        event: LockEvent,
    },
}

impl Response {
    /// Contention is a normal protocol outcome (`rejected`); everything else
    /// in the taxonomy surfaces as an `error`.
    pub fn from_engine_error(e: EngineError) -> Response {
        match e {
            EngineError::AlreadyReserved { .. } => Response::Rejected {
                reason: "already-reserved".into(),
            },
            other => Response::Error {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn reply(id: u64, response: Response) -> Self {
        Self { id, response }
    }

    pub fn event(event: LockEvent) -> Self {
        Self {
            id: EVENT_ID,
            response: Response::Event { event },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::*;
    use crate::model::{LockKey, ResourceKey, SessionId};

    #[test]
    fn reserve_room_line_parses() {
        let line = r#"{"id":7,"type":"reserve-room","room_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","slot":{"day":1,"start":"09:00:00","end":"10:30:00"}}"#;
        let env: RequestEnvelope = serde_json::from_str(line).unwrap();
        assert_eq!(env.id, 7);
        match env.request {
            Request::ReserveRoom { slot: parsed, .. } => {
                assert_eq!(parsed, slot(1, 9, 0, 10, 30))
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn sunday_zero_normalized_on_the_wire() {
        let line = r#"{"id":1,"type":"reserve-room","room_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","slot":{"day":0,"start":"09:00:00","end":"10:30:00"}}"#;
        let env: RequestEnvelope = serde_json::from_str(line).unwrap();
        match env.request {
            Request::ReserveRoom { slot, .. } => assert_eq!(slot.day.number(), 7),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn check_conflicts_exclude_defaults_to_none() {
        let line = r#"{"id":2,"type":"check-room-conflicts","room_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","slot":{"day":1,"start":"09:00:00","end":"10:30:00"},"window":{"start_date":"2025-03-03","end_date":"2025-06-28"}}"#;
        let env: RequestEnvelope = serde_json::from_str(line).unwrap();
        match env.request {
            Request::CheckRoomConflicts { exclude_block_id, .. } => {
                assert!(exclude_block_id.is_none())
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn rejected_response_shape() {
        let env = ResponseEnvelope::reply(
            3,
            Response::Rejected { reason: "already-reserved".into() },
        );
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(
            json,
            r#"{"id":3,"type":"rejected","reason":"already-reserved"}"#
        );
    }

    #[test]
    fn event_envelope_uses_reserved_id() {
        let resource = ResourceKey::room(ulid::Ulid::new());
        let env = ResponseEnvelope::event(LockEvent::Reserved {
            key: LockKey { resource, slot: slot(1, 9, 0, 10, 30) },
            owner: SessionId::new(),
        });
        assert_eq!(env.id, EVENT_ID);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""type":"event""#));
        assert!(json.contains(r#""event":"reserved""#));
    }

    #[test]
    fn envelope_roundtrip() {
        let env = RequestEnvelope {
            id: 9,
            request: Request::ClearSessionBuffer,
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
