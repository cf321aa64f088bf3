use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used only for soft-lock expiry stamps.
pub type Ms = i64;

/// One editing session = one connected client.
pub type SessionId = Ulid;

/// Day of week, 1 = Monday .. 7 = Sunday. The UI's "Sunday = 0" convention is
/// normalized to 7 at this boundary; no other convention exists past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Day(u8);

impl Day {
    pub const MONDAY: Day = Day(1);
    pub const SATURDAY: Day = Day(6);
    pub const SUNDAY: Day = Day(7);

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn from_date(date: NaiveDate) -> Day {
        Day(date.weekday().number_from_monday() as u8)
    }
}

impl TryFrom<u8> for Day {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Day(7)),
            1..=7 => Ok(Day(value)),
            other => Err(format!("day of week out of range: {other}")),
        }
    }
}

impl From<Day> for u8 {
    fn from(day: Day) -> u8 {
        day.0
    }
}

impl From<Weekday> for Day {
    fn from(w: Weekday) -> Day {
        Day(w.number_from_monday() as u8)
    }
}

/// Recurring weekly interval: one day of week, `[start, end)` wall-clock.
/// A slot never crosses midnight, so same-day containment is structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub day: Day,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(day: Day, start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        Self { day, start, end }
    }

    /// Half-open overlap on the same weekday. Touching endpoints
    /// (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.day == other.day && self.start < other.end && other.start < self.end
    }
}

/// Inclusive calendar range over which a schedule's weekly pattern repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ScheduleWindow {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        debug_assert!(start_date <= end_date, "window start must not follow end");
        Self { start_date, end_date }
    }

    /// Two slots only need comparison if their owning windows intersect.
    pub fn intersects(&self, other: &ScheduleWindow) -> bool {
        self.start_date <= other.end_date && other.start_date <= self.end_date
    }

    /// Business rule enforced upstream at schedule creation: Monday start,
    /// Saturday end. Reported here so seed loading can warn on bad data.
    pub fn is_canonical(&self) -> bool {
        Day::from_date(self.start_date) == Day::MONDAY
            && Day::from_date(self.end_date) == Day::SATURDAY
    }
}

/// Rooms and professors are two instances of one reservable-resource
/// abstraction; everything downstream is keyed on this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Room,
    Professor,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Room => write!(f, "room"),
            ResourceKind::Professor => write!(f, "professor"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub id: Ulid,
}

impl ResourceKey {
    pub fn room(id: Ulid) -> Self {
        Self { kind: ResourceKind::Room, id }
    }

    pub fn professor(id: Ulid) -> Self {
        Self { kind: ResourceKind::Professor, id }
    }
}

/// Identity of one soft lock: resource plus exact weekly slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub resource: ResourceKey,
    pub slot: TimeSlot,
}

/// Ephemeral, session-owned reservation. Lives only in the lock table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftLock {
    pub slot: TimeSlot,
    pub owner: SessionId,
    pub expires_at: Ms,
}

impl SoftLock {
    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at <= now
    }
}

/// A persisted class session occurrence. Owned by the storage collaborator;
/// the engine only ever reads these (writes happen at commit, through the
/// collaborator trait).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: Ulid,
    pub subject_id: Ulid,
    pub professor_id: Ulid,
    pub room_id: Ulid,
    pub schedule_id: Ulid,
    pub slot: TimeSlot,
}

impl Block {
    /// The id this block occupies for a given resource axis.
    pub fn resource_id(&self, kind: ResourceKind) -> Ulid {
        match kind {
            ResourceKind::Room => self.room_id,
            ResourceKind::Professor => self.professor_id,
        }
    }
}

/// Per-block verdict from a conflict query. `conflict = false` entries are
/// co-resident blocks (same resource, non-overlapping time): informational
/// for the grid, never blocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResult {
    pub block_id: Ulid,
    pub slot: TimeSlot,
    pub conflict: bool,
}

/// Notification fan-out payload, broadcast per resource key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LockEvent {
    Reserved { key: LockKey, owner: SessionId },
    Released { key: LockKey, owner: SessionId },
    Expired { key: LockKey, owner: SessionId },
    BlockCommitted { block: Block },
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn day_normalizes_sunday_zero() {
        assert_eq!(Day::try_from(0).unwrap(), Day::SUNDAY);
        assert_eq!(Day::try_from(7).unwrap(), Day::SUNDAY);
        assert_eq!(Day::try_from(1).unwrap(), Day::MONDAY);
        assert!(Day::try_from(8).is_err());
    }

    #[test]
    fn day_from_date_is_monday_first() {
        // 2025-03-03 is a Monday
        assert_eq!(Day::from_date(d(2025, 3, 3)), Day::MONDAY);
        // 2025-03-09 is a Sunday
        assert_eq!(Day::from_date(d(2025, 3, 9)), Day::SUNDAY);
    }

    #[test]
    fn day_deserializes_through_normalization() {
        let day: Day = serde_json::from_str("0").unwrap();
        assert_eq!(day, Day::SUNDAY);
        assert!(serde_json::from_str::<Day>("9").is_err());
    }

    #[test]
    fn slots_on_different_days_never_overlap() {
        let a = slot(1, 9, 0, 10, 30);
        let b = slot(2, 9, 0, 10, 30);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn same_day_overlap() {
        let a = slot(1, 9, 0, 10, 30);
        let contained = slot(1, 9, 30, 10, 0);
        let straddling = slot(1, 10, 0, 11, 0);
        let disjoint = slot(1, 11, 0, 12, 0);
        assert!(a.overlaps(&contained));
        assert!(contained.overlaps(&a));
        assert!(a.overlaps(&straddling));
        assert!(!a.overlaps(&disjoint));
    }

    #[test]
    fn touching_endpoints_do_not_overlap() {
        let a = slot(1, 9, 0, 10, 30);
        let b = slot(1, 10, 30, 12, 0);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn window_intersection() {
        let spring = window((2025, 3, 3), (2025, 6, 28));
        let summer = window((2025, 6, 23), (2025, 8, 30));
        let fall = window((2025, 9, 1), (2025, 12, 20));
        assert!(spring.intersects(&summer));
        assert!(summer.intersects(&spring));
        assert!(!spring.intersects(&fall));
    }

    #[test]
    fn window_touching_edges_intersect() {
        // Inclusive dates: sharing a single day counts as intersecting.
        let a = window((2025, 3, 3), (2025, 6, 28));
        let b = ScheduleWindow::new(d(2025, 6, 28), d(2025, 8, 30));
        assert!(a.intersects(&b));
    }

    #[test]
    fn canonical_window_runs_monday_to_saturday() {
        assert!(window((2025, 3, 3), (2025, 6, 28)).is_canonical());
        // Starts on a Tuesday
        assert!(!window((2025, 3, 4), (2025, 6, 28)).is_canonical());
    }

    #[test]
    fn block_resource_axis() {
        let block = Block {
            id: Ulid::new(),
            subject_id: Ulid::new(),
            professor_id: Ulid::new(),
            room_id: Ulid::new(),
            schedule_id: Ulid::new(),
            slot: slot(1, 9, 0, 10, 30),
        };
        assert_eq!(block.resource_id(ResourceKind::Room), block.room_id);
        assert_eq!(block.resource_id(ResourceKind::Professor), block.professor_id);
    }

    #[test]
    fn slot_serde_roundtrip() {
        let s = slot(1, 9, 0, 10, 30);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("09:00:00"));
        let back: TimeSlot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
