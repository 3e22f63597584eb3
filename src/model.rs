use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::draft::{BookingDraft, CancellationNote};

/// Unix milliseconds. Only used for audit timestamps, never for eligibility.
pub type Ms = i64;

/// Advisor identifiers are issued by the external identity provider.
pub type AdvisorId = String;

/// Calendar date of a session. Timezone-naive: every comparison is a
/// local-calendar comparison, never an instant comparison.
pub type BookingDate = NaiveDate;

/// Parse a wall-clock `HH:MM` value.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Half-open interval `[start, end)` of wall-clock time within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// One entry of the daily slot catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub label: String,
    pub span: Span,
}

impl TimeSlot {
    pub fn new(label: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            label: label.into(),
            span: Span::new(start, end),
        }
    }

    /// Build a slot from a `HH:MM-HH:MM` label.
    pub fn from_label(label: &str) -> Option<Self> {
        let (start, end) = label.split_once('-')?;
        let start = parse_clock(start)?;
        let end = parse_clock(end)?;
        if start >= end {
            return None;
        }
        Some(Self::new(label.trim(), start, end))
    }
}

/// Lifecycle of a session. Transitions are driven by external flows
/// (advisor evaluation, cancellation); the resolver only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    ToComplete,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    /// Live reservations occupy their slot; every other status vacates it.
    pub fn is_live(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::Completed => "Completed",
            ReservationStatus::ToComplete => "ToComplete",
            ReservationStatus::Cancelled => "Cancelled",
            ReservationStatus::NoShow => "NoShow",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "completed" => Ok(ReservationStatus::Completed),
            "tocomplete" => Ok(ReservationStatus::ToComplete),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            "noshow" => Ok(ReservationStatus::NoShow),
            _ => Err(format!("unknown reservation status: {s}")),
        }
    }
}

/// A session occupying one `(date, slot)` pair of one advisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub reference_code: String,
    pub advisor_id: AdvisorId,
    pub date: BookingDate,
    pub slot_label: String,
    pub status: ReservationStatus,
    pub draft: BookingDraft,
    pub created_at: Ms,
    /// Set while the session is `Cancelled`.
    pub cancellation: Option<CancellationNote>,
}

impl Reservation {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// True if this reservation currently holds `slot_label` on `date` for `advisor_id`.
    pub fn occupies(&self, advisor_id: &str, date: BookingDate, slot_label: &str) -> bool {
        self.is_live()
            && self.advisor_id == advisor_id
            && self.date == date
            && self.slot_label == slot_label
    }
}

/// Advisor-declared exclusion on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRange {
    pub id: Ulid,
    pub advisor_id: AdvisorId,
    pub date: BookingDate,
    pub span: Span,
    pub reason: String,
    pub details: Option<String>,
}

/// Everything the store knows about one advisor.
#[derive(Debug, Clone)]
pub struct AdvisorState {
    pub advisor_id: AdvisorId,
    /// Sorted by `date`; insertion order is kept within a date.
    pub reservations: Vec<Reservation>,
    /// Sorted by `date`; insertion order is kept within a date.
    pub blocked: Vec<BlockedRange>,
}

impl AdvisorState {
    pub fn new(advisor_id: AdvisorId) -> Self {
        Self {
            advisor_id,
            reservations: Vec::new(),
            blocked: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.reservations.len() + self.blocked.len()
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.date <= reservation.date);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn insert_blocked(&mut self, range: BlockedRange) {
        let pos = self.blocked.partition_point(|b| b.date <= range.date);
        self.blocked.insert(pos, range);
    }

    pub fn remove_blocked(&mut self, id: Ulid) -> Option<BlockedRange> {
        let pos = self.blocked.iter().position(|b| b.id == id)?;
        Some(self.blocked.remove(pos))
    }

    /// All reservations on `date`, any status. Binary search over the date order.
    pub fn reservations_on(&self, date: BookingDate) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.date < date);
        let hi = self.reservations.partition_point(|r| r.date <= date);
        &self.reservations[lo..hi]
    }

    pub fn blocked_on(&self, date: BookingDate) -> &[BlockedRange] {
        let lo = self.blocked.partition_point(|b| b.date < date);
        let hi = self.blocked.partition_point(|b| b.date <= date);
        &self.blocked[lo..hi]
    }

    /// The live reservation holding `slot_label` on `date`, if any.
    pub fn live_holder(&self, date: BookingDate, slot_label: &str) -> Option<&Reservation> {
        self.reservations_on(date)
            .iter()
            .find(|r| r.is_live() && r.slot_label == slot_label)
    }
}

/// Journal record format. One variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        advisor_id: AdvisorId,
        status: ReservationStatus,
        note: Option<CancellationNote>,
    },
    ReservationMoved {
        id: Ulid,
        advisor_id: AdvisorId,
        date: BookingDate,
        slot_label: String,
    },
    RangeBlocked {
        range: BlockedRange,
    },
    RangeUnblocked {
        id: Ulid,
        advisor_id: AdvisorId,
    },
}

impl Event {
    pub fn advisor_id(&self) -> &str {
        match self {
            Event::ReservationCreated { reservation } => &reservation.advisor_id,
            Event::RangeBlocked { range } => &range.advisor_id,
            Event::ReservationStatusChanged { advisor_id, .. }
            | Event::ReservationMoved { advisor_id, .. }
            | Event::RangeUnblocked { advisor_id, .. } => advisor_id,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ReservationCreated { .. } => "reservation_created",
            Event::ReservationStatusChanged { .. } => "reservation_status_changed",
            Event::ReservationMoved { .. } => "reservation_moved",
            Event::RangeBlocked { .. } => "range_blocked",
            Event::RangeUnblocked { .. } => "range_unblocked",
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(clock("08:00"), clock("09:00"));
        let b = Span::new(clock("08:30"), clock("09:30"));
        let c = Span::new(clock("09:00"), clock("10:00"));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert_eq!(a.minutes(), 60);
    }

    #[test]
    fn slot_from_label() {
        let slot = TimeSlot::from_label("08:00-09:00").unwrap();
        assert_eq!(slot.label, "08:00-09:00");
        assert_eq!(slot.span, Span::new(clock("08:00"), clock("09:00")));

        let spaced = TimeSlot::from_label("08:00 - 09:00").unwrap();
        assert_eq!(spaced.span.end, clock("09:00"));

        assert!(TimeSlot::from_label("09:00-08:00").is_none());
        assert!(TimeSlot::from_label("08:00").is_none());
        assert!(TimeSlot::from_label("8am-9am").is_none());
    }

    #[test]
    fn live_statuses() {
        assert!(ReservationStatus::Pending.is_live());
        assert!(ReservationStatus::Confirmed.is_live());
        for s in [
            ReservationStatus::Completed,
            ReservationStatus::ToComplete,
            ReservationStatus::Cancelled,
            ReservationStatus::NoShow,
        ] {
            assert!(!s.is_live(), "{s} must vacate its slot");
        }
    }

    #[test]
    fn status_parse_accepts_ui_spellings() {
        assert_eq!("To Complete".parse::<ReservationStatus>(), Ok(ReservationStatus::ToComplete));
        assert_eq!("no-show".parse::<ReservationStatus>(), Ok(ReservationStatus::NoShow));
        assert_eq!("canceled".parse::<ReservationStatus>(), Ok(ReservationStatus::Cancelled));
        assert_eq!("Confirmed".parse::<ReservationStatus>(), Ok(ReservationStatus::Confirmed));
        assert!("Done".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn reservations_kept_in_date_order() {
        let mut st = AdvisorState::new("adv".into());
        let d1 = date(2025, 3, 3);
        let d2 = date(2025, 3, 4);
        let d3 = date(2025, 3, 5);
        st.insert_reservation(reservation("adv", d3, "08:00-09:00", ReservationStatus::Pending));
        st.insert_reservation(reservation("adv", d1, "08:00-09:00", ReservationStatus::Pending));
        st.insert_reservation(reservation("adv", d2, "10:00-11:00", ReservationStatus::Pending));
        st.insert_reservation(reservation("adv", d2, "08:00-09:00", ReservationStatus::Cancelled));

        let dates: Vec<_> = st.reservations.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d1, d2, d2, d3]);

        let on_d2 = st.reservations_on(d2);
        assert_eq!(on_d2.len(), 2);
        assert_eq!(on_d2[0].slot_label, "10:00-11:00"); // insertion order within a date
        assert!(st.reservations_on(date(2025, 3, 6)).is_empty());
    }

    #[test]
    fn live_holder_ignores_vacated() {
        let mut st = AdvisorState::new("adv".into());
        let d = date(2025, 3, 3);
        st.insert_reservation(reservation("adv", d, "08:00-09:00", ReservationStatus::Cancelled));
        assert!(st.live_holder(d, "08:00-09:00").is_none());

        let live = reservation("adv", d, "08:00-09:00", ReservationStatus::Confirmed);
        let live_id = live.id;
        st.insert_reservation(live);
        assert_eq!(st.live_holder(d, "08:00-09:00").map(|r| r.id), Some(live_id));
    }

    #[test]
    fn remove_and_lookup() {
        let mut st = AdvisorState::new("adv".into());
        let d = date(2025, 3, 3);
        let r = reservation("adv", d, "08:00-09:00", ReservationStatus::Pending);
        let id = r.id;
        st.insert_reservation(r);
        let b = blocked("adv", d, "12:00", "13:00");
        let bid = b.id;
        st.insert_blocked(b);
        assert_eq!(st.entry_count(), 2);
        assert_eq!(st.blocked_on(d).len(), 1);

        assert!(st.remove_reservation(Ulid::new()).is_none());
        assert_eq!(st.remove_reservation(id).map(|r| r.id), Some(id));
        assert!(st.reservation(id).is_none());
        assert_eq!(st.remove_blocked(bid).map(|b| b.id), Some(bid));
        assert_eq!(st.entry_count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation("adv", date(2025, 3, 3), "08:00-09:00", ReservationStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.advisor_id(), "adv");
        assert_eq!(decoded.kind(), "reservation_created");
    }
}
