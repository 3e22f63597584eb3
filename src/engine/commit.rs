use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::draft::BookingDraft;
use crate::limits::MAX_REFERENCE_ATTEMPTS;
use crate::model::*;
use crate::observability::{BOOKING_ATTEMPTS_TOTAL, BOOKING_DURATION_SECONDS};
use crate::policy::BookingPolicy;

use super::availability::{compute_bookable_slots, is_date_eligible};
use super::conflict::now_ms;
use super::store::{ReservationStore, StoreError};
use super::BookingFailure;

/// Identifiers of a freshly stored reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedBooking {
    pub id: Ulid,
    pub reference_code: String,
}

/// Human-facing code: `REF-` plus the last eight characters of the id,
/// which fall in the ULID's random part.
pub fn reference_code_for(id: Ulid) -> String {
    let s = id.to_string();
    format!("REF-{}", &s[s.len() - 8..])
}

fn unavailable(e: StoreError) -> BookingFailure {
    BookingFailure::StoreUnavailable(e.to_string())
}

fn record_outcome<T>(operation: &'static str, result: &Result<T, BookingFailure>, started: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(f) => f.label(),
    };
    metrics::counter!(BOOKING_ATTEMPTS_TOTAL, "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!(BOOKING_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

/// Target checks shared by commit and reschedule.
fn validate_target(
    policy: &BookingPolicy,
    advisor_id: &str,
    date: BookingDate,
    slot_label: &str,
    today: BookingDate,
) -> Result<(), BookingFailure> {
    if advisor_id.trim().is_empty() {
        return Err(BookingFailure::InvalidDraft("an advisor must be selected".into()));
    }
    if policy.slot(slot_label).is_none() {
        return Err(BookingFailure::InvalidDraft(format!("unknown time slot: {slot_label}")));
    }
    if !is_date_eligible(date, policy, today) {
        return Err(BookingFailure::InvalidDraft(format!("{date} cannot be booked")));
    }
    Ok(())
}

/// Recompute availability from state fetched now, not from what the caller saw.
async fn recheck_slot<S: ReservationStore + ?Sized>(
    store: &S,
    policy: &BookingPolicy,
    advisor_id: &str,
    date: BookingDate,
    slot_label: &str,
    today: BookingDate,
) -> Result<(), BookingFailure> {
    let reservations = store.reservations_on(advisor_id, date).await.map_err(unavailable)?;
    let blocked = store.blocked_on(advisor_id, date).await.map_err(unavailable)?;
    let free = compute_bookable_slots(advisor_id, date, policy, &reservations, &blocked, today);
    if free.iter().any(|s| s.label == slot_label) {
        Ok(())
    } else {
        debug!(advisor_id, %date, slot_label, "slot gone at re-check");
        Err(BookingFailure::SlotNoLongerAvailable)
    }
}

/// Book `slot_label` on `date` with `advisor_id` as a `Pending` reservation.
///
/// Validates the draft and target, re-fetches the advisor's day from the
/// store, and inserts through the store's conditional write. Safe to call
/// again after `SlotNoLongerAvailable`: every attempt re-validates.
pub async fn attempt_commit_booking<S: ReservationStore + ?Sized>(
    store: &S,
    policy: &BookingPolicy,
    advisor_id: &str,
    date: BookingDate,
    slot_label: &str,
    draft: &BookingDraft,
    today: BookingDate,
) -> Result<CommittedBooking, BookingFailure> {
    let started = Instant::now();
    let result = commit(store, policy, advisor_id, date, slot_label, draft, today).await;
    record_outcome("commit", &result, started);
    result
}

async fn commit<S: ReservationStore + ?Sized>(
    store: &S,
    policy: &BookingPolicy,
    advisor_id: &str,
    date: BookingDate,
    slot_label: &str,
    draft: &BookingDraft,
    today: BookingDate,
) -> Result<CommittedBooking, BookingFailure> {
    validate_target(policy, advisor_id, date, slot_label, today)?;
    draft.validate(policy).map_err(BookingFailure::InvalidDraft)?;
    recheck_slot(store, policy, advisor_id, date, slot_label, today).await?;

    for attempt in 1..=MAX_REFERENCE_ATTEMPTS {
        let id = Ulid::new();
        let reference_code = reference_code_for(id);
        let reservation = Reservation {
            id,
            reference_code: reference_code.clone(),
            advisor_id: advisor_id.to_string(),
            date,
            slot_label: slot_label.to_string(),
            status: ReservationStatus::Pending,
            draft: draft.clone(),
            created_at: now_ms(),
            cancellation: None,
        };
        match store.insert_if_absent(reservation).await {
            Ok(()) => {
                info!(advisor_id, %date, slot_label, %id, reference_code, "booking committed");
                return Ok(CommittedBooking { id, reference_code });
            }
            Err(StoreError::Conflict(holder)) => {
                warn!(advisor_id, %date, slot_label, %holder, "lost slot to a concurrent booking");
                return Err(BookingFailure::SlotNoLongerAvailable);
            }
            Err(StoreError::DuplicateReference(code)) => {
                debug!(attempt, code, "reference code collision, drawing a new one");
            }
            Err(e) => {
                warn!(advisor_id, %date, slot_label, "store rejected booking: {e}");
                return Err(unavailable(e));
            }
        }
    }
    Err(BookingFailure::StoreUnavailable(
        "could not issue a unique reference code".into(),
    ))
}

/// Move a live reservation to another date and slot of the same advisor.
/// The moved reservation returns to `Pending`.
pub async fn attempt_reschedule<S: ReservationStore + ?Sized>(
    store: &S,
    policy: &BookingPolicy,
    reservation_id: Ulid,
    new_date: BookingDate,
    new_slot_label: &str,
    today: BookingDate,
) -> Result<Reservation, BookingFailure> {
    let started = Instant::now();
    let result = reschedule(store, policy, reservation_id, new_date, new_slot_label, today).await;
    record_outcome("reschedule", &result, started);
    result
}

async fn reschedule<S: ReservationStore + ?Sized>(
    store: &S,
    policy: &BookingPolicy,
    reservation_id: Ulid,
    new_date: BookingDate,
    new_slot_label: &str,
    today: BookingDate,
) -> Result<Reservation, BookingFailure> {
    let current = match store.get_reservation(reservation_id).await {
        Ok(r) => r,
        Err(StoreError::NotFound(_)) => {
            return Err(BookingFailure::InvalidDraft(format!(
                "no reservation with id {reservation_id}"
            )));
        }
        Err(e) => return Err(unavailable(e)),
    };
    if !current.is_live() {
        return Err(BookingFailure::InvalidDraft(format!(
            "a {} session cannot be rescheduled",
            current.status
        )));
    }
    if current.date == new_date && current.slot_label == new_slot_label {
        return Err(BookingFailure::InvalidDraft(
            "the session already holds that slot".into(),
        ));
    }
    let advisor_id = current.advisor_id.as_str();
    validate_target(policy, advisor_id, new_date, new_slot_label, today)?;
    recheck_slot(store, policy, advisor_id, new_date, new_slot_label, today).await?;

    match store
        .relocate_if_absent(reservation_id, new_date, new_slot_label)
        .await
    {
        Ok(moved) => {
            info!(
                advisor_id,
                %reservation_id,
                from = %current.date,
                to = %new_date,
                slot = new_slot_label,
                "session rescheduled"
            );
            Ok(moved)
        }
        Err(StoreError::Conflict(holder)) => {
            warn!(advisor_id, %new_date, new_slot_label, %holder, "lost slot while rescheduling");
            Err(BookingFailure::SlotNoLongerAvailable)
        }
        Err(StoreError::NotFound(_)) => Err(BookingFailure::InvalidDraft(
            "the session is no longer active".into(),
        )),
        Err(e) => Err(unavailable(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_code_shape() {
        let id = Ulid::new();
        let code = reference_code_for(id);
        assert_eq!(code.len(), 12);
        assert!(code.starts_with("REF-"));
        assert!(id.to_string().ends_with(&code[4..]));
    }
}
