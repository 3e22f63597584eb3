use chrono::Local;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Today's date on the local calendar. Callers that need determinism pass
/// `today` explicitly instead.
pub fn today_local() -> BookingDate {
    Local::now().date_naive()
}

/// Fails with the holder's id if a live reservation other than `except`
/// already holds `slot_label` on `date`.
pub(crate) fn check_slot_free(
    state: &AdvisorState,
    date: BookingDate,
    slot_label: &str,
    except: Option<ulid::Ulid>,
) -> Result<(), EngineError> {
    match state
        .reservations_on(date)
        .iter()
        .find(|r| r.occupies(&state.advisor_id, date, slot_label) && Some(r.id) != except)
    {
        Some(holder) => Err(EngineError::Conflict(holder.id)),
        None => Ok(()),
    }
}

/// Canonical form of a reference code: trimmed, ASCII upper-case.
pub(crate) fn normalize_reference(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Checks a new reservation and rewrites its reference code to canonical form,
/// so lookups match whatever case the caller supplied.
pub(crate) fn validate_reservation(r: &mut Reservation) -> Result<(), EngineError> {
    if r.slot_label.trim().is_empty() {
        return Err(EngineError::InvalidInput("slot label is empty".into()));
    }
    r.reference_code = normalize_reference(&r.reference_code);
    if r.reference_code.is_empty() {
        return Err(EngineError::InvalidInput("reference code is empty".into()));
    }
    if !r.is_live() {
        return Err(EngineError::InvalidInput(format!(
            "new reservations must be live, got {}",
            r.status
        )));
    }
    Ok(())
}

pub(crate) fn validate_blocked_range(range: &BlockedRange) -> Result<(), EngineError> {
    if range.span.start >= range.span.end {
        return Err(EngineError::InvalidInput("blocked range must end after it starts".into()));
    }
    if range.reason.trim().is_empty() {
        return Err(EngineError::InvalidInput("blocked range needs a reason".into()));
    }
    if range.reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("block reason too long"));
    }
    if let Some(details) = &range.details
        && details.len() > MAX_COMMENT_LEN
    {
        return Err(EngineError::LimitExceeded("block details too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[test]
    fn slot_free_ignores_vacated_and_self() {
        let mut st = AdvisorState::new("adv".into());
        let d = date(2025, 3, 4);
        st.insert_reservation(reservation("adv", d, "08:00-09:00", ReservationStatus::NoShow));
        assert!(check_slot_free(&st, d, "08:00-09:00", None).is_ok());

        let live = reservation("adv", d, "08:00-09:00", ReservationStatus::Pending);
        let id = live.id;
        st.insert_reservation(live);
        assert_eq!(
            check_slot_free(&st, d, "08:00-09:00", None),
            Err(EngineError::Conflict(id))
        );
        assert!(check_slot_free(&st, d, "08:00-09:00", Some(id)).is_ok());
        assert!(check_slot_free(&st, d, "09:00-10:00", None).is_ok());
    }

    #[test]
    fn blocked_range_checks() {
        let d = date(2025, 3, 4);
        assert!(validate_blocked_range(&blocked("adv", d, "08:00", "09:00")).is_ok());

        let mut no_reason = blocked("adv", d, "08:00", "09:00");
        no_reason.reason = "  ".into();
        assert!(matches!(
            validate_blocked_range(&no_reason),
            Err(EngineError::InvalidInput(_))
        ));

        let mut reversed = blocked("adv", d, "08:00", "09:00");
        reversed.span = Span {
            start: clock("10:00"),
            end: clock("09:00"),
        };
        assert!(validate_blocked_range(&reversed).is_err());

        let mut long = blocked("adv", d, "08:00", "09:00");
        long.details = Some("x".repeat(MAX_COMMENT_LEN + 1));
        assert_eq!(
            validate_blocked_range(&long),
            Err(EngineError::LimitExceeded("block details too long"))
        );
    }

    #[test]
    fn new_reservations_must_be_live() {
        let mut r = reservation("adv", date(2025, 3, 4), "08:00-09:00", ReservationStatus::Cancelled);
        assert!(validate_reservation(&mut r).is_err());
    }

    #[test]
    fn reference_code_is_stored_upper_case() {
        let mut r = reservation("adv", date(2025, 3, 4), "08:00-09:00", ReservationStatus::Pending);
        r.reference_code = "  ref-01ab23cd ".into();
        validate_reservation(&mut r).unwrap();
        assert_eq!(r.reference_code, "REF-01AB23CD");

        r.reference_code = "   ".into();
        assert!(validate_reservation(&mut r).is_err());
    }
}
