use std::sync::atomic::Ordering;

use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::draft::CancellationNote;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_slot_free, validate_blocked_range, validate_reservation};
use super::{Engine, EngineError, JournalCommand};

impl Engine {
    /// Insert a live reservation unless a live one already holds its
    /// `(advisor, date, slot)`. Check and write happen under the advisor's write lock.
    pub async fn insert_if_absent(&self, mut reservation: Reservation) -> Result<(), EngineError> {
        validate_reservation(&mut reservation)?;
        if self.index.entity_to_advisor.contains_key(&reservation.id) {
            return Err(EngineError::InvalidInput(format!(
                "duplicate reservation id: {}",
                reservation.id
            )));
        }

        let _gate = self.journal_gate.read().await;
        let state = self.advisor_entry(&reservation.advisor_id)?;
        let mut guard = state.write().await;
        if guard.entry_count() >= MAX_ENTRIES_PER_ADVISOR {
            return Err(EngineError::LimitExceeded("too many entries for advisor"));
        }
        check_slot_free(&guard, reservation.date, &reservation.slot_label, None)?;

        // Claim the code before journaling; release it if the write fails.
        let code = reservation.reference_code.clone();
        match self.index.references.entry(code.clone()) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateReference(code)),
            Entry::Vacant(slot) => {
                slot.insert(reservation.id);
            }
        }

        let event = Event::ReservationCreated { reservation };
        let result = self.persist_and_apply(&mut guard, &event).await;
        if result.is_err() {
            self.index.references.remove(&code);
        }
        result
    }

    /// Move a live reservation to `(date, slot_label)` and return it to `Pending`.
    ///
    /// Only live reservations can move; anything else reads as `NotFound`.
    /// A target already held, including by this reservation itself, is a `Conflict`.
    pub async fn relocate_if_absent(
        &self,
        id: Ulid,
        date: BookingDate,
        slot_label: &str,
    ) -> Result<Reservation, EngineError> {
        if slot_label.trim().is_empty() {
            return Err(EngineError::InvalidInput("slot label is empty".into()));
        }
        let _gate = self.journal_gate.read().await;
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard
            .reservation(id)
            .filter(|r| r.is_live())
            .ok_or(EngineError::NotFound(id))?;
        if current.date == date && current.slot_label == slot_label {
            return Err(EngineError::Conflict(id));
        }
        check_slot_free(&guard, date, slot_label, Some(id))?;

        let event = Event::ReservationMoved {
            id,
            advisor_id: guard.advisor_id.clone(),
            date,
            slot_label: slot_label.to_string(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Change a reservation's status. Setting the current status is a no-op.
    /// Making a vacated reservation live again fails if its slot was taken meanwhile.
    ///
    /// Cancelling requires a `note`; any other status must come without one
    /// and clears the note a previous cancellation left.
    pub async fn set_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
        note: Option<CancellationNote>,
    ) -> Result<Reservation, EngineError> {
        match (&note, status) {
            (Some(n), ReservationStatus::Cancelled) => {
                n.validate().map_err(EngineError::InvalidInput)?;
            }
            (None, ReservationStatus::Cancelled) => {
                return Err(EngineError::InvalidInput(
                    "cancelling a session requires a reason".into(),
                ));
            }
            (Some(_), _) => {
                return Err(EngineError::InvalidInput(format!(
                    "a cancellation reason cannot accompany status {status}"
                )));
            }
            (None, _) => {}
        }

        let _gate = self.journal_gate.read().await;
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        if current.status == status {
            return Ok(current.clone());
        }
        if status.is_live() && !current.is_live() {
            check_slot_free(&guard, current.date, &current.slot_label, Some(id))?;
        }

        let event = Event::ReservationStatusChanged {
            id,
            advisor_id: guard.advisor_id.clone(),
            status,
            note,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Declare a blocked range. Existing reservations under it are left alone;
    /// the range only removes slots from future availability.
    pub async fn block_range(&self, range: BlockedRange) -> Result<(), EngineError> {
        validate_blocked_range(&range)?;
        if self.index.entity_to_advisor.contains_key(&range.id) {
            return Err(EngineError::InvalidInput(format!("duplicate range id: {}", range.id)));
        }
        let _gate = self.journal_gate.read().await;
        let state = self.advisor_entry(&range.advisor_id)?;
        let mut guard = state.write().await;
        if guard.entry_count() >= MAX_ENTRIES_PER_ADVISOR {
            return Err(EngineError::LimitExceeded("too many entries for advisor"));
        }
        let event = Event::RangeBlocked { range };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn unblock_range(&self, id: Ulid) -> Result<BlockedRange, EngineError> {
        let _gate = self.journal_gate.read().await;
        let mut guard = self.resolve_entity_write(&id).await?;
        let range = guard
            .blocked
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::RangeUnblocked {
            id,
            advisor_id: guard.advisor_id.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(range)
    }

    /// Rewrite the journal with only the events needed to recreate the current state.
    pub async fn compact_journal(&self) -> Result<u64, EngineError> {
        let _gate = self.journal_gate.write().await;

        let mut advisor_ids: Vec<AdvisorId> = self.advisors.iter().map(|e| e.key().clone()).collect();
        advisor_ids.sort();

        let mut events = Vec::new();
        for advisor_id in &advisor_ids {
            let Some(state) = self.get_advisor(advisor_id) else {
                continue;
            };
            let guard = state.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
            events.extend(
                guard
                    .blocked
                    .iter()
                    .map(|b| Event::RangeBlocked { range: b.clone() }),
            );
        }
        let records = events.len() as u64;

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))?;

        self.reset_journal_base(records);
        tracing::info!(records, advisors = advisor_ids.len(), "journal compacted");
        Ok(records)
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Journal records that no longer describe current state: superseded
    /// status changes, moves and removed ranges. Compaction reclaims them.
    pub async fn stale_journal_records(&self) -> u64 {
        let records =
            self.journal_base.load(Ordering::Relaxed) + self.journal_appends_since_compact().await;
        let states: Vec<_> = self.advisors.iter().map(|e| e.value().clone()).collect();
        let live: u64 = futures::future::join_all(states.iter().map(|s| s.read()))
            .await
            .iter()
            .map(|guard| guard.entry_count() as u64)
            .sum();
        records.saturating_sub(live)
    }
}
