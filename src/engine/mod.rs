mod availability;
mod commit;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{
    blocked_windows, compute_bookable_dates, compute_bookable_slots, is_date_eligible,
    merge_overlapping,
};
pub use commit::{attempt_commit_booking, attempt_reschedule, CommittedBooking};
pub use conflict::today_local;
pub use error::{BookingFailure, EngineError};
pub use store::{ReservationStore, StoreError};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::journal::Journal;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;

pub type SharedAdvisorState = Arc<RwLock<AdvisorState>>;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch; on failure roll the file back
///    to the last synced record.
/// 5. Respond to all senders with the batch result.
///
/// If a rollback fails the loop exits, so no later append is acknowledged
/// behind bytes that replay would stop at.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush what we have before a compaction sees the file.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !flush_and_respond(&mut journal, &mut batch) {
                    break;
                }
                if let Some(other) = deferred {
                    handle_non_append(&mut journal, other);
                }
            }
            other => handle_non_append(&mut journal, other),
        }
    }
    tracing::debug!("journal writer stopped");
}

type QueuedAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Returns false when the journal could not be repaired after a failed batch.
fn flush_and_respond(journal: &mut Journal, batch: &mut Vec<QueuedAppend>) -> bool {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(journal, batch);
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    let mut healthy = true;
    if let Err(e) = &result {
        tracing::warn!(batch = batch.len(), "journal flush failed: {e}");
        if let Err(repair) = journal.rollback() {
            tracing::error!(
                path = %journal.path().display(),
                "journal rollback failed, refusing further writes: {repair}"
            );
            healthy = false;
        }
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
    healthy
}

/// Nothing is acknowledged unless every record of the batch reached disk;
/// on error the caller rolls the journal back.
fn flush_batch(journal: &mut Journal, batch: &[QueuedAppend]) -> io::Result<()> {
    for (event, _) in batch {
        journal.append_buffered(event)?;
    }
    journal.flush_sync()
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        // Appends are always taken by the batching loop.
        JournalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside batch")));
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Secondary lookups maintained alongside the per-advisor state.
#[derive(Default)]
pub(super) struct Indexes {
    /// Reservation or blocked-range id → owning advisor.
    pub(super) entity_to_advisor: DashMap<Ulid, AdvisorId>,
    /// Issued reference code → reservation id. Codes stay reserved after cancellation.
    pub(super) references: DashMap<String, Ulid>,
}

/// The shipped reservation store: in-memory state per advisor, persisted
/// through an append-only journal and replayed on start-up.
pub struct Engine {
    pub(super) advisors: DashMap<AdvisorId, SharedAdvisorState>,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) index: Indexes,
    /// Records in the journal as of start-up or the last compaction.
    pub(super) journal_base: AtomicU64,
    /// Writers hold it shared before taking an advisor lock; compaction holds
    /// it exclusively so no append lands between its snapshot and the swap.
    pub(super) journal_gate: RwLock<()>,
}

/// Apply an event to one advisor's state (no locking; caller holds the lock).
fn apply_to_advisor(state: &mut AdvisorState, event: &Event, index: &Indexes) {
    match event {
        Event::ReservationCreated { reservation } => {
            index
                .entity_to_advisor
                .insert(reservation.id, reservation.advisor_id.clone());
            index
                .references
                .insert(reservation.reference_code.clone(), reservation.id);
            state.insert_reservation(reservation.clone());
        }
        Event::ReservationStatusChanged {
            id, status, note, ..
        } => {
            if let Some(r) = state.reservation_mut(*id) {
                r.status = *status;
                r.cancellation = note.clone();
            }
        }
        Event::ReservationMoved {
            id, date, slot_label, ..
        } => {
            // Re-insert to keep the date order.
            if let Some(mut r) = state.remove_reservation(*id) {
                r.date = *date;
                r.slot_label = slot_label.clone();
                r.status = ReservationStatus::Pending;
                state.insert_reservation(r);
            }
        }
        Event::RangeBlocked { range } => {
            index
                .entity_to_advisor
                .insert(range.id, range.advisor_id.clone());
            state.insert_blocked(range.clone());
        }
        Event::RangeUnblocked { id, .. } => {
            state.remove_blocked(*id);
            index.entity_to_advisor.remove(id);
        }
    }
}

impl Engine {
    /// Replay the journal at `journal_path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(journal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let replay = Journal::replay(&journal_path)?;
        if replay.discarded > 0 {
            tracing::warn!(
                path = %journal_path.display(),
                discarded = replay.discarded,
                "journal has a torn or corrupt tail; truncating"
            );
        }
        let journal = Journal::open(&journal_path, replay.valid_len)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        // Sole owner during replay: build plain state first, share it afterwards.
        let index = Indexes::default();
        let mut states: HashMap<AdvisorId, AdvisorState> = HashMap::new();
        for event in &replay.events {
            let state = states
                .entry(event.advisor_id().to_string())
                .or_insert_with(|| AdvisorState::new(event.advisor_id().to_string()));
            apply_to_advisor(state, event, &index);
        }

        let advisors = DashMap::new();
        for (id, state) in states {
            advisors.insert(id, Arc::new(RwLock::new(state)));
        }
        tracing::debug!(
            events = replay.events.len(),
            advisors = advisors.len(),
            "journal replayed"
        );

        Ok(Self {
            advisors,
            journal_tx,
            notify,
            index,
            journal_base: AtomicU64::new(replay.events.len() as u64),
            journal_gate: RwLock::new(()),
        })
    }

    /// Write event to the journal via the background group-commit writer.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub fn get_advisor(&self, advisor_id: &str) -> Option<SharedAdvisorState> {
        self.advisors.get(advisor_id).map(|e| e.value().clone())
    }

    pub fn get_advisor_for_entity(&self, entity_id: &Ulid) -> Option<AdvisorId> {
        self.index.entity_to_advisor.get(entity_id).map(|e| e.value().clone())
    }

    /// The advisor's state, created empty on first write.
    pub(super) fn advisor_entry(&self, advisor_id: &str) -> Result<SharedAdvisorState, EngineError> {
        if let Some(state) = self.get_advisor(advisor_id) {
            return Ok(state);
        }
        if advisor_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("advisor id is empty".into()));
        }
        if advisor_id.len() > MAX_ADVISOR_ID_LEN {
            return Err(EngineError::LimitExceeded("advisor id too long"));
        }
        if self.advisors.len() >= MAX_ADVISORS {
            return Err(EngineError::LimitExceeded("too many advisors"));
        }
        let state = self
            .advisors
            .entry(advisor_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(AdvisorState::new(advisor_id.to_string()))));
        Ok(state.value().clone())
    }

    /// Journal-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut AdvisorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_advisor(state, event, &self.index);
        self.notify.send(&state.advisor_id, event);
        metrics::counter!(crate::observability::EVENTS_APPLIED_TOTAL, "kind" => event.kind())
            .increment(1);
        Ok(())
    }

    /// Lookup entity → advisor, get advisor state, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<AdvisorState>, EngineError> {
        let advisor_id = self
            .get_advisor_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let state = self
            .get_advisor(&advisor_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        Ok(state.write_owned().await)
    }

    pub(super) fn reset_journal_base(&self, records: u64) {
        self.journal_base.store(records, Ordering::Relaxed);
    }
}
