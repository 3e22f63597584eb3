use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Errors a reservation store reports to the commit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A live reservation already holds the target slot.
    Conflict(Ulid),
    DuplicateReference(String),
    NotFound(Ulid),
    /// I/O or capacity failure; the write did not happen.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict(id) => write!(f, "slot held by reservation: {id}"),
            StoreError::DuplicateReference(code) => {
                write!(f, "reference code already issued: {code}")
            }
            StoreError::NotFound(id) => write!(f, "reservation not found: {id}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Conflict(id) => StoreError::Conflict(id),
            EngineError::DuplicateReference(code) => StoreError::DuplicateReference(code),
            EngineError::NotFound(id) => StoreError::NotFound(id),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Authoritative source of reservations and blocked ranges.
///
/// The two conditional writes must be atomic with respect to "at most one
/// live reservation per `(advisor, date, slot)`": check and write happen
/// under one critical section.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// All reservations of `advisor_id` on `date`, any status.
    async fn reservations_on(
        &self,
        advisor_id: &str,
        date: BookingDate,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Blocked ranges of `advisor_id` on `date`.
    async fn blocked_on(
        &self,
        advisor_id: &str,
        date: BookingDate,
    ) -> Result<Vec<BlockedRange>, StoreError>;

    /// Insert a live reservation unless its slot is already held.
    async fn insert_if_absent(&self, reservation: Reservation) -> Result<(), StoreError>;

    /// Move a live reservation to `(date, slot_label)` unless that slot is held.
    /// The moved reservation returns to `Pending`.
    async fn relocate_if_absent(
        &self,
        id: Ulid,
        date: BookingDate,
        slot_label: &str,
    ) -> Result<Reservation, StoreError>;

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError>;
}

#[async_trait]
impl ReservationStore for Engine {
    async fn reservations_on(
        &self,
        advisor_id: &str,
        date: BookingDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(Engine::reservations_on(self, advisor_id, date).await)
    }

    async fn blocked_on(
        &self,
        advisor_id: &str,
        date: BookingDate,
    ) -> Result<Vec<BlockedRange>, StoreError> {
        Ok(Engine::blocked_on(self, advisor_id, date).await)
    }

    async fn insert_if_absent(&self, reservation: Reservation) -> Result<(), StoreError> {
        Ok(Engine::insert_if_absent(self, reservation).await?)
    }

    async fn relocate_if_absent(
        &self,
        id: Ulid,
        date: BookingDate,
        slot_label: &str,
    ) -> Result<Reservation, StoreError> {
        Ok(Engine::relocate_if_absent(self, id, date, slot_label).await?)
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        Engine::get_reservation(self, &id)
            .await
            .ok_or(StoreError::NotFound(id))
    }
}
