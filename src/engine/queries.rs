use ulid::Ulid;

use crate::model::*;
use crate::policy::BookingPolicy;

use super::availability::{compute_bookable_dates, compute_bookable_slots};
use super::conflict::normalize_reference;
use super::Engine;

impl Engine {
    /// All reservations of `advisor_id` on `date`, any status. Unknown advisors have none.
    pub async fn reservations_on(&self, advisor_id: &str, date: BookingDate) -> Vec<Reservation> {
        let Some(state) = self.get_advisor(advisor_id) else {
            return Vec::new();
        };
        let guard = state.read().await;
        guard.reservations_on(date).to_vec()
    }

    pub async fn blocked_on(&self, advisor_id: &str, date: BookingDate) -> Vec<BlockedRange> {
        let Some(state) = self.get_advisor(advisor_id) else {
            return Vec::new();
        };
        let guard = state.read().await;
        guard.blocked_on(date).to_vec()
    }

    /// Every reservation of the advisor, sorted by date then slot label.
    pub async fn reservations_for(&self, advisor_id: &str) -> Vec<Reservation> {
        let Some(state) = self.get_advisor(advisor_id) else {
            return Vec::new();
        };
        let mut out = state.read().await.reservations.clone();
        out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.slot_label.cmp(&b.slot_label)));
        out
    }

    /// Every blocked range of the advisor, sorted by date then start time.
    pub async fn blocked_for(&self, advisor_id: &str) -> Vec<BlockedRange> {
        let Some(state) = self.get_advisor(advisor_id) else {
            return Vec::new();
        };
        let mut out = state.read().await.blocked.clone();
        out.sort_by_key(|b| (b.date, b.span.start));
        out
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let advisor_id = self.get_advisor_for_entity(id)?;
        let state = self.get_advisor(&advisor_id)?;
        let guard = state.read().await;
        guard.reservation(*id).cloned()
    }

    /// Look a reservation up by its reference code. Case and surrounding
    /// whitespace are ignored.
    pub async fn find_by_reference(&self, code: &str) -> Option<Reservation> {
        let id = self.index.references.get(&normalize_reference(code)).map(|e| *e.value())?;
        self.get_reservation(&id).await
    }

    pub fn advisor_ids(&self) -> Vec<AdvisorId> {
        let mut ids: Vec<AdvisorId> = self.advisors.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Advisory read: bookable dates from a snapshot taken under the read lock.
    /// A commit re-checks against fresh state regardless.
    pub async fn bookable_dates(
        &self,
        advisor_id: &str,
        policy: &BookingPolicy,
        today: BookingDate,
    ) -> Vec<BookingDate> {
        match self.get_advisor(advisor_id) {
            Some(state) => {
                let guard = state.read().await;
                compute_bookable_dates(advisor_id, policy, &guard.reservations, &guard.blocked, today)
            }
            None => compute_bookable_dates(advisor_id, policy, &[], &[], today),
        }
    }

    /// Advisory read: free slots on `date`, in catalog order.
    pub async fn bookable_slots(
        &self,
        advisor_id: &str,
        date: BookingDate,
        policy: &BookingPolicy,
        today: BookingDate,
    ) -> Vec<TimeSlot> {
        match self.get_advisor(advisor_id) {
            Some(state) => {
                let guard = state.read().await;
                compute_bookable_slots(
                    advisor_id,
                    date,
                    policy,
                    guard.reservations_on(date),
                    guard.blocked_on(date),
                    today,
                )
            }
            None => compute_bookable_slots(advisor_id, date, policy, &[], &[], today),
        }
    }
}
