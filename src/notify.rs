use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{AdvisorId, Event};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for state changes, one channel per advisor. Availability
/// views subscribe to an advisor and recompute when anything changes.
pub struct NotifyHub {
    channels: DashMap<AdvisorId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes for an advisor. Creates the channel if needed.
    pub fn subscribe(&self, advisor_id: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(advisor_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, advisor_id: &str, event: &Event) {
        if let Some(sender) = self.channels.get(advisor_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::ReservationStatus;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("adv");

        let event = Event::RangeBlocked {
            range: blocked("adv", date(2025, 3, 4), "08:00", "09:00"),
        };
        hub.send("adv", &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn other_advisors_not_notified() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("a");
        hub.send(
            "b",
            &Event::RangeUnblocked {
                id: ulid::Ulid::new(),
                advisor_id: "b".into(),
            },
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let r = reservation("adv", date(2025, 3, 4), "08:00-09:00", ReservationStatus::Pending);
        // No subscriber: must not panic.
        hub.send("adv", &Event::ReservationCreated { reservation: r });
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe("adv");
        hub.prune();
        assert_eq!(hub.channels.len(), 1);
        drop(rx);
        hub.prune();
        assert!(hub.channels.is_empty());
    }
}
