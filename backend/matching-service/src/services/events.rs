use event_schema::{EventEnvelope, MatchingEvent};
use tokio::sync::broadcast;
use tracing::debug;

pub const EVENT_SOURCE: &str = "matching-service";

pub type MatchingEnvelope = EventEnvelope<MatchingEvent>;

/// Fire-and-forget fan-out of committed matching events.
///
/// Publishing never blocks. Slow subscribers lag and lose the oldest
/// events; that is acceptable for notifications.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<MatchingEnvelope>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchingEnvelope> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: MatchingEvent) {
        let event_type = event.event_type();
        match self.sender.send(EventEnvelope::new(EVENT_SOURCE, event)) {
            Ok(receivers) => debug!(event_type, receivers, "event published"),
            // No subscriber attached; nothing to deliver
            Err(_) => debug!(event_type, "event dropped, no subscribers"),
        }
    }
}
