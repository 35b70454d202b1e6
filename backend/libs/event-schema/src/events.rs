//! Matching notification events
//!
//! These are fire-and-forget signals for the notification collaborator.
//! They describe something that already committed; consumers must not
//! assume delivery ordering across different actor pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkSentEvent {
    pub spark_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoOfferedEvent {
    pub echo_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub offered_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoReturnedEvent {
    pub echo_id: Uuid,
    /// Actor who made the original offer
    pub offerer_id: Uuid,
    /// Actor who reciprocated
    pub returner_id: Uuid,
    pub returned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    MutualSpark,
    EchoReturned,
    FreeQuota,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationUnlockedEvent {
    pub actor_a: Uuid,
    pub actor_b: Uuid,
    pub reason: UnlockReason,
    pub unlocked_at: DateTime<Utc>,
}

/// All events emitted by matching-service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MatchingEvent {
    SparkSent(SparkSentEvent),
    EchoOffered(EchoOfferedEvent),
    EchoReturned(EchoReturnedEvent),
    ConversationUnlocked(ConversationUnlockedEvent),
}

impl MatchingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            MatchingEvent::SparkSent(_) => "spark_sent",
            MatchingEvent::EchoOffered(_) => "echo_offered",
            MatchingEvent::EchoReturned(_) => "echo_returned",
            MatchingEvent::ConversationUnlocked(_) => "conversation_unlocked",
        }
    }

    /// Actors that should be told about this event
    pub fn audience(&self) -> Vec<Uuid> {
        match self {
            MatchingEvent::SparkSent(e) => vec![e.receiver_id],
            MatchingEvent::EchoOffered(e) => vec![e.receiver_id],
            MatchingEvent::EchoReturned(e) => vec![e.offerer_id],
            MatchingEvent::ConversationUnlocked(e) => vec![e.actor_a, e.actor_b],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tag_matches_serialized_form() {
        let event = MatchingEvent::ConversationUnlocked(ConversationUnlockedEvent {
            actor_a: Uuid::new_v4(),
            actor_b: Uuid::new_v4(),
            reason: UnlockReason::EchoReturned,
            unlocked_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], event.event_type());
        assert_eq!(json["reason"], "echo_returned");

        let back: MatchingEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_echo_returned_notifies_offerer_only() {
        let offerer = Uuid::new_v4();
        let event = MatchingEvent::EchoReturned(EchoReturnedEvent {
            echo_id: Uuid::new_v4(),
            offerer_id: offerer,
            returner_id: Uuid::new_v4(),
            returned_at: Utc::now(),
        });
        assert_eq!(event.audience(), vec![offerer]);
    }
}
