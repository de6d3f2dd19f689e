use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender of messages generated from events.
pub const SYSTEM_SENDER: &str = "SYSTEM";
pub const SYSTEM_ROLE: &str = "system";

/// Key of the direct conversation between two users, independent of order.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

/// Direct conversation between two participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    /// The participants' [`pair_key`].
    #[serde(rename = "_id")]
    pub conversation_id: String,
    /// Sorted.
    pub participants: Vec<String>,
    /// Role of each participant, aligned with `participants`.
    pub participant_roles: Vec<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_utc: DateTime<Utc>,
}

impl Conversation {
    pub fn direct(
        (first, first_role): (&str, &str),
        (second, second_role): (&str, &str),
        now: DateTime<Utc>,
    ) -> Self {
        let mut pairs = [(first, first_role), (second, second_role)];
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        Self {
            conversation_id: pair_key(first, second),
            participants: pairs.iter().map(|(id, _)| id.to_string()).collect(),
            participant_roles: pairs.iter().map(|(_, role)| role.to_string()).collect(),
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn role_of(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .position(|p| p == user_id)
            .and_then(|i| self.participant_roles.get(i))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: String,
    pub content: String,
    /// Event this message was generated from.
    #[serde(default)]
    pub source_event_id: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}

impl ChatMessage {
    /// System message for `event_id` in `conversation_id`. The id is derived
    /// from both, so a redelivered event maps onto the same message.
    pub fn system(
        conversation_id: &str,
        event_id: &str,
        content: String,
        now: DateTime<Utc>,
    ) -> Self {
        let name = format!("{}/{}", conversation_id, event_id);
        Self {
            message_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: SYSTEM_SENDER.to_string(),
            sender_role: SYSTEM_ROLE.to_string(),
            content,
            source_event_id: event_id.to_string(),
            is_read: false,
            created_utc: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_ignores_order() {
        assert_eq!(pair_key("b", "a"), pair_key("a", "b"));
        assert_eq!(pair_key("a", "b"), "a:b");
    }

    #[test]
    fn roles_follow_sorted_participants() {
        let conversation = Conversation::direct(("u2", "seller"), ("u1", "buyer"), Utc::now());
        assert_eq!(conversation.participants, vec!["u1", "u2"]);
        assert_eq!(conversation.role_of("u1"), Some("buyer"));
        assert_eq!(conversation.role_of("u2"), Some("seller"));
        assert_eq!(conversation.role_of("u3"), None);
    }

    #[test]
    fn system_message_id_is_stable_per_event() {
        let now = Utc::now();
        let a = ChatMessage::system("u1:u2", "evt-1", "hi".to_string(), now);
        let b = ChatMessage::system("u1:u2", "evt-1", "hi".to_string(), now);
        let c = ChatMessage::system("u1:u2", "evt-2", "hi".to_string(), now);
        assert_eq!(a.message_id, b.message_id);
        assert_ne!(a.message_id, c.message_id);
        assert_eq!(a.sender_id, SYSTEM_SENDER);
    }
}
