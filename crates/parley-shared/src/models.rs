//! Records that cross crate boundaries: the persisted direct message and the
//! client-facing projection of a user account.
//!
//! Field names are camelCase on the wire so browser clients can consume the
//! JSON as-is.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::UserId;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A direct message between two users.
///
/// The stored row is the system of record; pushing it over a live
/// connection is only a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// Author of the message.
    pub sender_id: UserId,
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Text body, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Reference (URL) to an image hosted elsewhere, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Server-side creation time.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a new message stamped with a fresh id and the current time.
    ///
    /// Blank `text`/`image` values are normalized to `None`. The timestamp is
    /// truncated to microseconds, the precision the store keeps.
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        text: Option<String>,
        image: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            text: non_blank(text),
            image: non_blank(image),
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    /// A message must carry text, an image, or both.
    pub fn has_content(&self) -> bool {
        self.text.is_some() || self.image.is_some()
    }

    /// Whether this message belongs to the conversation between `a` and `b`.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// PublicUser
// ---------------------------------------------------------------------------

/// The part of a user account that is safe to hand to any client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub profile_pic: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_fields_are_dropped() {
        let msg = Message::new(UserId::new(), UserId::new(), Some("   ".into()), None);
        assert!(msg.text.is_none());
        assert!(!msg.has_content());

        let msg = Message::new(UserId::new(), UserId::new(), None, Some("https://img/x.png".into()));
        assert!(msg.has_content());
    }

    #[test]
    fn test_is_between_either_direction() {
        let a = UserId::new();
        let b = UserId::new();
        let msg = Message::new(a, b, Some("hi".into()), None);
        assert!(msg.is_between(a, b));
        assert!(msg.is_between(b, a));
        assert!(!msg.is_between(a, UserId::new()));
    }

    #[test]
    fn test_message_wire_names() {
        let msg = Message::new(UserId::new(), UserId::new(), Some("hello".into()), None);
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("senderId").is_some());
        assert!(value.get("receiverId").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("image").is_none());
    }
}
