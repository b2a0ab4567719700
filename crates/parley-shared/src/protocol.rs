use serde::{Deserialize, Serialize};

use crate::constants::{EVENT_NEW_MESSAGE, EVENT_PONG, EVENT_PRESENCE_UPDATE};
use crate::models::Message;
use crate::types::UserId;

/// Events pushed from the server to a live connection.
///
/// Encoded as JSON text frames of the form `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Current set of online identities
    #[serde(rename = "presence-update")]
    PresenceUpdate(PresenceSnapshot),

    /// A direct message addressed to the connection's owner
    #[serde(rename = "new-message")]
    NewMessage(Message),

    /// Reply to a client ping
    #[serde(rename = "pong")]
    Pong,
}

/// Online identities at the moment of a broadcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceSnapshot {
    #[serde(rename = "onlineIdentities")]
    pub online_identities: Vec<UserId>,
}

/// Frames a client may send over its connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Application-level keepalive; answered with [`ServerEvent::Pong`].
    Ping,
    /// Close this connection as an explicit sign-out.
    Logout,
}

impl ServerEvent {
    pub fn presence(online_identities: Vec<UserId>) -> Self {
        Self::PresenceUpdate(PresenceSnapshot { online_identities })
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PresenceUpdate(_) => EVENT_PRESENCE_UPDATE,
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
            Self::Pong => EVENT_PONG,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl ClientFrame {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_update_shape() {
        let user = UserId::new();
        let json = ServerEvent::presence(vec![user]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], EVENT_PRESENCE_UPDATE);
        assert_eq!(value["data"]["onlineIdentities"][0], user.to_string());
    }

    #[test]
    fn test_new_message_carries_full_record() {
        let msg = Message::new(UserId::new(), UserId::new(), Some("hi".into()), None);
        let event = ServerEvent::NewMessage(msg.clone());
        let json = event.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], EVENT_NEW_MESSAGE);
        assert_eq!(value["data"]["id"], msg.id.to_string());
        assert_eq!(value["data"]["text"], "hi");

        if let ServerEvent::NewMessage(restored) = ServerEvent::from_json(&json).unwrap() {
            assert_eq!(restored, msg);
        } else {
            panic!("Event type mismatch");
        }
    }

    #[test]
    fn test_event_names_match_wire_tags() {
        let events = [
            ServerEvent::presence(Vec::new()),
            ServerEvent::NewMessage(Message::new(UserId::new(), UserId::new(), Some("x".into()), None)),
            ServerEvent::Pong,
        ];
        for event in events {
            let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }

    #[test]
    fn test_client_frames() {
        assert_eq!(ClientFrame::from_json(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
        assert_eq!(ClientFrame::from_json(r#"{"type":"logout"}"#).unwrap(), ClientFrame::Logout);
        assert!(ClientFrame::from_json(r#"{"type":"subscribe"}"#).is_err());
    }
}
