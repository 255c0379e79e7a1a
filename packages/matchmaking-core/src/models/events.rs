use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::{Participant, Session, TranscriptMessage};

/// Events pushed to a user's live client connections.
/// Serialized as `{"type": "connection-matched", "payload": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ConnectionEvent {
    ConnectionMatched {
        room_id: String,
        participants: Vec<Participant>,
        game_preference: String,
    },
    PartnerDisconnected {
        room_id: String,
        disconnected_user_id: String,
        reason: String,
    },
    RejoinedQueue {
        game_preference: String,
    },
    RandomConnectionMessage {
        room_id: String,
        sender_id: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
    WebrtcSignal {
        room_id: String,
        sender_id: String,
        payload: serde_json::Value,
    },
}

impl ConnectionEvent {
    pub fn matched(session: &Session) -> Self {
        ConnectionEvent::ConnectionMatched {
            room_id: session.room_id.clone(),
            participants: session.participants.clone(),
            game_preference: session.game_preference.clone(),
        }
    }

    pub fn partner_disconnected(room_id: &str, disconnected_user_id: &str, reason: &str) -> Self {
        ConnectionEvent::PartnerDisconnected {
            room_id: room_id.to_string(),
            disconnected_user_id: disconnected_user_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn message(room_id: &str, message: &TranscriptMessage) -> Self {
        ConnectionEvent::RandomConnectionMessage {
            room_id: room_id.to_string(),
            sender_id: message.sender_id.clone(),
            text: message.text.clone(),
            timestamp: message.timestamp,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::ConnectionMatched { .. } => "connection-matched",
            ConnectionEvent::PartnerDisconnected { .. } => "partner-disconnected",
            ConnectionEvent::RejoinedQueue { .. } => "rejoined-queue",
            ConnectionEvent::RandomConnectionMessage { .. } => "random-connection-message",
            ConnectionEvent::WebrtcSignal { .. } => "webrtc-signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = ConnectionEvent::partner_disconnected("room-1", "user-a", "user disconnected");

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "partner-disconnected",
                "payload": {
                    "room_id": "room-1",
                    "disconnected_user_id": "user-a",
                    "reason": "user disconnected"
                }
            })
        );
    }

    #[test]
    fn test_type_tags_match_names() {
        let events = vec![
            ConnectionEvent::RejoinedQueue {
                game_preference: "BGMI".to_string(),
            },
            ConnectionEvent::message("room-1", &TranscriptMessage::new("user-a", "gg")),
            ConnectionEvent::WebrtcSignal {
                room_id: "room-1".to_string(),
                sender_id: "user-a".to_string(),
                payload: json!({"sdp": "offer"}),
            },
        ];

        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.name());
        }
    }
}
