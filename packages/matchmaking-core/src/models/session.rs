use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::queue::QueueEntry;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum SessionStatus {
    Waiting,
    Active,
    Ended,
    Disconnected,
}

impl SessionStatus {
    pub fn is_open(self) -> bool {
        matches!(self, SessionStatus::Waiting | SessionStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Waiting => "Waiting",
            SessionStatus::Active => "Active",
            SessionStatus::Ended => "Ended",
            SessionStatus::Disconnected => "Disconnected",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    pub video_enabled: bool,
    pub joined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn from_entry(entry: &QueueEntry, joined_at: DateTime<Utc>) -> Self {
        Participant {
            user_id: entry.user_id.clone(),
            display_name: entry.display_name.clone(),
            avatar_ref: entry.avatar_ref.clone(),
            video_enabled: entry.video_enabled,
            joined_at,
            left_at: None,
        }
    }
}

/// In-session transcript line. Not part of the platform's persistent chat.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TranscriptMessage {
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptMessage {
    pub fn new(sender_id: &str, text: &str) -> Self {
        TranscriptMessage {
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// A pairing of two users, addressed by `room_id`.
/// Sessions are never deleted; ending one only transitions its status.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Session {
    pub room_id: String,
    pub participants: Vec<Participant>,
    pub game_preference: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default)]
    pub messages: Vec<TranscriptMessage>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
}

impl Session {
    /// Builds an active session from the entry that was already waiting and
    /// the entry of the user whose join found it.
    pub fn from_match(waiting: &QueueEntry, joining: &QueueEntry) -> Self {
        let now = Utc::now();

        Session {
            room_id: Uuid::new_v4().to_string(),
            participants: vec![
                Participant::from_entry(waiting, now),
                Participant::from_entry(joining, now),
            ],
            game_preference: waiting.game_preference.clone(),
            status: SessionStatus::Active,
            start_time: now,
            end_time: None,
            duration: None,
            messages: Vec::new(),
            created_by: waiting.user_id.clone(),
            ended_by: None,
            end_reason: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.user_id.as_str())
    }

    pub fn other_participants<'a>(
        &'a self,
        user_id: &'a str,
    ) -> impl Iterator<Item = &'a Participant> + 'a {
        self.participants.iter().filter(move |p| p.user_id != user_id)
    }

    /// Returns the disconnected form of this session. Leaves `self` untouched
    /// so callers can write it conditionally.
    pub fn ended(&self, user_id: &str, reason: &str, now: DateTime<Utc>) -> Session {
        let mut ended = self.clone();
        ended.status = SessionStatus::Disconnected;
        ended.end_time = Some(now);
        ended.duration = Some((now - self.start_time).num_seconds().max(0));
        ended.ended_by = Some(user_id.to_string());
        ended.end_reason = Some(reason.to_string());

        if let Some(participant) = ended
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
        {
            participant.left_at = Some(now);
        }

        ended
    }
}
