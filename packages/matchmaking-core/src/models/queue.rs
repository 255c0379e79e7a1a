use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::models::profile::UserProfile;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum QueueStatus {
    Waiting,
    Matched,
    Cancelled,
}

/// A user waiting for a random partner.
/// Each record corresponds to a DynamoDB item keyed by `user_id`, indexed by
/// `game_preference` + `joined_at` for the oldest-waiting lookup.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QueueEntry {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    pub game_preference: String,
    pub video_enabled: bool,
    pub status: QueueStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub joined_at: DateTime<Utc>,
    // Epoch seconds so the attribute doubles as the table TTL.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(
        profile: &UserProfile,
        game_preference: &str,
        video_enabled: bool,
        ttl: Duration,
    ) -> Self {
        // Millisecond precision matches what the queue table stores.
        let joined_at = Utc::now().trunc_subsecs(3);

        QueueEntry {
            user_id: profile.id.clone(),
            display_name: profile.display_name.clone(),
            avatar_ref: profile.avatar_ref.clone(),
            game_preference: game_preference.to_string(),
            video_enabled,
            status: QueueStatus::Waiting,
            joined_at,
            expires_at: joined_at + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Waiting and not yet expired; the only state eligible for matching.
    pub fn is_waiting(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Waiting && !self.is_expired(now)
    }

    /// True when `other` is the very same enqueue as `self`, not a later
    /// re-enqueue of the same user.
    pub fn same_enqueue(&self, other: &QueueEntry) -> bool {
        self.user_id == other.user_id
            && self.joined_at.timestamp_millis() == other.joined_at.timestamp_millis()
    }

    /// Matching order within a partition. Entries that joined in the same
    /// millisecond are ordered by user id.
    pub fn queue_order(&self) -> (i64, &str) {
        (self.joined_at.timestamp_millis(), &self.user_id)
    }
}
