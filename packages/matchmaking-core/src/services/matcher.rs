use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::queue::QueueEntry;
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;
use crate::repositories::queue_repository::QueueRepository;

/// Picks a partner for a requester: strictly the longest-waiting entry of the
/// same game, with no scoring or randomisation. Claiming the partner is up to
/// the caller.
#[derive(Clone)]
pub struct Matcher {
    queue: Arc<dyn QueueRepository>,
}

impl Matcher {
    pub fn new(queue: Arc<dyn QueueRepository>) -> Self {
        Matcher { queue }
    }

    pub async fn attempt_match(
        &self,
        requester_id: &str,
        game_preference: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueRepositoryError> {
        self.queue
            .find_oldest_waiting(game_preference, requester_id, now)
            .await
    }
}
