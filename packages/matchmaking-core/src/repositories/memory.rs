//! In-process repositories for local development and tests.
//!
//! Each repository keeps its state behind a single `parking_lot::Mutex`, so the
//! compare-and-delete and single-open-session checks the DynamoDB versions get
//! from conditional transactions happen under one lock here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::profile::UserProfile;
use crate::models::queue::{QueueEntry, QueueStatus};
use crate::models::session::{Session, TranscriptMessage};
use crate::repositories::errors::profile_repository_errors::ProfileRepositoryError;
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;
use crate::repositories::errors::session_repository_errors::SessionRepositoryError;
use crate::repositories::profile_repository::ProfileRepository;
use crate::repositories::queue_repository::QueueRepository;
use crate::repositories::session_repository::{EndedSession, SessionPage, SessionRepository};

#[derive(Default)]
pub struct InMemoryQueueRepository {
    entries: Mutex<HashMap<String, QueueEntry>>,
}

impl InMemoryQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored entry, expired or not, oldest first.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self.entries.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.queue_order().cmp(&b.queue_order()));
        entries
    }
}

#[async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), QueueRepositoryError> {
        self.entries
            .lock()
            .insert(entry.user_id.clone(), entry.clone());
        Ok(())
    }

    async fn dequeue(&self, user_id: &str) -> Result<Option<QueueEntry>, QueueRepositoryError> {
        Ok(self.entries.lock().remove(user_id))
    }

    async fn get_waiting(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueRepositoryError> {
        Ok(self
            .entries
            .lock()
            .get(user_id)
            .filter(|entry| entry.is_waiting(now))
            .cloned())
    }

    async fn find_oldest_waiting(
        &self,
        game_preference: &str,
        excluding_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueRepositoryError> {
        let mut entries = self.entries.lock();

        entries.retain(|_, entry| {
            entry.game_preference != game_preference || !entry.is_expired(now)
        });

        Ok(entries
            .values()
            .filter(|entry| entry.game_preference == game_preference)
            .filter(|entry| entry.status == QueueStatus::Waiting)
            .filter(|entry| entry.user_id != excluding_user_id)
            .min_by(|a, b| a.queue_order().cmp(&b.queue_order()))
            .cloned())
    }

    async fn claim_pair(
        &self,
        first: &QueueEntry,
        second: &QueueEntry,
    ) -> Result<bool, QueueRepositoryError> {
        let mut entries = self.entries.lock();

        let still_waiting = |expected: &QueueEntry| {
            entries.get(&expected.user_id).is_some_and(|current| {
                current.status == QueueStatus::Waiting && current.same_enqueue(expected)
            })
        };

        if !still_waiting(first) || !still_waiting(second) {
            return Ok(false);
        }

        entries.remove(&first.user_id);
        entries.remove(&second.user_id);
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueRepositoryError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }

    async fn count_waiting_ahead(
        &self,
        entry: &QueueEntry,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueRepositoryError> {
        Ok(self
            .entries
            .lock()
            .values()
            .filter(|other| other.game_preference == entry.game_preference)
            .filter(|other| other.is_waiting(now))
            .filter(|other| other.queue_order() < entry.queue_order())
            .count())
    }
}

#[derive(Default)]
struct SessionState {
    sessions: HashMap<String, Session>,
    open_by_user: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    state: Mutex<SessionState>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.state.lock().sessions.values().cloned().collect();
        sessions.sort_by_key(|session| session.start_time);
        sessions
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create_session(&self, session: &Session) -> Result<(), SessionRepositoryError> {
        let mut state = self.state.lock();

        if session
            .participant_ids()
            .any(|user_id| state.open_by_user.contains_key(user_id))
        {
            return Err(SessionRepositoryError::ParticipantBusy);
        }

        for user_id in session.participant_ids() {
            state
                .open_by_user
                .insert(user_id.to_string(), session.room_id.clone());
        }
        state
            .sessions
            .insert(session.room_id.clone(), session.clone());

        Ok(())
    }

    async fn find_open_session_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Session>, SessionRepositoryError> {
        let state = self.state.lock();

        Ok(state
            .open_by_user
            .get(user_id)
            .and_then(|room_id| state.sessions.get(room_id))
            .filter(|session| session.is_open())
            .cloned())
    }

    async fn find_session_by_id(
        &self,
        room_id: &str,
    ) -> Result<Option<Session>, SessionRepositoryError> {
        Ok(self.state.lock().sessions.get(room_id).cloned())
    }

    async fn append_message(
        &self,
        room_id: &str,
        message: &TranscriptMessage,
        max_messages: usize,
    ) -> Result<(), SessionRepositoryError> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(room_id)
            .ok_or(SessionRepositoryError::NotFound)?;

        if !session.is_open() {
            return Err(SessionRepositoryError::NotOpen);
        }
        if session.messages.len() >= max_messages {
            return Err(SessionRepositoryError::TranscriptFull(max_messages));
        }

        session.messages.push(message.clone());
        Ok(())
    }

    async fn mark_ended(
        &self,
        room_id: &str,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EndedSession, SessionRepositoryError> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get(room_id)
            .ok_or(SessionRepositoryError::NotFound)?;

        if !session.is_open() {
            return Ok(EndedSession {
                session: session.clone(),
                transitioned: false,
            });
        }

        let ended = session.ended(user_id, reason, now);
        for participant_id in ended.participant_ids() {
            if state.open_by_user.get(participant_id) == Some(&ended.room_id) {
                state.open_by_user.remove(participant_id);
            }
        }
        state.sessions.insert(ended.room_id.clone(), ended.clone());

        Ok(EndedSession {
            session: ended,
            transitioned: true,
        })
    }

    async fn list_closed_sessions_for_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SessionPage, SessionRepositoryError> {
        let state = self.state.lock();

        let mut closed: Vec<&Session> = state
            .sessions
            .values()
            .filter(|session| !session.is_open() && session.has_participant(user_id))
            .collect();
        closed.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        Ok(SessionPage {
            total: closed.len(),
            sessions: closed.into_iter().skip(offset).take(limit).cloned().collect(),
        })
    }
}

#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: Mutex<HashMap<String, UserProfile>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: UserProfile) {
        self.profiles.lock().insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn get_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<UserProfile>, ProfileRepositoryError> {
        Ok(self.profiles.lock().get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry_at(user_id: &str, game: &str, joined_at: DateTime<Utc>) -> QueueEntry {
        let mut entry = QueueEntry::new(
            &UserProfile::fallback(user_id),
            game,
            false,
            Duration::minutes(30),
        );
        entry.joined_at = joined_at;
        entry.expires_at = joined_at + Duration::minutes(30);
        entry
    }

    fn session_between(a: &str, b: &str) -> Session {
        let now = Utc::now();
        Session::from_match(&entry_at(a, "Valorant", now), &entry_at(b, "Valorant", now))
    }

    #[tokio::test]
    async fn test_enqueue_replaces_existing_entry() {
        let repository = InMemoryQueueRepository::new();
        let now = Utc::now();

        repository
            .enqueue(&entry_at("user-a", "Valorant", now - Duration::minutes(1)))
            .await
            .unwrap();
        repository
            .enqueue(&entry_at("user-a", "BGMI", now))
            .await
            .unwrap();

        let entries = repository.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].game_preference, "BGMI");
    }

    #[tokio::test]
    async fn test_find_oldest_waiting_is_fifo_per_partition() {
        let repository = InMemoryQueueRepository::new();
        let now = Utc::now();

        for (user_id, game, minutes_ago) in [
            ("user-a", "Valorant", 2),
            ("user-b", "Valorant", 5),
            ("user-c", "BGMI", 10),
            ("user-d", "Valorant", 1),
        ] {
            repository
                .enqueue(&entry_at(user_id, game, now - Duration::minutes(minutes_ago)))
                .await
                .unwrap();
        }

        let oldest = repository
            .find_oldest_waiting("Valorant", "user-d", now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(oldest.user_id, "user-b");
    }

    #[tokio::test]
    async fn test_same_millisecond_joins_order_by_user_id() {
        let repository = InMemoryQueueRepository::new();
        let joined_at = Utc::now() - Duration::minutes(1);
        let c = entry_at("user-c", "Valorant", joined_at);
        let b = entry_at("user-b", "Valorant", joined_at);
        let a = entry_at("user-a", "Valorant", joined_at);

        for entry in [&c, &b, &a] {
            repository.enqueue(entry).await.unwrap();
        }

        for _ in 0..5 {
            let oldest = repository
                .find_oldest_waiting("Valorant", "user-z", Utc::now())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(oldest.user_id, "user-a");
        }
        let next = repository
            .find_oldest_waiting("Valorant", "user-a", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.user_id, "user-b");

        let now = Utc::now();
        assert_eq!(repository.count_waiting_ahead(&a, now).await.unwrap(), 0);
        assert_eq!(repository.count_waiting_ahead(&b, now).await.unwrap(), 1);
        assert_eq!(repository.count_waiting_ahead(&c, now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_oldest_waiting_excludes_requester() {
        let repository = InMemoryQueueRepository::new();
        let now = Utc::now();
        repository
            .enqueue(&entry_at("user-a", "Valorant", now))
            .await
            .unwrap();

        let result = repository
            .find_oldest_waiting("Valorant", "user-a", now)
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_find_oldest_waiting_purges_expired_entries() {
        let repository = InMemoryQueueRepository::new();
        let now = Utc::now();
        let mut stale = entry_at("user-a", "Valorant", now - Duration::minutes(45));
        stale.expires_at = now - Duration::minutes(15);
        repository.enqueue(&stale).await.unwrap();

        let result = repository
            .find_oldest_waiting("Valorant", "user-b", now)
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(repository.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_claim_pair_removes_both_or_neither() {
        let repository = InMemoryQueueRepository::new();
        let now = Utc::now();
        let a = entry_at("user-a", "Valorant", now - Duration::minutes(1));
        let b = entry_at("user-b", "Valorant", now);
        let c = entry_at("user-c", "Valorant", now);
        repository.enqueue(&a).await.unwrap();
        repository.enqueue(&b).await.unwrap();

        // user-c never enqueued, so neither a nor c may be removed
        assert!(!repository.claim_pair(&a, &c).await.unwrap());
        assert_eq!(repository.snapshot().len(), 2);

        assert!(repository.claim_pair(&a, &b).await.unwrap());
        assert!(repository.snapshot().is_empty());

        assert!(!repository.claim_pair(&a, &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_pair_rejects_reenqueued_entry() {
        let repository = InMemoryQueueRepository::new();
        let now = Utc::now();
        let a = entry_at("user-a", "Valorant", now - Duration::minutes(1));
        let b = entry_at("user-b", "Valorant", now - Duration::minutes(1));
        repository.enqueue(&a).await.unwrap();
        repository.enqueue(&b).await.unwrap();
        repository
            .enqueue(&entry_at("user-b", "Valorant", now))
            .await
            .unwrap();

        assert!(!repository.claim_pair(&a, &b).await.unwrap());
        assert_eq!(repository.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_count_waiting_ahead() {
        let repository = InMemoryQueueRepository::new();
        let now = Utc::now();
        let a = entry_at("user-a", "Valorant", now - Duration::minutes(3));
        let b = entry_at("user-b", "Valorant", now - Duration::minutes(2));
        let c = entry_at("user-c", "BGMI", now - Duration::minutes(5));
        for entry in [&a, &b, &c] {
            repository.enqueue(entry).await.unwrap();
        }

        assert_eq!(repository.count_waiting_ahead(&a, now).await.unwrap(), 0);
        assert_eq!(repository.count_waiting_ahead(&b, now).await.unwrap(), 1);
        assert_eq!(repository.count_waiting_ahead(&c, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_session_rejects_busy_participant() {
        let repository = InMemorySessionRepository::new();
        repository
            .create_session(&session_between("user-a", "user-b"))
            .await
            .unwrap();

        let result = repository
            .create_session(&session_between("user-c", "user-b"))
            .await;

        assert!(matches!(result, Err(SessionRepositoryError::ParticipantBusy)));
        assert_eq!(repository.all_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_ended_is_idempotent() {
        let repository = InMemorySessionRepository::new();
        let session = session_between("user-a", "user-b");
        repository.create_session(&session).await.unwrap();

        let first = repository
            .mark_ended(&session.room_id, "user-a", "user disconnected", Utc::now())
            .await
            .unwrap();
        let second = repository
            .mark_ended(&session.room_id, "user-b", "user disconnected", Utc::now())
            .await
            .unwrap();

        assert!(first.transitioned);
        assert!(!second.transitioned);
        assert_eq!(first.session, second.session);
        assert!(repository
            .find_open_session_for_user("user-b")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_append_message_respects_limit_and_status() {
        let repository = InMemorySessionRepository::new();
        let session = session_between("user-a", "user-b");
        repository.create_session(&session).await.unwrap();
        let message = TranscriptMessage::new("user-a", "hi");

        repository
            .append_message(&session.room_id, &message, 1)
            .await
            .unwrap();
        let full = repository.append_message(&session.room_id, &message, 1).await;
        assert!(matches!(full, Err(SessionRepositoryError::TranscriptFull(1))));

        repository
            .mark_ended(&session.room_id, "user-a", "user disconnected", Utc::now())
            .await
            .unwrap();
        let closed = repository
            .append_message(&session.room_id, &message, 10)
            .await;
        assert!(matches!(closed, Err(SessionRepositoryError::NotOpen)));

        let missing = repository.append_message("missing", &message, 10).await;
        assert!(matches!(missing, Err(SessionRepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_list_closed_sessions_newest_first() {
        let repository = InMemorySessionRepository::new();
        let mut room_ids = Vec::new();
        for minutes_ago in [30, 20, 10] {
            let mut session = session_between("user-a", "user-b");
            session.start_time = Utc::now() - Duration::minutes(minutes_ago);
            repository.create_session(&session).await.unwrap();
            repository
                .mark_ended(&session.room_id, "user-a", "user disconnected", Utc::now())
                .await
                .unwrap();
            room_ids.push(session.room_id);
        }
        repository
            .create_session(&session_between("user-a", "user-c"))
            .await
            .unwrap();

        let page = repository
            .list_closed_sessions_for_user("user-a", 1, 1)
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].room_id, room_ids[1]);
    }
}
