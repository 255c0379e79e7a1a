use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::events::ConnectionEvent;
use crate::models::profile::UserProfile;
use crate::models::queue::QueueEntry;
use crate::models::responses::{HistoryResponse, QueueStatusResponse};
use crate::models::session::{Session, TranscriptMessage};
use crate::repositories::errors::session_repository_errors::SessionRepositoryError;
use crate::repositories::profile_repository::ProfileRepository;
use crate::repositories::queue_repository::QueueRepository;
use crate::repositories::session_repository::SessionRepository;
use crate::services::errors::random_connection_service_errors::RandomConnectionServiceError;
use crate::services::keyed_locks::KeyedLocks;
use crate::services::matcher::Matcher;
use crate::services::notification_service::EventPublisher;

pub const REASON_USER_DISCONNECTED: &str = "user disconnected";
pub const REASON_USER_REJOINED: &str = "user rejoined queue";
pub const REASON_USER_LEFT: &str = "user left";

pub const MAX_GAME_PREFERENCE_LENGTH: usize = 64;
pub const MAX_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub queue_entry_ttl: chrono::Duration,
    pub requeue_delay: Duration,
    pub max_transcript_length: usize,
    pub max_message_length: usize,
    pub match_attempts: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            queue_entry_ttl: chrono::Duration::minutes(30),
            requeue_delay: Duration::from_millis(2000),
            max_transcript_length: 500,
            max_message_length: 2000,
            match_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub enum JoinQueueOutcome {
    Matched(Session),
    Waiting(QueueEntry),
}

/// Outcome of one matching pass over a freshly enqueued entry.
enum MatchResult {
    /// This pass claimed a partner and created the session.
    Created(Session),
    /// Someone else consumed the entry and created the session.
    AlreadyMatched(Session),
    Waiting(QueueEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cleanup {
    /// The user is about to join again; partners get re-queued.
    Rejoin,
    /// The user is leaving the platform; nobody is re-queued.
    Leave,
}

struct PendingRequeue {
    id: Uuid,
    handle: AbortHandle,
}

/// Coordinates the queue, the matcher and the session store for random
/// connections. Every mutating operation holds the acting user's lock for its
/// whole duration; matching additionally holds the lock of the game partition.
#[derive(Clone)]
pub struct RandomConnectionService {
    queue: Arc<dyn QueueRepository>,
    sessions: Arc<dyn SessionRepository>,
    profiles: Arc<dyn ProfileRepository>,
    events: Arc<dyn EventPublisher>,
    matcher: Matcher,
    user_locks: KeyedLocks,
    partition_locks: KeyedLocks,
    pending_requeues: Arc<DashMap<String, PendingRequeue>>,
    settings: ConnectionSettings,
}

impl RandomConnectionService {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        sessions: Arc<dyn SessionRepository>,
        profiles: Arc<dyn ProfileRepository>,
        events: Arc<dyn EventPublisher>,
        settings: ConnectionSettings,
    ) -> Self {
        RandomConnectionService {
            matcher: Matcher::new(queue.clone()),
            queue,
            sessions,
            profiles,
            events,
            user_locks: KeyedLocks::new(),
            partition_locks: KeyedLocks::new(),
            pending_requeues: Arc::new(DashMap::new()),
            settings,
        }
    }

    /// Puts the user in the queue for `game_preference` and tries to pair them
    /// with the longest-waiting user of the same game. Any open session or
    /// queue entry the user still had is torn down first.
    pub async fn join_queue(
        &self,
        user_id: &str,
        game_preference: &str,
        video_enabled: bool,
    ) -> Result<JoinQueueOutcome, RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        let game_preference = validate_game_preference(game_preference)?;

        let _guard = self.user_locks.lock(user_id).await;
        self.cleanup_existing(user_id, Cleanup::Rejoin).await?;

        let profile = self.resolve_profile(user_id).await;
        let entry = QueueEntry::new(
            &profile,
            game_preference,
            video_enabled,
            self.settings.queue_entry_ttl,
        );
        self.queue.enqueue(&entry).await?;
        info!("User {} joined the {} queue", user_id, game_preference);

        self.complete_match(&entry).await
    }

    pub async fn leave_queue(&self, user_id: &str) -> Result<(), RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        let _guard = self.user_locks.lock(user_id).await;

        let cancelled = self.cancel_pending_requeue(user_id);
        let removed = self.queue.dequeue(user_id).await?;

        match removed {
            Some(entry) if entry.is_waiting(Utc::now()) => {
                info!(
                    "User {} left the {} queue",
                    user_id, entry.game_preference
                );
                Ok(())
            }
            _ if cancelled => {
                info!("Cancelled pending requeue of user {}", user_id);
                Ok(())
            }
            _ => Err(RandomConnectionServiceError::not_in_queue()),
        }
    }

    pub async fn current_connection(
        &self,
        user_id: &str,
    ) -> Result<Session, RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        self.sessions
            .find_open_session_for_user(user_id)
            .await?
            .ok_or_else(RandomConnectionServiceError::connection_not_found)
    }

    /// Ends the session on behalf of `user_id`. The remaining participant is
    /// notified and re-queued after the configured delay. Disconnecting from a
    /// session that is already closed is a no-op returning the stored record.
    pub async fn disconnect(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Session, RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        let _guard = self.user_locks.lock(user_id).await;

        let session = self
            .sessions
            .find_session_by_id(room_id)
            .await?
            .filter(|session| session.has_participant(user_id))
            .ok_or_else(RandomConnectionServiceError::connection_not_found)?;

        if !session.is_open() {
            debug!(
                "Session {} already closed, nothing to do for user {}",
                room_id, user_id
            );
            return Ok(session);
        }

        self.end_session(&session.room_id, user_id, REASON_USER_DISCONNECTED, true)
            .await
    }

    /// Tears down whatever the user still has open without re-queueing anyone.
    /// Used when the user leaves the platform.
    pub async fn cleanup_current(&self, user_id: &str) -> Result<(), RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        let _guard = self.user_locks.lock(user_id).await;
        self.cleanup_existing(user_id, Cleanup::Leave).await
    }

    /// Re-enters a user whose partner went away. Camera is always off after an
    /// automatic requeue. Skipped when the user already waits or already sits
    /// in another session.
    pub async fn auto_requeue(
        &self,
        user_id: &str,
        game_preference: &str,
    ) -> Result<Option<JoinQueueOutcome>, RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        let game_preference = validate_game_preference(game_preference)?;

        let _guard = self.user_locks.lock(user_id).await;
        self.requeue_locked(user_id, game_preference).await
    }

    pub async fn send_message(
        &self,
        user_id: &str,
        room_id: &str,
        text: &str,
    ) -> Result<TranscriptMessage, RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(RandomConnectionServiceError::ValidationError(
                "Message cannot be empty".to_string(),
            ));
        }
        if text.chars().count() > self.settings.max_message_length {
            return Err(RandomConnectionServiceError::ValidationError(format!(
                "Message cannot exceed {} characters",
                self.settings.max_message_length
            )));
        }

        let session = self.open_session_of(user_id, room_id).await?;
        let message = TranscriptMessage::new(user_id, text);
        self.sessions
            .append_message(room_id, &message, self.settings.max_transcript_length)
            .await?;

        let event = ConnectionEvent::message(room_id, &message);
        for partner in session.other_participants(user_id) {
            self.notify(&partner.user_id, &event).await;
        }

        Ok(message)
    }

    /// Forwards a WebRTC signalling payload to the other participants. Nothing
    /// is stored.
    pub async fn relay_signal(
        &self,
        user_id: &str,
        room_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        if payload.is_null() {
            return Err(RandomConnectionServiceError::ValidationError(
                "Signal payload is required".to_string(),
            ));
        }

        let session = self.open_session_of(user_id, room_id).await?;
        let event = ConnectionEvent::WebrtcSignal {
            room_id: room_id.to_string(),
            sender_id: user_id.to_string(),
            payload,
        };
        for partner in session.other_participants(user_id) {
            self.notify(&partner.user_id, &event).await;
        }

        Ok(())
    }

    pub async fn history(
        &self,
        user_id: &str,
        page: usize,
        limit: usize,
    ) -> Result<HistoryResponse, RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        if page == 0 {
            return Err(RandomConnectionServiceError::ValidationError(
                "Page must be at least 1".to_string(),
            ));
        }
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(RandomConnectionServiceError::ValidationError(format!(
                "Limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }

        let offset = (page - 1) * limit;
        let result = self
            .sessions
            .list_closed_sessions_for_user(user_id, offset, limit)
            .await?;
        let has_more = offset + result.sessions.len() < result.total;

        Ok(HistoryResponse {
            sessions: result.sessions,
            page,
            limit,
            total: result.total,
            has_more,
        })
    }

    pub async fn queue_status(
        &self,
        user_id: &str,
    ) -> Result<QueueStatusResponse, RandomConnectionServiceError> {
        validate_user_id(user_id)?;
        let now = Utc::now();
        let entry = self
            .queue
            .get_waiting(user_id, now)
            .await?
            .ok_or_else(RandomConnectionServiceError::not_in_queue)?;
        let ahead = self.queue.count_waiting_ahead(&entry, now).await?;

        Ok(QueueStatusResponse {
            entry,
            position: ahead + 1,
        })
    }

    pub async fn purge_expired(&self) -> Result<usize, RandomConnectionServiceError> {
        Ok(self.queue.purge_expired(Utc::now()).await?)
    }

    async fn requeue_locked(
        &self,
        user_id: &str,
        game_preference: &str,
    ) -> Result<Option<JoinQueueOutcome>, RandomConnectionServiceError> {
        if self.queue.get_waiting(user_id, Utc::now()).await?.is_some() {
            debug!("User {} is already waiting, skipping requeue", user_id);
            return Ok(None);
        }
        if self
            .sessions
            .find_open_session_for_user(user_id)
            .await?
            .is_some()
        {
            debug!("User {} is already in a session, skipping requeue", user_id);
            return Ok(None);
        }

        let profile = self.resolve_profile(user_id).await;
        let entry = QueueEntry::new(
            &profile,
            game_preference,
            false,
            self.settings.queue_entry_ttl,
        );
        self.queue.enqueue(&entry).await?;
        info!(
            "Re-queued user {} for {} after partner left",
            user_id, game_preference
        );

        let outcome = self.complete_match(&entry).await?;
        if let JoinQueueOutcome::Waiting(_) = outcome {
            self.notify(
                user_id,
                &ConnectionEvent::RejoinedQueue {
                    game_preference: game_preference.to_string(),
                },
            )
            .await;
        }

        Ok(Some(outcome))
    }

    /// Runs matching for an enqueued entry and announces a new session to both
    /// participants.
    async fn complete_match(
        &self,
        entry: &QueueEntry,
    ) -> Result<JoinQueueOutcome, RandomConnectionServiceError> {
        match self.match_entry(entry).await? {
            MatchResult::Created(session) => {
                let event = ConnectionEvent::matched(&session);
                for participant in session.participant_ids() {
                    self.notify(participant, &event).await;
                }
                Ok(JoinQueueOutcome::Matched(session))
            }
            MatchResult::AlreadyMatched(session) => Ok(JoinQueueOutcome::Matched(session)),
            MatchResult::Waiting(entry) => Ok(JoinQueueOutcome::Waiting(entry)),
        }
    }

    async fn match_entry(&self, entry: &QueueEntry) -> Result<MatchResult, RandomConnectionServiceError> {
        let _partition = self.partition_locks.lock(&entry.game_preference).await;

        // A concurrent join may have paired our previous entry before this one
        // was enqueued. Its session is committed once we hold the partition.
        if let Some(session) = self
            .sessions
            .find_open_session_for_user(&entry.user_id)
            .await?
        {
            self.drop_entry(entry).await?;
            return Ok(MatchResult::AlreadyMatched(session));
        }

        for attempt in 1..=self.settings.match_attempts {
            let now = Utc::now();
            let still_waiting = self
                .queue
                .get_waiting(&entry.user_id, now)
                .await?
                .is_some_and(|current| current.same_enqueue(entry));
            if !still_waiting {
                return self.consumed_entry(entry).await;
            }

            let Some(partner) = self
                .matcher
                .attempt_match(&entry.user_id, &entry.game_preference, now)
                .await?
            else {
                return Ok(MatchResult::Waiting(entry.clone()));
            };

            if !self.queue.claim_pair(&partner, entry).await? {
                debug!(
                    "Lost the claim on {} for {} (attempt {})",
                    partner.user_id, entry.user_id, attempt
                );
                continue;
            }

            let session = Session::from_match(&partner, entry);
            match self.sessions.create_session(&session).await {
                Ok(()) => {}
                Err(SessionRepositoryError::ParticipantBusy) => {
                    if let Some(session) = self.release_busy_pair(&partner, entry).await? {
                        return Ok(MatchResult::AlreadyMatched(session));
                    }
                    continue;
                }
                Err(e) => {
                    error!(
                        "Failed to create session for {} and {}: {}",
                        partner.user_id, entry.user_id, e
                    );
                    self.restore_entries(&[&partner, entry]).await;
                    return Err(e.into());
                }
            }

            info!(
                "Matched {} with {} in room {} ({})",
                partner.user_id, entry.user_id, session.room_id, session.game_preference
            );
            return Ok(MatchResult::Created(session));
        }

        warn!(
            "Giving up matching {} after {} contended attempts",
            entry.user_id, self.settings.match_attempts
        );
        Ok(MatchResult::Waiting(entry.clone()))
    }

    /// The entry left the queue while we waited for the partition; a
    /// concurrent join must have paired it.
    async fn consumed_entry(
        &self,
        entry: &QueueEntry,
    ) -> Result<MatchResult, RandomConnectionServiceError> {
        match self
            .sessions
            .find_open_session_for_user(&entry.user_id)
            .await?
        {
            Some(session) => Ok(MatchResult::AlreadyMatched(session)),
            None => {
                warn!(
                    "Queue entry of {} disappeared without an open session",
                    entry.user_id
                );
                Ok(MatchResult::Waiting(entry.clone()))
            }
        }
    }

    /// A claimed pair could not be seated because someone already sits in an
    /// open session. Busy entries are dropped, the others go back to the
    /// queue. Returns the requester's session if the requester is the busy one.
    async fn release_busy_pair(
        &self,
        partner: &QueueEntry,
        entry: &QueueEntry,
    ) -> Result<Option<Session>, RandomConnectionServiceError> {
        let mut requester_session = None;

        for claimed in [partner, entry] {
            match self
                .sessions
                .find_open_session_for_user(&claimed.user_id)
                .await?
            {
                Some(session) => {
                    warn!(
                        "Dropped queue entry of {} who already sits in room {}",
                        claimed.user_id, session.room_id
                    );
                    if claimed.user_id == entry.user_id {
                        requester_session = Some(session);
                    }
                }
                None => self.restore_entries(&[claimed]).await,
            }
        }

        Ok(requester_session)
    }

    /// Removes `entry` if it is still the stored entry of its user. Caller holds
    /// the user lock and the partition lock.
    async fn drop_entry(&self, entry: &QueueEntry) -> Result<(), RandomConnectionServiceError> {
        let current = self.queue.get_waiting(&entry.user_id, Utc::now()).await?;
        if current.is_some_and(|current| current.same_enqueue(entry)) {
            self.queue.dequeue(&entry.user_id).await?;
            debug!("Dropped stale queue entry of {}", entry.user_id);
        }
        Ok(())
    }

    async fn restore_entries(&self, entries: &[&QueueEntry]) {
        for entry in entries {
            if let Err(e) = self.queue.enqueue(entry).await {
                error!("Failed to restore queue entry of {}: {}", entry.user_id, e);
            }
        }
    }

    /// Caller holds the user lock.
    async fn cleanup_existing(
        &self,
        user_id: &str,
        cleanup: Cleanup,
    ) -> Result<(), RandomConnectionServiceError> {
        self.cancel_pending_requeue(user_id);

        if let Some(session) = self.sessions.find_open_session_for_user(user_id).await? {
            let (reason, requeue_partners) = match cleanup {
                Cleanup::Rejoin => (REASON_USER_REJOINED, true),
                Cleanup::Leave => (REASON_USER_LEFT, false),
            };
            self.end_session(&session.room_id, user_id, reason, requeue_partners)
                .await?;
        }

        if self.queue.dequeue(user_id).await?.is_some() {
            debug!("Removed previous queue entry of {}", user_id);
        }

        Ok(())
    }

    async fn end_session(
        &self,
        room_id: &str,
        user_id: &str,
        reason: &str,
        requeue_partners: bool,
    ) -> Result<Session, RandomConnectionServiceError> {
        let ended = self
            .sessions
            .mark_ended(room_id, user_id, reason, Utc::now())
            .await?;

        if !ended.transitioned {
            return Ok(ended.session);
        }

        info!("Session {} ended by {}: {}", room_id, user_id, reason);
        let event = ConnectionEvent::partner_disconnected(room_id, user_id, reason);
        for partner in ended.session.other_participants(user_id) {
            self.notify(&partner.user_id, &event).await;
            if requeue_partners {
                self.schedule_requeue(&partner.user_id, &ended.session.game_preference);
            }
        }

        Ok(ended.session)
    }

    fn schedule_requeue(&self, user_id: &str, game_preference: &str) {
        let id = Uuid::new_v4();
        let delay = self.settings.requeue_delay;
        let service = self.clone();
        let user = user_id.to_string();
        let game = game_preference.to_string();

        // The shard stays locked until the handle is stored, so the task
        // cannot look for its own entry before it exists.
        let slot = self.pending_requeues.entry(user_id.to_string());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _guard = service.user_locks.lock(&user).await;
            if service
                .pending_requeues
                .remove_if(&user, |_, pending| pending.id == id)
                .is_none()
            {
                return;
            }
            if let Err(e) = service.requeue_locked(&user, &game).await {
                error!("Automatic requeue of user {} failed: {}", user, e);
            }
        });

        let pending = PendingRequeue {
            id,
            handle: handle.abort_handle(),
        };
        match slot {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(pending);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
            }
        }
        debug!("Scheduled requeue of {} in {:?}", user_id, delay);
    }

    /// Returns true if a requeue was still pending.
    fn cancel_pending_requeue(&self, user_id: &str) -> bool {
        match self.pending_requeues.remove(user_id) {
            Some((_, pending)) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    async fn open_session_of(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Session, RandomConnectionServiceError> {
        self.sessions
            .find_session_by_id(room_id)
            .await?
            .filter(|session| session.is_open() && session.has_participant(user_id))
            .ok_or_else(RandomConnectionServiceError::connection_not_found)
    }

    async fn resolve_profile(&self, user_id: &str) -> UserProfile {
        match self.profiles.get_profile(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                debug!("No profile for {}, using fallback", user_id);
                UserProfile::fallback(user_id)
            }
            Err(e) => {
                warn!("Failed to load profile of {}: {}", user_id, e);
                UserProfile::fallback(user_id)
            }
        }
    }

    async fn notify(&self, user_id: &str, event: &ConnectionEvent) {
        if let Err(e) = self.events.publish(user_id, event).await {
            warn!(
                "Failed to deliver {} to user {}: {}",
                event.name(),
                user_id,
                e
            );
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<(), RandomConnectionServiceError> {
    if user_id.trim().is_empty() {
        return Err(RandomConnectionServiceError::ValidationError(
            "User ID cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_game_preference(game_preference: &str) -> Result<&str, RandomConnectionServiceError> {
    let game_preference = game_preference.trim();
    if game_preference.is_empty() {
        return Err(RandomConnectionServiceError::ValidationError(
            "Game preference is required".to_string(),
        ));
    }
    if game_preference.chars().count() > MAX_GAME_PREFERENCE_LENGTH {
        return Err(RandomConnectionServiceError::ValidationError(format!(
            "Game preference cannot exceed {} characters",
            MAX_GAME_PREFERENCE_LENGTH
        )));
    }
    Ok(game_preference)
}
