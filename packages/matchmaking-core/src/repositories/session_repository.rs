use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, to_attribute_value, to_item};
use tracing::{debug, warn};

use crate::models::session::{Session, SessionStatus, TranscriptMessage};
use crate::repositories::errors::session_repository_errors::SessionRepositoryError;

#[cfg(test)]
use mockall::automock;

const OPEN_MARKER_KEY: &str = "OPEN";
const SESSION_KEY_PREFIX: &str = "SESSION#";

/// Result of [`SessionRepository::mark_ended`]. `transitioned` is false when
/// the session was already closed and the stored record is returned as is.
#[derive(Debug, Clone)]
pub struct EndedSession {
    pub session: Session,
    pub transitioned: bool,
}

#[derive(Debug, Clone)]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    pub total: usize,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Fails with `ParticipantBusy` if either participant already has an open session.
    async fn create_session(&self, session: &Session) -> Result<(), SessionRepositoryError>;

    async fn find_open_session_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Session>, SessionRepositoryError>;

    async fn find_session_by_id(
        &self,
        room_id: &str,
    ) -> Result<Option<Session>, SessionRepositoryError>;

    async fn append_message(
        &self,
        room_id: &str,
        message: &TranscriptMessage,
        max_messages: usize,
    ) -> Result<(), SessionRepositoryError>;

    /// Idempotent: an already closed session is returned unchanged.
    async fn mark_ended(
        &self,
        room_id: &str,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EndedSession, SessionRepositoryError>;

    /// Closed sessions of `user_id`, newest first.
    async fn list_closed_sessions_for_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SessionPage, SessionRepositoryError>;
}

/// Row of the memberships table. Either the per-session index row
/// (`SESSION#<start-ms>#<room_id>`) or the per-user `OPEN` marker.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct MembershipItem {
    user_id: String,
    membership_key: String,
    room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<SessionStatus>,
}

pub fn membership_key(session: &Session) -> String {
    format!(
        "{}{:013}#{}",
        SESSION_KEY_PREFIX,
        session.start_time.timestamp_millis(),
        session.room_id
    )
}

pub struct DynamoDbSessionRepository {
    pub client: Client,
    pub sessions_table: String,
    pub memberships_table: String,
}

impl DynamoDbSessionRepository {
    pub fn new(client: Client, sessions_table: &str, memberships_table: &str) -> Self {
        Self {
            client,
            sessions_table: sessions_table.to_string(),
            memberships_table: memberships_table.to_string(),
        }
    }

    fn status_value(status: SessionStatus) -> AttributeValue {
        AttributeValue::S(status.as_str().to_string())
    }

    fn transaction_error<E: std::fmt::Display>(e: E) -> SessionRepositoryError {
        SessionRepositoryError::TransactionError(e.to_string())
    }

    /// Room ids from the user's membership rows matching `statuses`, newest first.
    async fn query_room_ids(
        &self,
        user_id: &str,
        statuses: [SessionStatus; 2],
    ) -> Result<Vec<String>, SessionRepositoryError> {
        let mut room_ids = Vec::new();
        let mut exclusive_start_key = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.memberships_table)
                .key_condition_expression("user_id = :user_id AND begins_with(membership_key, :prefix)")
                .filter_expression("#status IN (:first, :second)")
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
                .expression_attribute_values(
                    ":prefix",
                    AttributeValue::S(SESSION_KEY_PREFIX.to_string()),
                )
                .expression_attribute_values(":first", Self::status_value(statuses[0]))
                .expression_attribute_values(":second", Self::status_value(statuses[1]))
                .scan_index_forward(false)
                .consistent_read(true)
                .set_exclusive_start_key(exclusive_start_key)
                .send()
                .await
                .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

            let last_evaluated_key = output.last_evaluated_key;

            for item in output.items.unwrap_or_default() {
                let membership: MembershipItem = from_item(item)
                    .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
                room_ids.push(membership.room_id);
            }

            match last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => return Ok(room_ids),
            }
        }
    }

    fn put_membership(
        &self,
        item: &MembershipItem,
        condition: Option<&str>,
    ) -> Result<TransactWriteItem, SessionRepositoryError> {
        let item =
            to_item(item).map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
        let put = Put::builder()
            .table_name(&self.memberships_table)
            .set_item(Some(item))
            .set_condition_expression(condition.map(str::to_string))
            .build()
            .map_err(Self::transaction_error)?;

        Ok(TransactWriteItem::builder().put(put).build())
    }
}

#[async_trait]
impl SessionRepository for DynamoDbSessionRepository {
    async fn create_session(&self, session: &Session) -> Result<(), SessionRepositoryError> {
        let item =
            to_item(session).map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;

        let mut transaction_items = vec![TransactWriteItem::builder()
            .put(
                Put::builder()
                    .table_name(&self.sessions_table)
                    .set_item(Some(item))
                    .condition_expression("attribute_not_exists(room_id)")
                    .build()
                    .map_err(Self::transaction_error)?,
            )
            .build()];

        let key = membership_key(session);
        for user_id in session.participant_ids() {
            // The OPEN marker is what makes a second open session impossible.
            transaction_items.push(self.put_membership(
                &MembershipItem {
                    user_id: user_id.to_string(),
                    membership_key: OPEN_MARKER_KEY.to_string(),
                    room_id: session.room_id.clone(),
                    status: None,
                },
                Some("attribute_not_exists(user_id)"),
            )?);
            transaction_items.push(self.put_membership(
                &MembershipItem {
                    user_id: user_id.to_string(),
                    membership_key: key.clone(),
                    room_id: session.room_id.clone(),
                    status: Some(session.status),
                },
                None,
            )?);
        }

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(transaction_items))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Stored session {}", session.room_id);
                Ok(())
            }
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_transaction_canceled_exception() =>
            {
                Err(SessionRepositoryError::ParticipantBusy)
            }
            Err(e) => Err(Self::transaction_error(e)),
        }
    }

    async fn find_open_session_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Session>, SessionRepositoryError> {
        let room_ids = self
            .query_room_ids(user_id, [SessionStatus::Waiting, SessionStatus::Active])
            .await?;

        if room_ids.len() > 1 {
            warn!(
                "Consistency violation: user {} has {} open sessions, using the most recent",
                user_id,
                room_ids.len()
            );
        }

        match room_ids.first() {
            Some(room_id) => Ok(self
                .find_session_by_id(room_id)
                .await?
                .filter(Session::is_open)),
            None => Ok(None),
        }
    }

    async fn find_session_by_id(
        &self,
        room_id: &str,
    ) -> Result<Option<Session>, SessionRepositoryError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.sessions_table)
            .key("room_id", AttributeValue::S(room_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        match output.item {
            Some(item) => {
                let session = from_item(item)
                    .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn append_message(
        &self,
        room_id: &str,
        message: &TranscriptMessage,
        max_messages: usize,
    ) -> Result<(), SessionRepositoryError> {
        let message_value = to_attribute_value(message)
            .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;

        let result = self
            .client
            .update_item()
            .table_name(&self.sessions_table)
            .key("room_id", AttributeValue::S(room_id.to_string()))
            .update_expression("SET messages = list_append(if_not_exists(messages, :empty), :message)")
            .condition_expression(
                "attribute_exists(room_id) AND #status IN (:waiting, :active) \
                 AND (attribute_not_exists(messages) OR size(messages) < :max)",
            )
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":empty", AttributeValue::L(Vec::new()))
            .expression_attribute_values(":message", AttributeValue::L(vec![message_value]))
            .expression_attribute_values(":waiting", Self::status_value(SessionStatus::Waiting))
            .expression_attribute_values(":active", Self::status_value(SessionStatus::Active))
            .expression_attribute_values(":max", AttributeValue::N(max_messages.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_conditional_check_failed_exception() =>
            {
                match self.find_session_by_id(room_id).await? {
                    None => Err(SessionRepositoryError::NotFound),
                    Some(session) if !session.is_open() => Err(SessionRepositoryError::NotOpen),
                    Some(_) => Err(SessionRepositoryError::TranscriptFull(max_messages)),
                }
            }
            Err(e) => Err(SessionRepositoryError::DynamoDb(e.to_string())),
        }
    }

    async fn mark_ended(
        &self,
        room_id: &str,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EndedSession, SessionRepositoryError> {
        let session = self
            .find_session_by_id(room_id)
            .await?
            .ok_or(SessionRepositoryError::NotFound)?;

        if !session.is_open() {
            return Ok(EndedSession {
                session,
                transitioned: false,
            });
        }

        let ended = session.ended(user_id, reason, now);
        let item =
            to_item(&ended).map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;

        let mut transaction_items = vec![TransactWriteItem::builder()
            .put(
                Put::builder()
                    .table_name(&self.sessions_table)
                    .set_item(Some(item))
                    .condition_expression("#status IN (:waiting, :active)")
                    .expression_attribute_names("#status", "status")
                    .expression_attribute_values(
                        ":waiting",
                        Self::status_value(SessionStatus::Waiting),
                    )
                    .expression_attribute_values(
                        ":active",
                        Self::status_value(SessionStatus::Active),
                    )
                    .build()
                    .map_err(Self::transaction_error)?,
            )
            .build()];

        let key = membership_key(&session);
        for participant_id in session.participant_ids() {
            transaction_items.push(
                TransactWriteItem::builder()
                    .update(
                        Update::builder()
                            .table_name(&self.memberships_table)
                            .key("user_id", AttributeValue::S(participant_id.to_string()))
                            .key("membership_key", AttributeValue::S(key.clone()))
                            .update_expression("SET #status = :status")
                            .expression_attribute_names("#status", "status")
                            .expression_attribute_values(":status", Self::status_value(ended.status))
                            .build()
                            .map_err(Self::transaction_error)?,
                    )
                    .build(),
            );
            transaction_items.push(
                TransactWriteItem::builder()
                    .delete(
                        Delete::builder()
                            .table_name(&self.memberships_table)
                            .key("user_id", AttributeValue::S(participant_id.to_string()))
                            .key(
                                "membership_key",
                                AttributeValue::S(OPEN_MARKER_KEY.to_string()),
                            )
                            .condition_expression(
                                "attribute_not_exists(user_id) OR room_id = :room_id",
                            )
                            .expression_attribute_values(
                                ":room_id",
                                AttributeValue::S(room_id.to_string()),
                            )
                            .build()
                            .map_err(Self::transaction_error)?,
                    )
                    .build(),
            );
        }

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(transaction_items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(EndedSession {
                session: ended,
                transitioned: true,
            }),
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_transaction_canceled_exception() =>
            {
                // Lost to a concurrent end; hand back whatever won.
                match self.find_session_by_id(room_id).await? {
                    Some(current) if !current.is_open() => Ok(EndedSession {
                        session: current,
                        transitioned: false,
                    }),
                    Some(_) => Err(SessionRepositoryError::TransactionError(format!(
                        "Session {} changed while ending",
                        room_id
                    ))),
                    None => Err(SessionRepositoryError::NotFound),
                }
            }
            Err(e) => Err(Self::transaction_error(e)),
        }
    }

    async fn list_closed_sessions_for_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SessionPage, SessionRepositoryError> {
        let room_ids = self
            .query_room_ids(user_id, [SessionStatus::Ended, SessionStatus::Disconnected])
            .await?;
        let total = room_ids.len();

        let mut sessions = Vec::new();
        for room_id in room_ids.iter().skip(offset).take(limit) {
            match self.find_session_by_id(room_id).await? {
                Some(session) => sessions.push(session),
                None => warn!("Membership of {} points at missing session {}", user_id, room_id),
            }
        }

        Ok(SessionPage { sessions, total })
    }
}
