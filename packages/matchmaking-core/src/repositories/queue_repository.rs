use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, ReturnValue, Select, TransactWriteItem};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, to_item};
use tracing::debug;

use crate::models::queue::{QueueEntry, QueueStatus};
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;

#[cfg(test)]
use mockall::automock;

pub const QUEUE_BY_GAME_INDEX: &str = "GSI_QueueByGame";

/// Durable FIFO of users waiting for a partner, partitioned by game preference.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Upserts the entry; a previous entry for the same user is replaced.
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), QueueRepositoryError>;

    /// Removes the user's entry, returning it if one existed.
    async fn dequeue(&self, user_id: &str) -> Result<Option<QueueEntry>, QueueRepositoryError>;

    async fn get_waiting(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueRepositoryError>;

    /// Oldest waiting entry for `game_preference` other than `excluding_user_id`,
    /// by [`QueueEntry::queue_order`]. Expired entries met on the way are purged.
    async fn find_oldest_waiting(
        &self,
        game_preference: &str,
        excluding_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueRepositoryError>;

    /// Removes both entries or neither. Returns `false` when either entry is no
    /// longer the waiting entry that was read.
    async fn claim_pair(
        &self,
        first: &QueueEntry,
        second: &QueueEntry,
    ) -> Result<bool, QueueRepositoryError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueRepositoryError>;

    /// Number of waiting entries in the same partition ahead of `entry` in
    /// matching order.
    async fn count_waiting_ahead(
        &self,
        entry: &QueueEntry,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueRepositoryError>;
}

pub struct DynamoDbQueueRepository {
    pub client: Client,
    pub table_name: String,
}

impl DynamoDbQueueRepository {
    pub fn new(client: Client, table_name: &str) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
        }
    }

    fn user_key(user_id: &str) -> AttributeValue {
        AttributeValue::S(user_id.to_string())
    }

    fn waiting_status() -> AttributeValue {
        AttributeValue::S("Waiting".to_string())
    }

    fn claim_delete(&self, entry: &QueueEntry) -> Result<TransactWriteItem, QueueRepositoryError> {
        let delete = Delete::builder()
            .table_name(&self.table_name)
            .key("user_id", Self::user_key(&entry.user_id))
            .condition_expression("#status = :waiting AND joined_at = :joined_at")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":waiting", Self::waiting_status())
            .expression_attribute_values(
                ":joined_at",
                AttributeValue::N(entry.joined_at.timestamp_millis().to_string()),
            )
            .build()
            .map_err(|e| QueueRepositoryError::TransactionError(e.to_string()))?;

        Ok(TransactWriteItem::builder().delete(delete).build())
    }

    /// Counts waiting entries of the partition that joined before `entry`, or
    /// in the same millisecond with a smaller user id when `same_millisecond`.
    async fn count_partition(
        &self,
        entry: &QueueEntry,
        now: DateTime<Utc>,
        same_millisecond: bool,
    ) -> Result<usize, QueueRepositoryError> {
        let (key_condition, filter) = if same_millisecond {
            (
                "game_preference = :game_preference AND joined_at = :joined_at",
                "#status = :waiting AND expires_at > :now AND user_id < :user_id",
            )
        } else {
            (
                "game_preference = :game_preference AND joined_at < :joined_at",
                "#status = :waiting AND expires_at > :now",
            )
        };

        let mut ahead = 0;
        let mut exclusive_start_key = None;

        loop {
            let mut query = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(QUEUE_BY_GAME_INDEX)
                .key_condition_expression(key_condition)
                .filter_expression(filter)
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(
                    ":game_preference",
                    AttributeValue::S(entry.game_preference.clone()),
                )
                .expression_attribute_values(
                    ":joined_at",
                    AttributeValue::N(entry.joined_at.timestamp_millis().to_string()),
                )
                .expression_attribute_values(":waiting", Self::waiting_status())
                .expression_attribute_values(":now", AttributeValue::N(now.timestamp().to_string()));
            if same_millisecond {
                query = query.expression_attribute_values(":user_id", Self::user_key(&entry.user_id));
            }

            let output = query
                .select(Select::Count)
                .set_exclusive_start_key(exclusive_start_key)
                .send()
                .await
                .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

            ahead += output.count.max(0) as usize;

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => return Ok(ahead),
            }
        }
    }

    /// Deletes an expired entry unless it was replaced in the meantime.
    async fn delete_expired(&self, entry: &QueueEntry) -> Result<bool, QueueRepositoryError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("user_id", Self::user_key(&entry.user_id))
            .condition_expression("expires_at = :expires_at")
            .expression_attribute_values(
                ":expires_at",
                AttributeValue::N(entry.expires_at.timestamp().to_string()),
            )
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Purged expired queue entry for user {}", entry.user_id);
                Ok(true)
            }
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_conditional_check_failed_exception() =>
            {
                Ok(false)
            }
            Err(e) => Err(QueueRepositoryError::DynamoDb(e.to_string())),
        }
    }
}

#[async_trait]
impl QueueRepository for DynamoDbQueueRepository {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), QueueRepositoryError> {
        let item =
            to_item(entry).map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    async fn dequeue(&self, user_id: &str) -> Result<Option<QueueEntry>, QueueRepositoryError> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("user_id", Self::user_key(user_id))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        match output.attributes {
            Some(item) if !item.is_empty() => {
                let entry = from_item(item)
                    .map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            _ => Ok(None),
        }
    }

    async fn get_waiting(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueRepositoryError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("user_id", Self::user_key(user_id))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        match output.item {
            Some(item) => {
                let entry: QueueEntry = from_item(item)
                    .map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;
                Ok(entry.is_waiting(now).then_some(entry))
            }
            None => Ok(None),
        }
    }

    async fn find_oldest_waiting(
        &self,
        game_preference: &str,
        excluding_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueRepositoryError> {
        let mut oldest: Option<QueueEntry> = None;
        let mut exclusive_start_key = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(QUEUE_BY_GAME_INDEX)
                .key_condition_expression("game_preference = :game_preference")
                .expression_attribute_values(
                    ":game_preference",
                    AttributeValue::S(game_preference.to_string()),
                )
                .scan_index_forward(true)
                .set_exclusive_start_key(exclusive_start_key)
                .send()
                .await
                .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

            let last_evaluated_key = output.last_evaluated_key;

            for item in output.items.unwrap_or_default() {
                let entry: QueueEntry = from_item(item)
                    .map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;

                if entry.is_expired(now) {
                    self.delete_expired(&entry).await?;
                    continue;
                }

                if entry.status != QueueStatus::Waiting || entry.user_id == excluding_user_id {
                    continue;
                }

                // The index orders by join time only; ties are settled by user id.
                let settled = oldest
                    .as_ref()
                    .is_some_and(|current| current.queue_order().0 < entry.queue_order().0);
                if settled {
                    return Ok(oldest);
                }
                if oldest
                    .as_ref()
                    .map_or(true, |current| entry.queue_order() < current.queue_order())
                {
                    oldest = Some(entry);
                }
            }

            match last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => return Ok(oldest),
            }
        }
    }

    async fn claim_pair(
        &self,
        first: &QueueEntry,
        second: &QueueEntry,
    ) -> Result<bool, QueueRepositoryError> {
        let transaction_items = vec![self.claim_delete(first)?, self.claim_delete(second)?];

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(transaction_items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_transaction_canceled_exception() =>
            {
                debug!(
                    "Claim of {} and {} lost to a concurrent change",
                    first.user_id, second.user_id
                );
                Ok(false)
            }
            Err(e) => Err(QueueRepositoryError::TransactionError(e.to_string())),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueRepositoryError> {
        let mut purged = 0;
        let mut exclusive_start_key = None;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("expires_at <= :now")
                .expression_attribute_values(":now", AttributeValue::N(now.timestamp().to_string()))
                .set_exclusive_start_key(exclusive_start_key)
                .send()
                .await
                .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

            let last_evaluated_key = output.last_evaluated_key;

            for item in output.items.unwrap_or_default() {
                let entry: QueueEntry = from_item(item)
                    .map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;
                if self.delete_expired(&entry).await? {
                    purged += 1;
                }
            }

            match last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => return Ok(purged),
            }
        }
    }

    async fn count_waiting_ahead(
        &self,
        entry: &QueueEntry,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueRepositoryError> {
        let earlier = self.count_partition(entry, now, false).await?;
        let same_millisecond = self.count_partition(entry, now, true).await?;
        Ok(earlier + same_millisecond)
    }
}
