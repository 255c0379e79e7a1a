use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::events::ConnectionEvent;
use crate::repositories::connection_repository::ConnectionRepository;
use crate::repositories::errors::connection_repository_errors::ConnectionRepositoryError;
use crate::services::errors::delivery_errors::DeliveryError;

#[cfg(test)]
use mockall::automock;

/// Best-effort sink for events addressed to a user.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, user_id: &str, event: &ConnectionEvent) -> Result<(), DeliveryError>;
}

/// Pushes events to every live WebSocket connection of a user through the
/// API Gateway Management API.
#[derive(Clone)]
pub struct NotificationService {
    repository: Arc<dyn ConnectionRepository>,
}

impl NotificationService {
    pub fn new(repository: Arc<dyn ConnectionRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl EventPublisher for NotificationService {
    async fn publish(&self, user_id: &str, event: &ConnectionEvent) -> Result<(), DeliveryError> {
        let message = serde_json::to_string(event)?;
        let connection_ids = self
            .repository
            .get_connection_ids(user_id)
            .await
            .map_err(DeliveryError::Lookup)?;

        if connection_ids.is_empty() {
            info!(
                "User {} is not connected, skipping {} notification",
                user_id,
                event.name()
            );
            return Ok(());
        }

        let attempted = connection_ids.len();
        let mut delivered = 0;
        let mut failed = 0;
        for connection_id in connection_ids {
            match self.repository.send_message(&connection_id, &message).await {
                Ok(()) => delivered += 1,
                Err(ConnectionRepositoryError::Gone(_)) => {
                    if let Err(e) = self
                        .repository
                        .remove_connection(user_id, &connection_id)
                        .await
                    {
                        warn!("Failed to remove stale connection {}: {}", connection_id, e);
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        "Failed to send {} to connection {}: {}",
                        event.name(),
                        connection_id,
                        e
                    );
                }
            }
        }

        debug!(
            "Delivered {} to {}/{} connections of user {}",
            event.name(),
            delivered,
            attempted,
            user_id
        );

        // Stale connections alone count as not connected.
        if delivered == 0 && failed > 0 {
            return Err(DeliveryError::Partial {
                delivered,
                attempted,
            });
        }
        Ok(())
    }
}

/// In-process publisher used with the memory backend. Subscribers receive
/// every `(user_id, event)` pair; with no subscribers events are dropped.
#[derive(Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<(String, ConnectionEvent)>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, ConnectionEvent)> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, user_id: &str, event: &ConnectionEvent) -> Result<(), DeliveryError> {
        debug!("Broadcasting {} to user {}", event.name(), user_id);
        let _ = self.sender.send((user_id.to_string(), event.clone()));
        Ok(())
    }
}
