use crate::repositories::errors::connection_repository_errors::ConnectionRepositoryError;

/// Failure to hand an event to the real-time channel. Logged by callers,
/// never surfaced to the user whose action produced the event.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Connection lookup failed: {0}")]
    Lookup(ConnectionRepositoryError),
    #[error("Delivered to {delivered} of {attempted} connections")]
    Partial { delivered: usize, attempted: usize },
}
