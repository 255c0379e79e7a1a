use crate::repositories::errors::profile_repository_errors::ProfileRepositoryError;
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;
use crate::repositories::errors::session_repository_errors::SessionRepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum RandomConnectionServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Repository error: {0}")]
    RepositoryError(String),
}

impl RandomConnectionServiceError {
    pub fn not_in_queue() -> Self {
        RandomConnectionServiceError::NotFound("You are not in the queue".to_string())
    }

    pub fn connection_not_found() -> Self {
        RandomConnectionServiceError::NotFound("Connection not found".to_string())
    }
}

impl From<QueueRepositoryError> for RandomConnectionServiceError {
    fn from(error: QueueRepositoryError) -> Self {
        RandomConnectionServiceError::RepositoryError(error.to_string())
    }
}

impl From<SessionRepositoryError> for RandomConnectionServiceError {
    fn from(error: SessionRepositoryError) -> Self {
        match error {
            SessionRepositoryError::NotFound | SessionRepositoryError::NotOpen => {
                RandomConnectionServiceError::connection_not_found()
            }
            SessionRepositoryError::ParticipantBusy => {
                RandomConnectionServiceError::Conflict(error.to_string())
            }
            SessionRepositoryError::TranscriptFull(_) => {
                RandomConnectionServiceError::ValidationError(error.to_string())
            }
            SessionRepositoryError::Serialization(_)
            | SessionRepositoryError::DynamoDb(_)
            | SessionRepositoryError::TransactionError(_) => {
                RandomConnectionServiceError::RepositoryError(error.to_string())
            }
        }
    }
}

impl From<ProfileRepositoryError> for RandomConnectionServiceError {
    fn from(error: ProfileRepositoryError) -> Self {
        RandomConnectionServiceError::RepositoryError(error.to_string())
    }
}
