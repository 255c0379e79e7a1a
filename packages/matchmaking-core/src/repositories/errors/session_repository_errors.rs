#[derive(Debug, thiserror::Error)]
pub enum SessionRepositoryError {
    #[error("Session not found")]
    NotFound,
    #[error("Session is not open")]
    NotOpen,
    #[error("A participant already has an open session")]
    ParticipantBusy,
    #[error("Transcript limit of {0} messages reached")]
    TranscriptFull(usize),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Transaction error: {0}")]
    TransactionError(String),
}
