#[derive(Debug, thiserror::Error)]
pub enum QueueRepositoryError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Transaction error: {0}")]
    TransactionError(String),
}
