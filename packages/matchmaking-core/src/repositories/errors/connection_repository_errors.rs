#[derive(Debug, thiserror::Error)]
pub enum ConnectionRepositoryError {
    /// The gateway reports the connection as closed.
    #[error("Connection {0} is gone")]
    Gone(String),
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("API Gateway error: {0}")]
    ApiGateway(String),
}
