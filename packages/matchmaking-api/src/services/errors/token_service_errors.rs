#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TokenServiceError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid JWT token")]
    InvalidToken,
    #[error("JWT token has expired")]
    ExpiredToken,
}
