use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use matchmaking_core::models::responses::ErrorResponse;
use matchmaking_core::services::errors::random_connection_service_errors::RandomConnectionServiceError;
use tracing::error;

use crate::services::errors::token_service_errors::TokenServiceError;

#[derive(Debug)]
pub enum ApiError {
    RandomConnection(RandomConnectionServiceError),
    Token(TokenServiceError),
}

impl From<RandomConnectionServiceError> for ApiError {
    fn from(error: RandomConnectionServiceError) -> Self {
        ApiError::RandomConnection(error)
    }
}

impl From<TokenServiceError> for ApiError {
    fn from(error: TokenServiceError) -> Self {
        ApiError::Token(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::RandomConnection(RandomConnectionServiceError::ValidationError(msg)) => {
                (StatusCode::BAD_REQUEST, msg)
            }
            ApiError::RandomConnection(RandomConnectionServiceError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, msg)
            }
            ApiError::RandomConnection(RandomConnectionServiceError::Conflict(msg)) => {
                (StatusCode::CONFLICT, msg)
            }
            ApiError::RandomConnection(RandomConnectionServiceError::RepositoryError(msg)) => {
                error!("Storage failure: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }

            ApiError::Token(err) => (StatusCode::UNAUTHORIZED, err.to_string()),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
