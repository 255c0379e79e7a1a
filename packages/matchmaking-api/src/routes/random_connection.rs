use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use matchmaking_core::models::requests::{
    DisconnectRequest, HistoryQuery, JoinQueueRequest, SendMessageRequest, SignalRequest,
};
use matchmaking_core::models::responses::{
    HistoryResponse, JoinQueueResponse, QueueStatusResponse,
};
use matchmaking_core::models::session::{Session, TranscriptMessage};
use matchmaking_core::services::random_connection_service::JoinQueueOutcome;
use tracing::debug;

use crate::{error::ApiError, middleware::auth::AuthenticatedUser, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/join-queue", post(join_queue))
        .route("/leave-queue", delete(leave_queue))
        .route("/current-connection", get(current_connection))
        .route("/disconnect", post(disconnect))
        .route("/send-message", post(send_message))
        .route("/signal", post(signal))
        .route("/history", get(history))
        .route("/queue-status", get(queue_status))
        .route("/cleanup-current", post(cleanup_current))
}

async fn join_queue(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<JoinQueueRequest>,
) -> Result<Json<JoinQueueResponse>, ApiError> {
    let outcome = state
        .connection_service
        .join_queue(
            &user.user_id,
            &payload.game_preference,
            payload.video_enabled,
        )
        .await
        .map_err(|e| {
            debug!("Failed to join queue for user {}: {}", user.user_id, e);
            ApiError::from(e)
        })?;

    let response = match outcome {
        JoinQueueOutcome::Matched(session) => JoinQueueResponse {
            matched: true,
            session: Some(session),
            entry: None,
        },
        JoinQueueOutcome::Waiting(entry) => JoinQueueResponse {
            matched: false,
            session: None,
            entry: Some(entry),
        },
    };
    Ok(Json(response))
}

async fn leave_queue(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<StatusCode, ApiError> {
    state
        .connection_service
        .leave_queue(&user.user_id)
        .await
        .map_err(|e| {
            debug!("Failed to leave queue for user {}: {}", user.user_id, e);
            ApiError::from(e)
        })?;

    Ok(StatusCode::OK)
}

async fn current_connection(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Session>, ApiError> {
    let session = state
        .connection_service
        .current_connection(&user.user_id)
        .await?;

    Ok(Json(session))
}

async fn disconnect(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<DisconnectRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state
        .connection_service
        .disconnect(&user.user_id, &payload.room_id)
        .await
        .map_err(|e| {
            debug!(
                "Failed to disconnect user {} from {}: {}",
                user.user_id, payload.room_id, e
            );
            ApiError::from(e)
        })?;

    Ok(Json(session))
}

async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<TranscriptMessage>, ApiError> {
    let message = state
        .connection_service
        .send_message(&user.user_id, &payload.room_id, &payload.text)
        .await?;

    Ok(Json(message))
}

async fn signal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SignalRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .connection_service
        .relay_signal(&user.user_id, &payload.room_id, payload.payload)
        .await?;

    Ok(StatusCode::ACCEPTED)
}

async fn history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state
        .connection_service
        .history(&user.user_id, query.page, query.limit)
        .await?;

    Ok(Json(history))
}

async fn queue_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<QueueStatusResponse>, ApiError> {
    let status = state.connection_service.queue_status(&user.user_id).await?;

    Ok(Json(status))
}

async fn cleanup_current(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<StatusCode, ApiError> {
    state
        .connection_service
        .cleanup_current(&user.user_id)
        .await
        .map_err(|e| {
            debug!("Failed to clean up user {}: {}", user.user_id, e);
            ApiError::from(e)
        })?;

    Ok(StatusCode::NO_CONTENT)
}
