use serde::Serialize;

use crate::models::queue::QueueEntry;
use crate::models::session::Session;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct JoinQueueResponse {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<QueueEntry>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub sessions: Vec<Session>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub entry: QueueEntry,
    pub position: usize,
}
