use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct JoinQueueRequest {
    pub game_preference: String,
    #[serde(default)]
    pub video_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub room_id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub room_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    10
}
