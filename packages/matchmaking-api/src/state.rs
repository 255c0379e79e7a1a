use std::sync::Arc;

use matchmaking_core::services::random_connection_service::RandomConnectionService;

use crate::services::token_service::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub connection_service: Arc<RandomConnectionService>,
    pub token_service: Arc<TokenService>,
}
