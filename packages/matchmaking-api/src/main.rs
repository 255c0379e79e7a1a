use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod settings;
pub mod state;

use matchmaking_core::config::{ConfigError, MatchmakingConfig, StorageBackend};
use matchmaking_core::repositories::connection_repository::DynamoDbConnectionRepository;
use matchmaking_core::repositories::memory::{
    InMemoryProfileRepository, InMemoryQueueRepository, InMemorySessionRepository,
};
use matchmaking_core::repositories::profile_repository::DynamoDbProfileRepository;
use matchmaking_core::repositories::queue_repository::DynamoDbQueueRepository;
use matchmaking_core::repositories::session_repository::DynamoDbSessionRepository;
use matchmaking_core::services::notification_service::{
    BroadcastEventPublisher, NotificationService,
};
use matchmaking_core::services::queue_sweeper::spawn_queue_sweeper;
use matchmaking_core::services::random_connection_service::RandomConnectionService;
use services::token_service::TokenService;
use settings::ApiSettings;
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = MatchmakingConfig::from_env()?;
    let settings = ApiSettings::from_env()?;

    let connection_service = build_connection_service(&config).await?;
    let sweeper = spawn_queue_sweeper(connection_service.clone(), config.queue_sweep_interval);

    let app_state = AppState {
        connection_service: Arc::new(connection_service),
        token_service: Arc::new(TokenService::new(&settings.jwt_secret)),
    };

    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port)).await?;
    info!(
        "Matchmaking API listening on {} ({:?} storage)",
        listener.local_addr()?,
        config.backend
    );

    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Matchmaking API stopped");
    Ok(())
}

pub fn app(app_state: AppState) -> Router {
    // Clients are served from several origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/random-connection", routes::random_connection::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn build_connection_service(
    config: &MatchmakingConfig,
) -> Result<RandomConnectionService, ConfigError> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage; state is lost on restart");
            Ok(RandomConnectionService::new(
                Arc::new(InMemoryQueueRepository::new()),
                Arc::new(InMemorySessionRepository::new()),
                Arc::new(InMemoryProfileRepository::new()),
                Arc::new(BroadcastEventPublisher::default()),
                config.connection.clone(),
            ))
        }
        StorageBackend::DynamoDb => {
            let tables = config
                .tables
                .as_ref()
                .ok_or(ConfigError::Missing("RANDOM_QUEUE_TABLE"))?;
            let endpoint = config
                .websocket_api_endpoint
                .as_deref()
                .ok_or(ConfigError::Missing("WEBSOCKET_API_ENDPOINT"))?;

            let sdk_config = aws_config::load_from_env().await;
            let client = aws_sdk_dynamodb::Client::new(&sdk_config);
            let api_gateway_client =
                DynamoDbConnectionRepository::api_gateway_client(&sdk_config, endpoint);

            let connection_repository = Arc::new(DynamoDbConnectionRepository::new(
                client.clone(),
                api_gateway_client,
                &tables.connections,
            ));

            Ok(RandomConnectionService::new(
                Arc::new(DynamoDbQueueRepository::new(client.clone(), &tables.queue)),
                Arc::new(DynamoDbSessionRepository::new(
                    client.clone(),
                    &tables.sessions,
                    &tables.memberships,
                )),
                Arc::new(DynamoDbProfileRepository::new(client, &tables.users)),
                Arc::new(NotificationService::new(connection_repository)),
                config.connection.clone(),
            ))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
