#[cfg(test)]
use std::collections::HashMap;
use std::time::Duration;

use crate::services::random_connection_service::ConnectionSettings;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    DynamoDb,
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableNames {
    pub queue: String,
    pub sessions: String,
    pub memberships: String,
    pub users: String,
    pub connections: String,
}

/// Matchmaking settings read from the environment.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    pub backend: StorageBackend,
    /// Only present for the DynamoDB backend.
    pub tables: Option<TableNames>,
    pub websocket_api_endpoint: Option<String>,
    pub connection: ConnectionSettings,
    pub queue_sweep_interval: Duration,
}

impl MatchmakingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    #[cfg(test)]
    fn from_map(vars: &HashMap<&str, &str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).map(|value| value.to_string()))
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let backend = match lookup("STORAGE_BACKEND").as_deref() {
            None | Some("dynamodb") => StorageBackend::DynamoDb,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));
        let tables = match backend {
            StorageBackend::DynamoDb => Some(TableNames {
                queue: required("RANDOM_QUEUE_TABLE")?,
                sessions: required("RANDOM_SESSIONS_TABLE")?,
                memberships: required("SESSION_MEMBERSHIPS_TABLE")?,
                users: required("USERS_TABLE")?,
                connections: required("PLAYER_CONNECTIONS_TABLE")?,
            }),
            StorageBackend::Memory => None,
        };

        let defaults = ConnectionSettings::default();
        let ttl_secs = parse_or(&lookup, "QUEUE_ENTRY_TTL_SECS", 1800)?;
        let requeue_delay_ms = parse_or(&lookup, "REQUEUE_DELAY_MS", 2000)?;
        let sweep_secs = parse_or(&lookup, "QUEUE_SWEEP_INTERVAL_SECS", 60)?;
        if ttl_secs == 0 || sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                name: if ttl_secs == 0 {
                    "QUEUE_ENTRY_TTL_SECS"
                } else {
                    "QUEUE_SWEEP_INTERVAL_SECS"
                },
                value: "0".to_string(),
            });
        }

        Ok(MatchmakingConfig {
            backend,
            tables,
            websocket_api_endpoint: lookup("WEBSOCKET_API_ENDPOINT"),
            connection: ConnectionSettings {
                queue_entry_ttl: chrono::Duration::seconds(ttl_secs as i64),
                requeue_delay: Duration::from_millis(requeue_delay_ms),
                max_transcript_length: parse_or(
                    &lookup,
                    "MAX_TRANSCRIPT_LENGTH",
                    defaults.max_transcript_length as u64,
                )? as usize,
                max_message_length: parse_or(
                    &lookup,
                    "MAX_MESSAGE_LENGTH",
                    defaults.max_message_length as u64,
                )? as usize,
                match_attempts: defaults.match_attempts,
            },
            queue_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

fn parse_or<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
