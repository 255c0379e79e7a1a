use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::services::random_connection_service::RandomConnectionService;

/// Periodically removes expired queue entries. Matching never depends on this
/// running; expired entries are also skipped and purged on read.
pub fn spawn_queue_sweeper(service: RandomConnectionService, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match service.purge_expired().await {
                Ok(0) => debug!("Queue sweep found no expired entries"),
                Ok(purged) => info!("Queue sweep purged {} expired entries", purged),
                Err(e) => error!("Queue sweep failed: {}", e),
            }
        }
    })
}
