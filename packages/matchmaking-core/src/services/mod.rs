pub mod errors;
pub mod keyed_locks;
pub mod matcher;
pub mod notification_service;
pub mod queue_sweeper;
pub mod random_connection_service;
