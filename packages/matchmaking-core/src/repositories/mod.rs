pub mod connection_repository;
pub mod errors;
pub mod memory;
pub mod profile_repository;
pub mod queue_repository;
pub mod session_repository;
