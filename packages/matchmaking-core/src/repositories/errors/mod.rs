pub mod connection_repository_errors;
pub mod profile_repository_errors;
pub mod queue_repository_errors;
pub mod session_repository_errors;
