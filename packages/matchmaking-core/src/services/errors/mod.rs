pub mod delivery_errors;
pub mod random_connection_service_errors;
