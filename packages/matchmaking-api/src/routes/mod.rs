pub mod health;
pub mod random_connection;
