pub mod events;
pub mod profile;
pub mod queue;
pub mod requests;
pub mod responses;
pub mod session;
