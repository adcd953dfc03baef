pub mod auth;
pub mod authz;
pub mod config;
pub mod error;
pub mod favorites;
pub mod listings;
pub mod messaging;
pub mod models;
pub mod notify;
pub mod openapi;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod security;

// Re-export commonly used items for tests / external users
pub use authz::Principal;
pub use error::AppError;
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
