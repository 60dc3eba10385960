pub mod app;
pub mod authz;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod models;
pub mod routes;

// Re-export commonly used items for tests
pub use app::{build_engine, create_app};
