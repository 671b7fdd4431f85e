//! AOAI Gateway Server Library
//!
//! This library wires configuration, startup health filtering and the relay
//! handler into an HTTP server

pub mod app;
pub mod router;

// Re-export the main server function
pub use app::{create_app, start_server, AppState};
