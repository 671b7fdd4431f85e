//! AOAI Gateway Core Library
//!
//! This library provides core functionality for the AOAI gateway including:
//! - Configuration management
//! - Backend credentials
//! - Upstream HTTP client construction

pub mod client;
pub mod config;
pub mod credential;

// Re-export commonly used types
pub use client::ClientFactory;
pub use config::model::{Config, CredentialKind, CredentialSettings, Endpoint, GlobalSettings};
pub use credential::{AccessToken, CredentialError, CredentialProvider};
