//! AOAI Relay Library
//!
//! This library provides request relay functionality for the AOAI gateway including:
//! - Inbound to outbound request translation
//! - Streaming and buffered response relay
//! - Error to status code mapping

pub mod relay;

// Re-export commonly used types
pub use relay::handler::{LoadBalancedHandler, RelayError, RelayMode};
pub use relay::request::{InboundRequest, OutboundRequest};
