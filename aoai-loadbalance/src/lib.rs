//! AOAI Load Balance Library
//!
//! This library provides the serving pool for the AOAI gateway:
//! - Startup health filtering of candidate endpoints
//! - Uniform random endpoint selection

pub mod loadbalance;

// Re-export commonly used types
pub use loadbalance::{
    EndpointPool, HealthCheckError, HealthChecker, HealthSummary, PoolError, ProbeOutcome,
    ProbeResult,
};
