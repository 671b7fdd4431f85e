pub mod health_checker;
pub mod selector;

pub use health_checker::{
    HealthCheckError, HealthChecker, HealthSummary, ProbeOutcome, ProbeResult, PROBE_BODY,
    PROBE_PATH,
};
pub use selector::{EndpointPool, PoolError};
