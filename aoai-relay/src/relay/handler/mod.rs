pub mod loadbalanced;
pub mod types;

pub use loadbalanced::{LoadBalancedHandler, RelayMode};
pub use types::*;
