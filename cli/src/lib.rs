//! Command line front end of the fleetlb load balancer

pub mod config;
pub mod logging;
pub mod payout;
pub mod start;

pub use config::{Config, ConfigError, PayoutArgs, StartArgs};

/// Version with the commit it was built from
pub fn version_string() -> String {
    format!("{} ({})", fleet_core::version(), env!("GIT_HASH"))
}
