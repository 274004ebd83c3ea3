//! fleetlb Node Management
//!
//! Node lifecycle on the load balancer side: registration, whitelisting,
//! heartbeat health, tunnel admission, request routing and the request
//! outcome ledger.

pub mod error;
pub mod gatekeeper;
pub mod health;
pub mod recorder;
pub mod registration;
pub mod router;
pub mod selection;
pub mod whitelist;

pub use error::{FleetError, Result};
pub use gatekeeper::FleetGatekeeper;
pub use health::{HealthTracker, PingOutcome, DEFAULT_PING_INTERVAL_THRESHOLD};
pub use recorder::{NodeStats, RequestRecorder};
pub use registration::{NodeRegistrar, NodeRegistration};
pub use router::{NodeRouter, Route};
pub use selection::{
    selector_for, NodeSelector, RandomSelector, RoundRobinSelector, SelectionStrategy,
};
pub use whitelist::Whitelist;
