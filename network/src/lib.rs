//! fleetlb Network Module
//!
//! Reverse tunnel plumbing: the port pool, keepalive, the tunnel registry,
//! the server nodes dial into and the request channel over each tunnel.
pub mod addr_pool;
pub mod channel;
pub mod connection;
pub mod error;
pub mod keepalive;
pub mod registry;
pub mod server;

pub use addr_pool::{AddrPool, PortRange};
pub use channel::{TunnelChannel, DEFAULT_RESPONSE_TIMEOUT};
pub use connection::{TcpTunnel, TunnelConnection, TunnelHello, TunnelReply};
pub use error::{PoolError, Result, TunnelError};
pub use keepalive::KeepAliveConfig;
pub use registry::{TunnelInfo, TunnelRegistry};
pub use server::{TunnelGatekeeper, TunnelServer};
