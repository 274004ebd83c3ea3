//! Tunnel and port pool error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Invalid port range {0:?}, should be defined as \"PortMin:PortMax\"")]
    InvalidRange(String),

    #[error("Port pool exhausted: all ports in {min}:{max} are allocated")]
    Exhausted { min: u16, max: u16 },
}

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Tunnel already registered for node {0}")]
    DuplicateTunnel(String),

    #[error("No tunnel registered for node {0}")]
    NotFound(String),

    #[error("Capacity reached: {0} nodes already connected")]
    CapacityReached(usize),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Failed to apply keepalive: {0}")]
    KeepAlive(std::io::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Node {0} is not allowed to open a tunnel")]
    Unauthorized(String),

    #[error("Tunnel closed")]
    ChannelClosed,

    #[error("Tunnel of node {0} carries no request channel")]
    NoChannel(String),

    #[error("Tunnel exchange failed: {0}")]
    Exchange(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
