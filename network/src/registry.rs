//! Reverse tunnel registry
//!
//! Binds a node id to its live tunnel connection and the port taken from the
//! [`AddrPool`]. One lock guards the whole map; the pool lock is only ever
//! taken while holding it, never the other way round.

use crate::addr_pool::AddrPool;
use crate::channel::TunnelChannel;
use crate::connection::TunnelConnection;
use crate::error::{Result, TunnelError};
use crate::keepalive::KeepAliveConfig;
use chrono::{DateTime, Utc};
use fleet_core::NodeId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

struct Tunnel {
    port: u16,
    connected_at: DateTime<Utc>,
    conn: Arc<dyn TunnelConnection>,
}

/// Snapshot of a registered tunnel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunnelInfo {
    pub node_id: NodeId,
    pub port: u16,
    pub peer_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

pub struct TunnelRegistry {
    pool: Arc<AddrPool>,
    keepalive: KeepAliveConfig,
    /// Maximum number of nodes connected at the same time
    capacity: usize,
    tunnels: Mutex<HashMap<NodeId, Tunnel>>,
}

impl TunnelRegistry {
    /// Registry admitting as many nodes as the pool has ports
    pub fn new(pool: Arc<AddrPool>, keepalive: KeepAliveConfig) -> Self {
        let capacity = pool.capacity();
        Self::with_capacity(pool, keepalive, capacity)
    }

    pub fn with_capacity(pool: Arc<AddrPool>, keepalive: KeepAliveConfig, capacity: usize) -> Self {
        TunnelRegistry {
            pool,
            keepalive,
            capacity,
            tunnels: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &AddrPool {
        &self.pool
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether another node may connect right now
    pub fn has_free_slot(&self) -> bool {
        self.tunnels.lock().len() < self.capacity
    }

    /// Register a live tunnel for `node_id` and allocate its port.
    ///
    /// A node with a live tunnel is rejected; callers must `unregister` first.
    pub fn register(&self, node_id: &str, conn: Arc<dyn TunnelConnection>) -> Result<TunnelInfo> {
        let mut tunnels = self.tunnels.lock();
        if tunnels.contains_key(node_id) {
            return Err(TunnelError::DuplicateTunnel(node_id.to_string()));
        }
        if tunnels.len() >= self.capacity {
            return Err(TunnelError::CapacityReached(self.capacity));
        }

        let port = self.pool.acquire()?;
        if let Err(e) = conn.apply_keepalive(&self.keepalive) {
            self.pool.release(port);
            return Err(TunnelError::KeepAlive(e));
        }

        let tunnel = Tunnel {
            port,
            connected_at: Utc::now(),
            conn,
        };
        let info = TunnelInfo {
            node_id: node_id.to_string(),
            port,
            peer_addr: tunnel.conn.peer_addr(),
            connected_at: tunnel.connected_at,
        };
        tunnels.insert(node_id.to_string(), tunnel);

        info!(node = %node_id, port, peer = %info.peer_addr, "tunnel registered");
        Ok(info)
    }

    /// Close and forget the tunnel of `node_id`, returning its port to the
    /// pool. Unknown nodes are ignored.
    pub fn unregister(&self, node_id: &str) -> Option<TunnelInfo> {
        let removed = self.tunnels.lock().remove(node_id).map(|tunnel| {
            self.pool.release(tunnel.port);
            tunnel
        });

        match removed {
            Some(tunnel) => {
                tunnel.conn.shutdown();
                info!(node = %node_id, port = tunnel.port, "tunnel unregistered");
                Some(TunnelInfo {
                    node_id: node_id.to_string(),
                    port: tunnel.port,
                    peer_addr: tunnel.conn.peer_addr(),
                    connected_at: tunnel.connected_at,
                })
            }
            None => {
                debug!(node = %node_id, "unregister for node without tunnel");
                None
            }
        }
    }

    /// Unregister only if the live tunnel is still `conn`. Used by the
    /// connection watcher so a stale close never removes a newer tunnel.
    pub fn unregister_connection(&self, node_id: &str, conn: &Arc<dyn TunnelConnection>) -> bool {
        let mut tunnels = self.tunnels.lock();
        let same = tunnels
            .get(node_id)
            .map(|t| Arc::ptr_eq(&t.conn, conn))
            .unwrap_or(false);
        if !same {
            debug!(node = %node_id, "closed connection is no longer the registered tunnel");
            return false;
        }
        if let Some(tunnel) = tunnels.remove(node_id) {
            self.pool.release(tunnel.port);
            drop(tunnels);
            tunnel.conn.shutdown();
            info!(node = %node_id, port = tunnel.port, "tunnel closed");
        }
        true
    }

    pub fn lookup(&self, node_id: &str) -> Result<TunnelInfo> {
        self.tunnels
            .lock()
            .get(node_id)
            .map(|t| TunnelInfo {
                node_id: node_id.to_string(),
                port: t.port,
                peer_addr: t.conn.peer_addr(),
                connected_at: t.connected_at,
            })
            .ok_or_else(|| TunnelError::NotFound(node_id.to_string()))
    }

    /// Request channel into the live tunnel of `node_id`
    pub fn channel(&self, node_id: &str) -> Result<TunnelChannel> {
        let tunnels = self.tunnels.lock();
        let tunnel = tunnels
            .get(node_id)
            .ok_or_else(|| TunnelError::NotFound(node_id.to_string()))?;
        tunnel
            .conn
            .channel()
            .ok_or_else(|| TunnelError::NoChannel(node_id.to_string()))
    }

    pub fn is_registered(&self, node_id: &str) -> bool {
        self.tunnels.lock().contains_key(node_id)
    }

    /// Snapshot of all live tunnels, ordered by node id
    pub fn tunnels(&self) -> Vec<TunnelInfo> {
        let mut all: Vec<TunnelInfo> = self
            .tunnels
            .lock()
            .iter()
            .map(|(id, t)| TunnelInfo {
                node_id: id.clone(),
                port: t.port,
                peer_addr: t.conn.peer_addr(),
                connected_at: t.connected_at,
            })
            .collect();
        all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        all
    }

    pub fn count(&self) -> usize {
        self.tunnels.lock().len()
    }
}
