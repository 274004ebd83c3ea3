//! Tunnel server accepting node dial-ins
//!
//! Handshake: node sends [`TunnelHello`], the server answers with a
//! [`TunnelReply`]. An accepted tunnel then carries forwarded RPC requests
//! (see [`crate::channel`]) and stays registered until the stream closes or
//! an exchange fails.

use crate::channel::{drive, TunnelChannel, DEFAULT_RESPONSE_TIMEOUT};
use crate::connection::{recv_frame, send_frame, TcpTunnel, TunnelConnection, TunnelHello, TunnelReply};
use crate::error::{Result, TunnelError};
use crate::registry::{TunnelInfo, TunnelRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Time allowed for a node to send its hello
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides which nodes may open a tunnel and observes tunnel lifecycle
pub trait TunnelGatekeeper: Send + Sync {
    fn authorize(&self, node_id: &str) -> std::result::Result<(), String>;

    fn on_open(&self, info: &TunnelInfo);

    fn on_close(&self, node_id: &str);
}

pub struct TunnelServer {
    listener: TcpListener,
    registry: Arc<TunnelRegistry>,
    gatekeeper: Arc<dyn TunnelGatekeeper>,
    response_timeout: Duration,
}

impl TunnelServer {
    pub async fn bind(
        listen_addr: SocketAddr,
        registry: Arc<TunnelRegistry>,
        gatekeeper: Arc<dyn TunnelGatekeeper>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!(addr = %listen_addr, "tunnel server listening");
        Ok(TunnelServer {
            listener,
            registry,
            gatekeeper,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
    }

    /// Time a node gets to answer one forwarded request
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept node connections forever
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let registry = self.registry.clone();
                    let gatekeeper = self.gatekeeper.clone();
                    let response_timeout = self.response_timeout;
                    tokio::spawn(async move {
                        if let Err(e) =
                            serve_node(stream, registry, gatekeeper, response_timeout).await
                        {
                            debug!(peer = %addr, error = %e, "tunnel connection ended");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept tunnel connection");
                }
            }
        }
    }
}

async fn reject(stream: &mut TcpStream, reason: String) -> Result<()> {
    let reply = TunnelReply::Rejected {
        reason: reason.clone(),
    };
    let _ = send_frame(stream, &reply).await;
    Err(TunnelError::Handshake(reason))
}

/// Run the handshake for one node, then serve its tunnel until it closes
pub async fn serve_node(
    mut stream: TcpStream,
    registry: Arc<TunnelRegistry>,
    gatekeeper: Arc<dyn TunnelGatekeeper>,
    response_timeout: Duration,
) -> Result<()> {
    let hello: TunnelHello = tokio::time::timeout(HANDSHAKE_TIMEOUT, recv_frame(&mut stream))
        .await
        .map_err(|_| TunnelError::Handshake("timed out waiting for hello".to_string()))?
        .map_err(TunnelError::Handshake)?;
    let node_id = hello.node_id;

    if let Err(reason) = gatekeeper.authorize(&node_id) {
        warn!(node = %node_id, reason = %reason, "tunnel refused");
        return reject(&mut stream, reason).await;
    }

    let (control, mut stream) = TcpTunnel::from_stream(stream)?;
    let (channel, requests) = TunnelChannel::new();
    let conn: Arc<dyn TunnelConnection> = Arc::new(control.with_channel(channel));

    let info = match registry.register(&node_id, conn.clone()) {
        Ok(info) => info,
        Err(e) => {
            warn!(node = %node_id, error = %e, "tunnel registration failed");
            return reject(&mut stream, e.to_string()).await;
        }
    };

    if let Err(e) = send_frame(&mut stream, &TunnelReply::Accepted { port: info.port }).await {
        registry.unregister_connection(&node_id, &conn);
        return Err(TunnelError::Handshake(e));
    }
    gatekeeper.on_open(&info);

    if let Err(e) = drive(&mut stream, requests, response_timeout).await {
        warn!(node = %node_id, error = %e, "closing tunnel");
    }

    if registry.unregister_connection(&node_id, &conn) {
        gatekeeper.on_close(&node_id);
    }
    Ok(())
}
