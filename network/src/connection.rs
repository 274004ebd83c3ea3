//! Tunnel connections and framing
//!
//! Frames are a u32 big-endian length followed by the payload. Handshake
//! frames carry JSON messages, RPC frames carry the raw request or response
//! body.

use crate::channel::TunnelChannel;
use crate::keepalive::KeepAliveConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use socket2::SockRef;
use std::io;
use std::net::{Shutdown, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest accepted handshake frame
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Largest accepted RPC frame on an established tunnel
pub const MAX_RPC_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Sent by a node right after dialing in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelHello {
    pub node_id: String,
}

/// Load balancer answer to a [`TunnelHello`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TunnelReply {
    Accepted { port: u16 },
    Rejected { reason: String },
}

/// Control surface of a live tunnel transport held by the registry
pub trait TunnelConnection: Send + Sync + std::fmt::Debug {
    fn peer_addr(&self) -> SocketAddr;

    fn apply_keepalive(&self, config: &KeepAliveConfig) -> std::io::Result<()>;

    /// Close the transport; further reads on the data side see EOF
    fn shutdown(&self);

    /// Request channel into the node, when the transport carries one
    fn channel(&self) -> Option<TunnelChannel> {
        None
    }
}

/// Control handle on a TCP tunnel. The data side of the socket stays with
/// whoever drives the tunnel.
#[derive(Debug)]
pub struct TcpTunnel {
    peer_addr: SocketAddr,
    control: std::net::TcpStream,
    channel: Option<TunnelChannel>,
}

impl TcpTunnel {
    /// Split a tokio stream into a control handle and the stream itself
    pub fn from_stream(stream: TcpStream) -> std::io::Result<(Self, TcpStream)> {
        let peer_addr = stream.peer_addr()?;
        let std_stream = stream.into_std()?;
        let control = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;
        Ok((
            TcpTunnel {
                peer_addr,
                control,
                channel: None,
            },
            stream,
        ))
    }

    pub fn with_channel(mut self, channel: TunnelChannel) -> Self {
        self.channel = Some(channel);
        self
    }
}

impl TunnelConnection for TcpTunnel {
    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn apply_keepalive(&self, config: &KeepAliveConfig) -> std::io::Result<()> {
        config.apply(SockRef::from(&self.control))
    }

    fn shutdown(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }

    fn channel(&self) -> Option<TunnelChannel> {
        self.channel.clone()
    }
}

pub async fn write_raw_frame<W>(stream: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Frame too large"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

pub async fn read_raw_frame<R>(stream: &mut R, max_len: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", len),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn send_frame<W, T>(stream: &mut W, message: &T) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_vec(message).map_err(|e| e.to_string())?;
    write_raw_frame(stream, &json).await.map_err(|e| e.to_string())
}

pub async fn recv_frame<R, T>(stream: &mut R) -> Result<T, String>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let buf = read_raw_frame(stream, MAX_FRAME_LEN)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::from_slice(&buf).map_err(|e| e.to_string())
}
