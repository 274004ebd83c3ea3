//! RPC exchanges over an accepted tunnel
//!
//! Once the handshake is done the tunnel stream carries request/response
//! pairs: the load balancer writes one raw request frame and the node
//! answers with one raw response frame. Exchanges on one tunnel run one at
//! a time, in the order they were queued.

use crate::connection::{read_raw_frame, write_raw_frame, MAX_RPC_FRAME_LEN};
use crate::error::{Result, TunnelError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Time a node gets to answer one forwarded request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

const QUEUE_DEPTH: usize = 64;

struct Exchange {
    request: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

/// Sending side of a tunnel, shared by every caller routed to the node
#[derive(Debug, Clone)]
pub struct TunnelChannel {
    tx: mpsc::Sender<Exchange>,
}

/// Queue of exchanges waiting for the task that owns the tunnel stream
pub struct ChannelRequests {
    rx: mpsc::Receiver<Exchange>,
}

impl TunnelChannel {
    pub fn new() -> (TunnelChannel, ChannelRequests) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        (TunnelChannel { tx }, ChannelRequests { rx })
    }

    /// Send `request` to the node and wait for its response
    pub async fn exchange(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Exchange { request, reply })
            .await
            .map_err(|_| TunnelError::ChannelClosed)?;
        response.await.map_err(|_| TunnelError::ChannelClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn round_trip(stream: &mut TcpStream, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    let io = async {
        write_raw_frame(stream, request).await?;
        read_raw_frame(stream, MAX_RPC_FRAME_LEN).await
    };
    match tokio::time::timeout(timeout, io).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(TunnelError::Exchange(e.to_string())),
        Err(_) => Err(TunnelError::Exchange(format!(
            "node did not answer within {}s",
            timeout.as_secs()
        ))),
    }
}

/// Serve queued exchanges on `stream` until the node closes it.
///
/// A failed exchange leaves the stream out of step with the node, so it
/// ends the tunnel. Data from the node outside an exchange does too.
pub async fn drive(
    stream: &mut TcpStream,
    mut requests: ChannelRequests,
    response_timeout: Duration,
) -> Result<()> {
    let mut peeked = [0u8; 1];
    loop {
        tokio::select! {
            exchange = requests.rx.recv() => {
                let Some(exchange) = exchange else {
                    return Ok(());
                };
                match round_trip(stream, &exchange.request, response_timeout).await {
                    Ok(response) => {
                        debug!(bytes = response.len(), "tunnel exchange done");
                        let _ = exchange.reply.send(Ok(response));
                    }
                    Err(e) => {
                        let _ = exchange.reply.send(Err(TunnelError::Exchange(e.to_string())));
                        return Err(e);
                    }
                }
            }
            read = stream.peek(&mut peeked) => {
                return match read? {
                    0 => Ok(()),
                    _ => Err(TunnelError::Exchange(
                        "node sent data outside an exchange".to_string(),
                    )),
                };
            }
        }
    }
}
