//! TCP keepalive for tunnel connections
//!
//! A silently dead node is detected by the kernel after
//! `idle + count * interval` without waiting for a heartbeat timeout.

use serde::{Deserialize, Serialize};
use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;

/// How long a connection may be idle before probing starts
pub const DEFAULT_KEEPALIVE_IDLE: Duration = Duration::from_secs(600);

/// Unanswered probes before the connection is marked dead
pub const DEFAULT_KEEPALIVE_COUNT: u32 = 20;

/// Delay between unanswered probes
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    pub idle: Duration,
    pub count: u32,
    pub interval: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            idle: DEFAULT_KEEPALIVE_IDLE,
            count: DEFAULT_KEEPALIVE_COUNT,
            interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

impl KeepAliveConfig {
    /// Worst-case time before a dead peer is detected
    pub fn detection_time(&self) -> Duration {
        self.idle + self.interval * self.count
    }

    fn to_socket2(self) -> TcpKeepalive {
        let keepalive = TcpKeepalive::new().with_time(self.idle);

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd", target_os = "windows"))]
        let keepalive = keepalive.with_interval(self.interval);

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
        let keepalive = keepalive.with_retries(self.count);

        keepalive
    }

    /// Enable keepalive on a TCP socket
    pub fn apply(&self, socket: SockRef<'_>) -> std::io::Result<()> {
        socket.set_tcp_keepalive(&self.to_socket2())
    }
}
