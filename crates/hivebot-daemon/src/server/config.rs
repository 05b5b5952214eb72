//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// gRPC server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address.
    pub tcp_addr: SocketAddr,

    /// HTTP/2 keepalive ping interval.
    pub keepalive_interval: Duration,

    /// How long to wait for a keepalive ping acknowledgement.
    pub keepalive_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: SocketAddr::from(([127, 0, 0, 1], 50071)),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create a config bound to the given TCP address.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            tcp_addr: addr,
            ..Default::default()
        }
    }
}
