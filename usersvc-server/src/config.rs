//! Listener and lifecycle settings

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_RPC_PORT: u16 = 50051;
pub const DEFAULT_HELLO_UPSTREAM: &str = "http://localhost:8082/hello";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind address (default: 0.0.0.0:8080)
    pub http_addr: SocketAddr,

    /// gRPC bind address (default: 0.0.0.0:50051)
    pub rpc_addr: SocketAddr,

    /// Upper bound on one HTTP request, answered with 408 when exceeded
    pub request_timeout: Duration,

    /// How long each listener, and then the pool, may take to drain
    pub shutdown_grace: Duration,

    /// Target of the `/hello` passthrough
    pub hello_upstream: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_HTTP_PORT)),
            rpc_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_RPC_PORT)),
            request_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
            hello_upstream: DEFAULT_HELLO_UPSTREAM.to_owned(),
        }
    }
}

impl ServerConfig {
    /// Both listeners on ephemeral localhost ports.
    pub fn ephemeral() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            rpc_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Self::default()
        }
    }
}
