//! Runtime configuration for the server and client binaries.

use std::net::{Ipv4Addr, SocketAddr};

/// Default chat port; override at run time with `--port`.
pub const DEFAULT_PORT: u16 = 51488;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the accept loop binds to, `host:port`.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
        }
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{port}"),
        }
    }
}

/// Where and as whom the client connects, gathered from the prompt loop.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub server_addr: SocketAddr,
}

impl ClientConfig {
    pub fn new(name: String, addr: Ipv4Addr, port: u16) -> Self {
        Self {
            name,
            server_addr: SocketAddr::from((addr, port)),
        }
    }
}
