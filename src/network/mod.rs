//! Network module - Handles TCP communication with players
//!
//! Provides:
//! - Server for accepting player connections and pairing them
//! - The per-connection relay loop
//! - A headless client for bots and tests

mod server;
mod client;
mod connection;
mod relay;

pub use server::*;
pub use client::*;
pub use connection::*;
pub use relay::*;

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::{DEFAULT_HEIGHT, DEFAULT_PORT, DEFAULT_WIDTH};

/// Settings for one relay loop
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Board width announced to players
    pub width: u32,
    /// Board height announced to players
    pub height: u32,
    /// Give up on a player nobody pairs with (None = wait forever)
    pub opponent_timeout: Option<Duration>,
    /// Give up on a player that stops sending (None = wait forever)
    pub idle_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            opponent_timeout: None,
            idle_timeout: None,
        }
    }
}

/// Configuration for the server
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Interface to bind to
    pub host: String,
    /// Port to listen on (0 picks a free one)
    pub port: u16,
    pub relay: RelaySettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            relay: RelaySettings::default(),
        }
    }
}

impl ServerSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_relay(mut self, relay: RelaySettings) -> Self {
        self.relay = relay;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
