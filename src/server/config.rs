//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::proxy::relay::DEFAULT_BUFFER_SIZE;
use crate::proxy::{ConnectOptions, RelayOptions};

/// Buffer for the single handshake/request read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Smallest read buffer that still fits a maximal request
/// (4 header + 1 length + 255 domain + 2 port).
pub const MIN_READ_BUFFER_SIZE: usize = 262;

/// Server configuration.
///
/// Built once at startup and shared read-only with every session.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub listen_port: u16,
    /// Buffer for reading the handshake and the request
    pub read_buffer_size: usize,
    /// Copy buffer per relay direction
    pub relay_buffer_size: usize,
    /// How long to let upstream → client drain after the client side ends
    pub drain_timeout: Option<Duration>,
    /// Upper bound on dialing the destination
    pub connect_timeout: Option<Duration>,
    /// Set TCP_NODELAY on both sockets
    pub nodelay: bool,
}

impl ServerConfig {
    /// Create a configuration with defaults for everything but the listen address.
    pub fn new(listen_addr: impl Into<String>, listen_port: u16) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            listen_port,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            relay_buffer_size: DEFAULT_BUFFER_SIZE,
            drain_timeout: None,
            connect_timeout: None,
            nodelay: true,
        }
    }

    /// Build from a `host:port` bind string such as `0.0.0.0:1080`.
    pub fn from_bind(bind: &str) -> Result<Self> {
        let (host, port) = split_bind(bind)?;
        Ok(Self::new(host, port))
    }

    /// Override the listen address from a `host:port` bind string.
    pub fn set_bind(&mut self, bind: &str) -> Result<()> {
        let (host, port) = split_bind(bind)?;
        self.listen_addr = host;
        self.listen_port = port;
        Ok(())
    }

    /// `host:port` string to bind the listener on.
    pub fn bind_addr(&self) -> String {
        if self.listen_addr.contains(':') && !self.listen_addr.starts_with('[') {
            format!("[{}]:{}", self.listen_addr, self.listen_port)
        } else {
            format!("{}:{}", self.listen_addr, self.listen_port)
        }
    }

    /// Dial options for the connector.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: self.connect_timeout,
            nodelay: self.nodelay,
        }
    }

    /// Relay options for the relay.
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            buffer_size: self.relay_buffer_size,
            drain_timeout: self.drain_timeout,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(Error::config("listen_addr cannot be empty"));
        }
        if self.read_buffer_size < MIN_READ_BUFFER_SIZE {
            return Err(Error::config(format!(
                "read_buffer_size must be at least {} bytes",
                MIN_READ_BUFFER_SIZE
            )));
        }
        if self.relay_buffer_size == 0 {
            return Err(Error::config("relay_buffer_size cannot be zero"));
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(Error::config("connect_timeout cannot be zero"));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", crate::DEFAULT_PORT)
    }
}

/// Split `host:port`; an empty host (`:1080`) means all interfaces.
fn split_bind(bind: &str) -> Result<(String, u16)> {
    if let Ok(addr) = bind.parse::<SocketAddr>() {
        return Ok((addr.ip().to_string(), addr.port()));
    }

    let (host, port) = bind
        .rsplit_once(':')
        .ok_or_else(|| Error::config(format!("bind address {:?} is missing a port", bind)))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| Error::config(format!("invalid port in {:?}: {}", bind, e)))?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };

    Ok((host.to_string(), port))
}

/// Configuration file format for serialization.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfigFile {
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub listen_port: u16,
    /// Handshake/request read buffer (bytes)
    pub read_buffer_size: usize,
    /// Relay copy buffer (bytes)
    pub relay_buffer_size: usize,
    /// Drain timeout (milliseconds, 0 = cancel immediately)
    pub drain_timeout_ms: u64,
    /// Connect timeout (milliseconds, 0 = no limit)
    pub connect_timeout_ms: u64,
    /// TCP_NODELAY on both sockets
    pub nodelay: bool,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl ServerConfigFile {
    /// Convert to runtime configuration.
    pub fn to_config(&self) -> Result<ServerConfig> {
        let config = ServerConfig {
            listen_addr: self.listen_addr.clone(),
            listen_port: self.listen_port,
            read_buffer_size: self.read_buffer_size,
            relay_buffer_size: self.relay_buffer_size,
            drain_timeout: millis(self.drain_timeout_ms),
            connect_timeout: millis(self.connect_timeout_ms),
            nodelay: self.nodelay,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            listen_port: config.listen_port,
            read_buffer_size: config.read_buffer_size,
            relay_buffer_size: config.relay_buffer_size,
            drain_timeout_ms: config.drain_timeout.map_or(0, |d| d.as_millis() as u64),
            connect_timeout_ms: config.connect_timeout.map_or(0, |d| d.as_millis() as u64),
            nodelay: config.nodelay,
        }
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Render as a TOML document.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
