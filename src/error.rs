//! Error types for the SOCKS5 relay.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a client session.
///
/// None of these are ever reported to the SOCKS client. The session is
/// closed and the error is logged where the session was spawned.
#[derive(Error, Debug)]
pub enum Error {
    /// Read or write failure on the client stream
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound connection to the destination failed
    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// CMD byte other than CONNECT
    #[error("unsupported command: 0x{0:02x}")]
    UnsupportedCommand(u8),

    /// Domain name could not be resolved to an address
    #[error("failed to resolve {host}")]
    Resolution {
        host: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Message layout does not match the bytes actually received
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Session step called out of order
    #[error("invalid session transition: {0}")]
    InvalidTransition(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new malformed message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedMessage(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error came from the transport rather than the peer's bytes
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Dial { .. })
    }

    /// Short label for logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Dial { .. } => "dial",
            Error::UnsupportedCommand(_) => "unsupported_command",
            Error::Resolution { .. } => "resolution",
            Error::MalformedMessage(_) => "malformed",
            Error::InvalidTransition(_) => "invalid_transition",
            Error::Config(_) => "config",
        }
    }
}
