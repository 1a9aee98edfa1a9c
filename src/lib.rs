//! # socks-relay
//!
//! A minimal SOCKS5 server: no-auth handshake, CONNECT only, then a plain
//! TCP relay to the requested destination.
//!
//! ## Session flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Listener: one task per accepted connection             │
//! ├─────────────────────────────────────────────────────────┤
//! │  Handshake: VER NMETHODS METHODS  →  05 00              │
//! ├─────────────────────────────────────────────────────────┤
//! │  Request: CONNECT to IPv4 / domain / IPv6               │
//! ├─────────────────────────────────────────────────────────┤
//! │  Connector: resolve, dial, reply with BND.ADDR/PORT     │
//! ├─────────────────────────────────────────────────────────┤
//! │  Relay: client ⇄ upstream until either side ends        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures never produce a SOCKS error reply; the client just sees the
//! connection close.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod proxy;

#[cfg(feature = "server")]
pub mod server;

pub use error::{Error, Result};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 1080;
