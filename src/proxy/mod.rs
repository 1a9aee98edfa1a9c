//! SOCKS5 CONNECT proxying.
//!
//! Wire format parsing, destination dialing, and the byte relay that runs
//! once the client has been told the connection is up.

pub mod connector;
pub mod relay;
pub mod socks5;

pub use connector::{connect, resolve, ConnectOptions, Connected};
pub use relay::{relay, Direction, RelayOptions, RelayStats};
pub use socks5::{
    encode_success_reply, AddressType, Command, HandshakeRequest, ProxyRequest, TargetAddr,
    HANDSHAKE_RESPONSE,
};
