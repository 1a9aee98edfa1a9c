//! SOCKS5 wire format for the CONNECT subset.
//!
//! ```text
//! handshake:  VER(1) NMETHODS(1) METHODS(1..255)
//! response:   VER(1)=0x05 METHOD(1)=0x00
//! request:    VER(1) CMD(1) RSV(1) ATYP(1) DST.ADDR(var) DST.PORT(2)
//! reply:      VER(1)=0x05 REP(1)=0x00 RSV(1)=0x00 ATYP(1) BND.ADDR(var) BND.PORT(2)
//! ```
//!
//! Parsing works on the bytes of a single read. Every peer-supplied length
//! is checked against what was actually received.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{Error, Result};

/// Protocol version byte.
pub const SOCKS_VERSION: u8 = 0x05;

/// METHOD: no authentication required.
pub const METHOD_NO_AUTH: u8 = 0x00;

/// CMD: CONNECT.
pub const CMD_CONNECT: u8 = 0x01;

/// ATYP: IPv4 address.
pub const ATYP_IPV4: u8 = 0x01;
/// ATYP: length-prefixed domain name.
pub const ATYP_DOMAIN: u8 = 0x03;
/// ATYP: IPv6 address.
pub const ATYP_IPV6: u8 = 0x04;

/// REP: succeeded.
pub const REP_SUCCEEDED: u8 = 0x00;

/// The only handshake response this server sends.
pub const HANDSHAKE_RESPONSE: [u8; 2] = [SOCKS_VERSION, METHOD_NO_AUTH];

/// Request header size: VER + CMD + RSV + ATYP.
const REQUEST_HEADER_SIZE: usize = 4;

/// Version identifier / method selection message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version: u8,
    pub methods: Vec<u8>,
}

impl HandshakeRequest {
    /// Parse a method selection message.
    ///
    /// Neither the version nor the offered methods are validated; the reply
    /// is always "no authentication".
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::malformed(format!(
                "handshake too short: {} bytes",
                data.len()
            )));
        }

        let method_count = data[1] as usize;
        let methods = data.get(2..2 + method_count).ok_or_else(|| {
            Error::malformed(format!(
                "handshake truncated: NMETHODS is {}, got {} method bytes",
                method_count,
                data.len() - 2
            ))
        })?;

        Ok(Self {
            version: data[0],
            methods: methods.to_vec(),
        })
    }

    /// Number of methods offered by the client.
    pub fn method_count(&self) -> u8 {
        self.methods.len() as u8
    }
}

/// Request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Establish a TCP relay to the destination.
    Connect,
    /// Anything else (BIND, UDP ASSOCIATE, garbage); carries the raw byte.
    Other(u8),
}

impl From<u8> for Command {
    fn from(v: u8) -> Self {
        match v {
            CMD_CONNECT => Command::Connect,
            other => Command::Other(other),
        }
    }
}

impl Command {
    /// Wire value of this command.
    pub fn as_u8(self) -> u8 {
        match self {
            Command::Connect => CMD_CONNECT,
            Command::Other(v) => v,
        }
    }
}

/// Which encoding DST.ADDR used.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4 = ATYP_IPV4,
    DomainName = ATYP_DOMAIN,
    Ipv6 = ATYP_IPV6,
}

/// Destination address as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl TargetAddr {
    /// Encoding this address arrived in.
    pub fn address_type(&self) -> AddressType {
        match self {
            TargetAddr::Ipv4(_) => AddressType::Ipv4,
            TargetAddr::Domain(_) => AddressType::DomainName,
            TargetAddr::Ipv6(_) => AddressType::Ipv6,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(name) => f.write_str(name),
            TargetAddr::Ipv6(ip) => write!(f, "[{}]", ip),
        }
    }
}

/// A parsed proxy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub version: u8,
    pub command: Command,
    pub address: TargetAddr,
    pub port: u16,
}

impl ProxyRequest {
    /// Parse a proxy request.
    ///
    /// The reserved byte is ignored. Bytes past DST.PORT are ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < REQUEST_HEADER_SIZE {
            return Err(Error::malformed(format!(
                "request too short: {} bytes",
                data.len()
            )));
        }

        let version = data[0];
        let command = Command::from(data[1]);
        let atyp = data[3];
        let body = &data[REQUEST_HEADER_SIZE..];

        let (address, port_at) = match atyp {
            ATYP_IPV4 => {
                let octets: [u8; 4] = take(body, 0, "IPv4 address")?;
                (TargetAddr::Ipv4(Ipv4Addr::from(octets)), 4)
            }
            ATYP_DOMAIN => {
                let [len]: [u8; 1] = take(body, 0, "domain length")?;
                let len = len as usize;
                let name = body.get(1..1 + len).ok_or_else(|| {
                    Error::malformed(format!(
                        "domain truncated: length is {}, got {} bytes",
                        len,
                        body.len() - 1
                    ))
                })?;
                if name.is_empty() {
                    return Err(Error::malformed("empty domain name"));
                }
                if !name.is_ascii() {
                    return Err(Error::malformed("domain name is not ASCII"));
                }
                let name = std::str::from_utf8(name)
                    .map_err(|e| Error::malformed(format!("domain name: {}", e)))?;
                (TargetAddr::Domain(name.to_owned()), 1 + len)
            }
            ATYP_IPV6 => {
                let octets: [u8; 16] = take(body, 0, "IPv6 address")?;
                (TargetAddr::Ipv6(Ipv6Addr::from(octets)), 16)
            }
            _ => {
                return Err(Error::malformed(format!(
                    "unknown address type: 0x{:02x}",
                    atyp
                )))
            }
        };

        let port: [u8; 2] = take(body, port_at, "port")?;

        Ok(Self {
            version,
            command,
            address,
            port: u16::from_be_bytes(port),
        })
    }

    /// Encode the request as a client would send it.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REQUEST_HEADER_SIZE + 18);
        buf.push(self.version);
        buf.push(self.command.as_u8());
        buf.push(0x00);
        buf.push(self.address.address_type() as u8);
        match &self.address {
            TargetAddr::Ipv4(ip) => buf.extend_from_slice(&ip.octets()),
            TargetAddr::Domain(name) => {
                buf.push(name.len() as u8);
                buf.extend_from_slice(name.as_bytes());
            }
            TargetAddr::Ipv6(ip) => buf.extend_from_slice(&ip.octets()),
        }
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf
    }
}

/// Copy `N` bytes starting at `at`, or fail naming the missing field.
fn take<const N: usize>(data: &[u8], at: usize, what: &str) -> Result<[u8; N]> {
    data.get(at..at + N)
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or_else(|| Error::malformed(format!("request truncated before end of {}", what)))
}

/// Build the success reply carrying the locally bound address.
///
/// IPv4 and IPv4-mapped IPv6 addresses go out as ATYP 0x01, anything else
/// as ATYP 0x04.
pub fn encode_success_reply(bound: SocketAddr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(22);
    buf.extend_from_slice(&[SOCKS_VERSION, REP_SUCCEEDED, 0x00]);

    let ip = match bound.ip() {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    };
    match ip {
        IpAddr::V4(v4) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&v6.octets());
        }
    }

    buf.extend_from_slice(&bound.port().to_be_bytes());
    buf
}
