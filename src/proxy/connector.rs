//! Destination resolution and outbound dialing.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::proxy::socks5::TargetAddr;

/// Dial options taken from the server configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Upper bound on the TCP connect; `None` waits for the OS.
    pub timeout: Option<Duration>,
    /// Set TCP_NODELAY on the upstream socket.
    pub nodelay: bool,
}

/// An established upstream connection.
#[derive(Debug)]
pub struct Connected {
    pub stream: TcpStream,
    /// Address the kernel bound locally; reported as BND.ADDR/BND.PORT.
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
}

/// Turn a request target into a concrete socket address.
///
/// IP literals pass through. Domain names go through the system resolver;
/// see [`pick_address`] for which result is used.
pub async fn resolve(target: &TargetAddr, port: u16) -> Result<SocketAddr> {
    let host = match target {
        TargetAddr::Domain(host) => host,
        TargetAddr::Ipv4(ip) => return Ok(SocketAddr::new(IpAddr::V4(*ip), port)),
        TargetAddr::Ipv6(ip) => return Ok(SocketAddr::new(IpAddr::V6(*ip), port)),
    };

    let addrs = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| Error::Resolution {
            host: host.clone(),
            source: Some(e),
        })?;

    let addr = pick_address(addrs).ok_or_else(|| Error::Resolution {
        host: host.clone(),
        source: None,
    })?;

    tracing::debug!("Resolved {} to {}", host, addr.ip());
    Ok(addr)
}

/// First IPv4 result if there is one, otherwise the first result.
pub fn pick_address(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<SocketAddr> {
    let mut first = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        first.get_or_insert(addr);
    }
    first
}

/// Open a TCP connection to `dest`.
pub async fn connect(dest: SocketAddr, opts: ConnectOptions) -> Result<Connected> {
    let dial = TcpStream::connect(dest);
    let result = match opts.timeout {
        Some(limit) => match tokio::time::timeout(limit, dial).await {
            Ok(r) => r,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect timed out after {}ms", limit.as_millis()),
            )),
        },
        None => dial.await,
    };

    let stream = result.map_err(|source| Error::Dial { addr: dest, source })?;
    if opts.nodelay {
        stream.set_nodelay(true)?;
    }

    let local_addr = stream.local_addr()?;
    let peer_addr = stream.peer_addr()?;

    Ok(Connected {
        stream,
        local_addr,
        peer_addr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_resolve_literal() {
        let addr = resolve(&TargetAddr::Ipv4(Ipv4Addr::LOCALHOST), 8080)
            .await
            .unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());

        let addr = resolve(&TargetAddr::Ipv6(Ipv6Addr::LOCALHOST), 80)
            .await
            .unwrap();
        assert_eq!(addr, "[::1]:80".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve(&TargetAddr::Domain("localhost".into()), 1080)
            .await
            .unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 1080);
    }

    #[test]
    fn test_pick_address_prefers_ipv4() {
        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let other_v4: SocketAddr = "10.0.0.1:8080".parse().unwrap();

        // ::1 listed first, as many /etc/hosts files do for localhost
        assert_eq!(pick_address(vec![v6, v4, other_v4]), Some(v4));
        assert_eq!(pick_address(vec![v4, v6]), Some(v4));
        assert_eq!(pick_address(vec![v6]), Some(v6));
        assert_eq!(pick_address(Vec::new()), None);
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let err = resolve(&TargetAddr::Domain("no-such-host.invalid".into()), 80)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_connect_reports_local_addr() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest = listener.local_addr().unwrap();

        let connected = connect(
            dest,
            ConnectOptions {
                timeout: Some(Duration::from_secs(5)),
                nodelay: true,
            },
        )
        .await
        .unwrap();

        assert_eq!(connected.peer_addr, dest);
        assert_eq!(connected.local_addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(connected.local_addr.port(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(dest, ConnectOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Dial { addr, .. } if addr == dest));
    }
}
