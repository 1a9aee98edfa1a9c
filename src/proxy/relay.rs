//! Bidirectional byte relay between a client and its upstream connection.
//!
//! The client → upstream direction runs on the caller's task. The
//! upstream → client direction runs in a spawned task whose handle is kept,
//! so teardown can wait for it to drain or cancel it outright.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default copy buffer per direction.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Relay tuning taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Copy buffer size per direction.
    pub buffer_size: usize,
    /// After the client side ends, how long the upstream → client direction
    /// may keep flushing before it is cancelled. `None` cancels immediately.
    pub drain_timeout: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            drain_timeout: None,
        }
    }
}

/// A copy direction of the relay.
///
/// A direction ends on EOF from its reader or an error on either of its
/// ends, so this says which copy stopped, not which peer hung up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

/// Byte counts for one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    /// The direction whose copy stopped first.
    pub ended_first: Direction,
}

/// Copy bytes both ways until either direction ends.
///
/// Both connections are closed when this returns.
pub async fn relay<C>(client: C, upstream: TcpStream, opts: RelayOptions) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_reader, client_writer) = tokio::io::split(client);
    let (upstream_reader, upstream_writer) = upstream.into_split();

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let buffer_size = opts.buffer_size.max(1);

    // Upstream → client
    let received2 = Arc::clone(&received);
    let mut reverse = tokio::spawn(pump(
        upstream_reader,
        client_writer,
        buffer_size,
        received2,
        "upstream->client",
    ));

    // Client → upstream
    let forward = pump(
        client_reader,
        upstream_writer,
        buffer_size,
        Arc::clone(&sent),
        "client->upstream",
    );

    let ended_first = tokio::select! {
        _ = forward => {
            let drained = match opts.drain_timeout {
                Some(limit) => {
                    let done = tokio::time::timeout(limit, &mut reverse).await.is_ok();
                    if !done {
                        tracing::debug!("Upstream did not drain within {}ms", limit.as_millis());
                    }
                    done
                }
                None => false,
            };
            if !drained {
                reverse.abort();
                // Wait for the cancelled task to drop its halves.
                let _ = (&mut reverse).await;
            }
            Direction::ClientToUpstream
        }
        _ = &mut reverse => Direction::UpstreamToClient,
    };

    RelayStats {
        client_to_upstream: sent.load(Ordering::Relaxed),
        upstream_to_client: received.load(Ordering::Relaxed),
        ended_first,
    }
}

/// Copy from `reader` to `writer` until EOF or an error on either end.
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    counter: Arc<AtomicU64>,
    direction: &'static str,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    tracing::debug!("Relay {} write error: {}", direction, e);
                    break;
                }
                counter.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::debug!("Relay {} read error: {}", direction, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Connected loopback pair: (dialed side, accepted side).
    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (dialed.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (client_app, client_proxy) = tokio::io::duplex(1024);
        let (upstream_proxy, mut upstream_app) = tcp_pair().await;

        let handle = tokio::spawn(relay(client_proxy, upstream_proxy, RelayOptions::default()));

        let (mut client_rd, mut client_wr) = tokio::io::split(client_app);
        client_wr.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        upstream_app.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream_app.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client_rd.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        // Upstream hangs up; relay ends and the client sees EOF.
        drop(upstream_app);
        let stats = handle.await.unwrap();
        assert_eq!(stats.ended_first, Direction::UpstreamToClient);
        assert_eq!(stats.client_to_upstream, 4);
        assert_eq!(stats.upstream_to_client, 5);

        let mut rest = Vec::new();
        client_rd.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_client_close_closes_upstream() {
        let (client_app, client_proxy) = tokio::io::duplex(1024);
        let (upstream_proxy, mut upstream_app) = tcp_pair().await;

        let handle = tokio::spawn(relay(client_proxy, upstream_proxy, RelayOptions::default()));

        drop(client_app);
        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("relay should end once the client is gone")
            .unwrap();
        assert_eq!(stats.ended_first, Direction::ClientToUpstream);

        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), upstream_app.read_to_end(&mut rest))
            .await
            .expect("upstream should be closed")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_drain_after_client_eof() {
        let (client_app, client_proxy) = tokio::io::duplex(1024);
        let (upstream_proxy, mut upstream_app) = tcp_pair().await;

        let opts = RelayOptions {
            buffer_size: 16,
            drain_timeout: Some(Duration::from_secs(5)),
        };
        let handle = tokio::spawn(relay(client_proxy, upstream_proxy, opts));

        let (mut client_rd, mut client_wr) = tokio::io::split(client_app);
        client_wr.write_all(b"request").await.unwrap();
        client_wr.shutdown().await.unwrap();

        // Upstream sees the request then EOF, and answers after that.
        let mut req = Vec::new();
        upstream_app.read_to_end(&mut req).await.unwrap();
        assert_eq!(req, b"request");
        upstream_app.write_all(b"late response").await.unwrap();
        drop(upstream_app);

        let mut resp = Vec::new();
        client_rd.read_to_end(&mut resp).await.unwrap();
        assert_eq!(resp, b"late response");

        let stats = handle.await.unwrap();
        assert_eq!(stats.ended_first, Direction::ClientToUpstream);
        assert_eq!(stats.upstream_to_client, 13);
    }
}
