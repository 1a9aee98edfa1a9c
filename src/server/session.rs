//! Per-connection SOCKS5 session.
//!
//! A session walks `AwaitingHandshake → AwaitingRequest → Connecting →
//! Relaying → Closed` and never goes back. Any failure jumps straight to
//! `Closed`; the client gets no SOCKS error reply, only the closed stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::proxy::{
    connect, encode_success_reply, relay, resolve, Command, Connected, HandshakeRequest,
    ProxyRequest, RelayStats, HANDSHAKE_RESPONSE,
};
use crate::server::config::ServerConfig;

/// Unique session identifier.
pub type SessionId = u64;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Waiting for the method selection message
    AwaitingHandshake,
    /// Waiting for the proxy request
    AwaitingRequest,
    /// Resolving and dialing the destination
    Connecting,
    /// Copying bytes between client and destination
    Relaying,
    /// Session is closed
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (AwaitingHandshake, AwaitingRequest)
                | (AwaitingRequest, Connecting)
                | (Connecting, Relaying)
                | (AwaitingHandshake | AwaitingRequest | Connecting | Relaying, Closed)
        )
    }
}

/// Session statistics.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub state: SessionState,
    pub age: Duration,
}

/// One accepted client connection.
///
/// Owns the client stream; dropping the session closes it.
pub struct ClientSession<S> {
    id: SessionId,
    peer_addr: SocketAddr,
    stream: S,
    state: SessionState,
    created_at: Instant,
    buf: Vec<u8>,
    config: Arc<ServerConfig>,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a new session.
    pub fn new(id: SessionId, peer_addr: SocketAddr, stream: S, config: Arc<ServerConfig>) -> Self {
        Self {
            id,
            peer_addr,
            stream,
            state: SessionState::AwaitingHandshake,
            created_at: Instant::now(),
            buf: vec![0u8; config.read_buffer_size],
            config,
        }
    }

    /// Get session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get session statistics.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            id: self.id,
            peer_addr: self.peer_addr,
            state: self.state,
            age: self.created_at.elapsed(),
        }
    }

    /// Run the session to completion.
    ///
    /// Returns once the relay ends or any stage fails. The client stream and,
    /// if it was opened, the upstream connection are closed on return.
    pub async fn run(mut self) -> Result<RelayStats> {
        self.negotiate().await?;
        let request = self.read_request().await?;
        let upstream = self.connect_upstream(&request).await?;

        let id = self.id;
        let opts = self.config.relay_options();
        tracing::debug!(
            "Session {} relaying {} <-> {}",
            id,
            self.peer_addr,
            upstream.peer_addr
        );

        let stats = relay(self.stream, upstream.stream, opts).await;
        tracing::debug!(
            "Session {} ended {:?} first: {} bytes up, {} bytes down",
            id,
            stats.ended_first,
            stats.client_to_upstream,
            stats.upstream_to_client
        );
        Ok(stats)
    }

    /// Read the method selection message and answer "no authentication".
    pub async fn negotiate(&mut self) -> Result<HandshakeRequest> {
        self.begin(SessionState::AwaitingHandshake)?;
        let result = self.negotiate_inner().await;
        self.settle(result, SessionState::AwaitingRequest)
    }

    async fn negotiate_inner(&mut self) -> Result<HandshakeRequest> {
        let n = self.read_once().await?;
        let handshake = HandshakeRequest::parse(&self.buf[..n])?;
        tracing::debug!(
            "Session {} handshake: version {}, methods {:?}",
            self.id,
            handshake.version,
            handshake.methods
        );

        self.stream.write_all(&HANDSHAKE_RESPONSE).await?;
        Ok(handshake)
    }

    /// Read the proxy request. Only CONNECT gets past this point.
    pub async fn read_request(&mut self) -> Result<ProxyRequest> {
        self.begin(SessionState::AwaitingRequest)?;
        let result = self.read_request_inner().await;
        self.settle(result, SessionState::Connecting)
    }

    async fn read_request_inner(&mut self) -> Result<ProxyRequest> {
        let n = self.read_once().await?;
        let request = ProxyRequest::parse(&self.buf[..n])?;

        if let Command::Other(cmd) = request.command {
            return Err(Error::UnsupportedCommand(cmd));
        }

        tracing::debug!(
            "Session {} requested CONNECT {}:{}",
            self.id,
            request.address,
            request.port
        );
        Ok(request)
    }

    /// Resolve and dial the destination, then send the success reply.
    pub async fn connect_upstream(&mut self, request: &ProxyRequest) -> Result<Connected> {
        self.begin(SessionState::Connecting)?;
        let result = self.connect_upstream_inner(request).await;
        self.settle(result, SessionState::Relaying)
    }

    async fn connect_upstream_inner(&mut self, request: &ProxyRequest) -> Result<Connected> {
        let dest = resolve(&request.address, request.port).await?;
        let upstream = connect(dest, self.config.connect_options()).await?;

        let reply = encode_success_reply(upstream.local_addr);
        self.stream.write_all(&reply).await?;

        tracing::debug!(
            "Session {} connected to {} from {}",
            self.id,
            upstream.peer_addr,
            upstream.local_addr
        );
        Ok(upstream)
    }

    /// One read into the session buffer. Messages split across reads are
    /// not reassembled.
    async fn read_once(&mut self) -> Result<usize> {
        let n = self.stream.read(&mut self.buf).await?;
        if n == 0 {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(n)
    }

    /// A step may only start from the state it expects. Anything else
    /// closes the session.
    fn begin(&mut self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        let from = self.state;
        self.state = SessionState::Closed;
        Err(Error::InvalidTransition(format!(
            "{:?} step started in {:?}",
            expected, from
        )))
    }

    fn settle<T>(&mut self, result: Result<T>, next: SessionState) -> Result<T> {
        let next = if result.is_ok() {
            next
        } else {
            SessionState::Closed
        };
        if !self.state.can_advance_to(next) {
            let from = self.state;
            self.state = SessionState::Closed;
            return Err(Error::InvalidTransition(format!("{:?} -> {:?}", from, next)));
        }
        self.state = next;
        result
    }
}
