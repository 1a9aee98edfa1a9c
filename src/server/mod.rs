//! SOCKS5 relay server.
//!
//! ```text
//! ┌──────────────┐   one task per connection   ┌─────────────────────┐
//! │ TcpListener  │ ──────────────────────────▶ │ ClientSession       │
//! │ (accept loop)│                             │  handshake          │
//! └──────────────┘                             │  request            │
//!                                              │  resolve + connect  │
//!                                              │  relay ◀──▶ upstream│
//!                                              └─────────────────────┘
//! ```
//!
//! Sessions share nothing but the read-only [`ServerConfig`] and the
//! [`ServerMetrics`] counters.

pub mod config;
mod metrics;
mod session;

pub use config::{ServerConfig, ServerConfigFile};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use session::{ClientSession, SessionId, SessionState, SessionStats};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

/// Main server instance.
pub struct Server {
    config: Arc<ServerConfig>,
    metrics: Arc<ServerMetrics>,
    next_session_id: AtomicU64,
}

impl Server {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(ServerMetrics::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Bind the listener without starting to accept.
    pub async fn bind(self) -> Result<BoundServer> {
        self.config.validate()?;

        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!("SOCKS5 relay listening on {}", local_addr);

        Ok(BoundServer {
            server: self,
            listener,
            local_addr,
        })
    }

    /// Bind and serve until the task is dropped.
    pub async fn run(self) -> Result<()> {
        self.bind().await?.run().await
    }

    /// Get server metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    fn spawn_session(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            metrics.session_opened();

            if let Err(e) = Self::handle_connection(id, config, &metrics, stream, peer_addr).await
            {
                metrics.record_failure(&e);
                tracing::warn!(
                    kind = e.kind_label(),
                    "Session {} from {} failed: {}",
                    id,
                    peer_addr,
                    e
                );
            }

            metrics.session_closed();
        });
    }

    async fn handle_connection(
        id: SessionId,
        config: Arc<ServerConfig>,
        metrics: &ServerMetrics,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        if config.nodelay {
            stream.set_nodelay(true)?;
        }
        tracing::debug!("Session {} accepted from {}", id, peer_addr);

        let session = ClientSession::new(id, peer_addr, stream, config);
        let stats = session.run().await?;
        metrics.record_relay(&stats);

        Ok(())
    }
}

/// A server whose listener is bound.
pub struct BoundServer {
    server: Server,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get server metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.server.metrics()
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => self.server.spawn_session(stream, peer_addr),
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                }
            }
        }
    }
}
