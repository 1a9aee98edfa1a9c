//! Server metrics collection.
//!
//! Process-wide aggregates only; nothing here identifies a client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::Error;
use crate::proxy::RelayStats;

/// Server metrics collector.
pub struct ServerMetrics {
    /// Server start time
    start_time: Instant,
    /// Total sessions accepted
    total_sessions: AtomicU64,
    /// Sessions currently open
    active_sessions: AtomicU64,
    /// Sessions that reached the relay phase
    relayed_sessions: AtomicU64,
    /// Bytes copied client → upstream
    bytes_upstream: AtomicU64,
    /// Bytes copied upstream → client
    bytes_downstream: AtomicU64,
    /// Transport failures on the client stream
    io_errors: AtomicU64,
    /// Failed dials
    dial_errors: AtomicU64,
    /// Requests with a command other than CONNECT
    unsupported_commands: AtomicU64,
    /// Failed name lookups
    resolution_errors: AtomicU64,
    /// Messages that did not match their own lengths
    malformed_messages: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_sessions: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            relayed_sessions: AtomicU64::new(0),
            bytes_upstream: AtomicU64::new(0),
            bytes_downstream: AtomicU64::new(0),
            io_errors: AtomicU64::new(0),
            dial_errors: AtomicU64::new(0),
            unsupported_commands: AtomicU64::new(0),
            resolution_errors: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
        }
    }

    /// Increment total and active sessions.
    pub fn session_opened(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active sessions.
    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Count a finished relay and its traffic.
    pub fn record_relay(&self, stats: &RelayStats) {
        self.relayed_sessions.fetch_add(1, Ordering::Relaxed);
        self.bytes_upstream
            .fetch_add(stats.client_to_upstream, Ordering::Relaxed);
        self.bytes_downstream
            .fetch_add(stats.upstream_to_client, Ordering::Relaxed);
    }

    /// Count a session failure by kind.
    pub fn record_failure(&self, err: &Error) {
        let counter = match err {
            Error::Io(_) => &self.io_errors,
            Error::Dial { .. } => &self.dial_errors,
            Error::UnsupportedCommand(_) => &self.unsupported_commands,
            Error::Resolution { .. } => &self.resolution_errors,
            Error::MalformedMessage(_) => &self.malformed_messages,
            Error::InvalidTransition(_) | Error::Config(_) => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get total sessions.
    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    /// Get active sessions.
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            total_sessions: self.total_sessions(),
            active_sessions: self.active_sessions(),
            relayed_sessions: self.relayed_sessions.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            dial_errors: self.dial_errors.load(Ordering::Relaxed),
            unsupported_commands: self.unsupported_commands.load(Ordering::Relaxed),
            resolution_errors: self.resolution_errors.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
        }
    }

    /// Format metrics as a simple text report.
    pub fn format_report(&self) -> String {
        let snapshot = self.snapshot();

        format!(
            r#"SOCKS Relay Metrics
===================
Uptime: {} seconds

Sessions:
  Total:   {}
  Active:  {}
  Relayed: {}

Traffic:
  Upstream:   {} bytes
  Downstream: {} bytes

Failures:
  I/O:                 {}
  Dial:                {}
  Unsupported Command: {}
  Resolution:          {}
  Malformed:           {}
"#,
            snapshot.uptime_secs,
            snapshot.total_sessions,
            snapshot.active_sessions,
            snapshot.relayed_sessions,
            snapshot.bytes_upstream,
            snapshot.bytes_downstream,
            snapshot.io_errors,
            snapshot.dial_errors,
            snapshot.unsupported_commands,
            snapshot.resolution_errors,
            snapshot.malformed_messages,
        )
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub relayed_sessions: u64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
    pub io_errors: u64,
    pub dial_errors: u64,
    pub unsupported_commands: u64,
    pub resolution_errors: u64,
    pub malformed_messages: u64,
}

impl MetricsSnapshot {
    /// Sessions that ended in any failure.
    pub fn failures(&self) -> u64 {
        self.io_errors
            + self.dial_errors
            + self.unsupported_commands
            + self.resolution_errors
            + self.malformed_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Direction;

    #[test]
    fn test_session_counting() {
        let metrics = ServerMetrics::new();

        metrics.session_opened();
        metrics.session_opened();
        assert_eq!(metrics.total_sessions(), 2);
        assert_eq!(metrics.active_sessions(), 2);

        metrics.session_closed();
        assert_eq!(metrics.total_sessions(), 2);
        assert_eq!(metrics.active_sessions(), 1);
    }

    #[test]
    fn test_record_relay_and_failures() {
        let metrics = ServerMetrics::new();

        metrics.record_relay(&RelayStats {
            client_to_upstream: 100,
            upstream_to_client: 2000,
            ended_first: Direction::UpstreamToClient,
        });
        metrics.record_failure(&Error::UnsupportedCommand(0x02));
        metrics.record_failure(&Error::malformed("bad atyp"));
        metrics.record_failure(&Error::malformed("short"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.relayed_sessions, 1);
        assert_eq!(snapshot.bytes_upstream, 100);
        assert_eq!(snapshot.bytes_downstream, 2000);
        assert_eq!(snapshot.unsupported_commands, 1);
        assert_eq!(snapshot.malformed_messages, 2);
        assert_eq!(snapshot.failures(), 3);
    }

    #[test]
    fn test_format_report() {
        let metrics = ServerMetrics::new();
        metrics.session_opened();

        let report = metrics.format_report();
        assert!(report.contains("SOCKS Relay Metrics"));
        assert!(report.contains("Total:   1"));
    }
}
