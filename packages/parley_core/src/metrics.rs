//! Chat server metrics
//!
//! Counters are updated with relaxed atomics from connection tasks and read
//! as a consistent-enough snapshot for logging.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::broadcast::BroadcastReport;

#[derive(Debug, Default)]
pub struct ChatMetrics {
    // Connection metrics
    /// Currently open connections (pending or active)
    pub active_connections: AtomicU64,
    /// Total connections accepted since server start
    pub total_connections: AtomicU64,
    /// Connections turned away at capacity
    pub rejected_connections: AtomicU64,

    // Message metrics
    /// Chat lines received and relayed
    pub messages_relayed: AtomicU64,
    /// Lines handed to a peer's writer
    pub deliveries_sent: AtomicU64,
    /// Lines dropped because a peer's queue was full
    pub deliveries_dropped: AtomicU64,
    /// Lines not delivered because the peer was already gone
    pub deliveries_failed: AtomicU64,

    start_time: Option<Instant>,
}

impl ChatMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_relayed(&self) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, report: &BroadcastReport) {
        self.deliveries_sent
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.deliveries_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.deliveries_failed
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                rejected: self.rejected_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                relayed: self.messages_relayed.load(Ordering::Relaxed),
                delivered: self.deliveries_sent.load(Ordering::Relaxed),
                dropped: self.deliveries_dropped.load(Ordering::Relaxed),
                failed: self.deliveries_failed.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMetrics {
    pub relayed: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionId;

    #[test]
    fn test_connection_tracking() {
        let metrics = ChatMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.connection_rejected();

        let snap = metrics.snapshot();
        assert_eq!(snap.connections.active, 1);
        assert_eq!(snap.connections.total, 2);
        assert_eq!(snap.connections.rejected, 1);
    }

    #[test]
    fn test_record_broadcast() {
        let metrics = ChatMetrics::new();
        metrics.message_relayed();
        metrics.record_broadcast(&BroadcastReport {
            delivered: 3,
            dropped: 1,
            failed: vec![ConnectionId(4)],
        });

        let snap = metrics.snapshot().messages;
        assert_eq!(snap.relayed, 1);
        assert_eq!(snap.delivered, 3);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.failed, 1);
    }
}
