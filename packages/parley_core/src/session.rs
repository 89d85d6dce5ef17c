//! Per-connection session state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Name shown for a connection that has been admitted but has not yet
/// sent its identity line.
pub const PLACEHOLDER_NAME: &str = "Connecting...";

/// Unique identifier for a live connection
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle status of a session
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepted and counted against capacity, not yet named
    Pending,
    /// Registered and participating in broadcasts
    Active,
    /// Removed from the registry, cleanup in progress
    Closing,
}

/// Queue feeding the single writer task of one connection. Each entry is a
/// complete line without its terminator.
pub type Outbox = mpsc::Sender<String>;

/// The server's record of one connection
#[derive(Clone, Debug)]
pub struct Session {
    pub id: ConnectionId,
    pub display_name: String,
    pub status: SessionStatus,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    pub(crate) outbox: Outbox,
}

impl Session {
    pub fn pending(id: ConnectionId, peer: Option<SocketAddr>, outbox: Outbox) -> Self {
        Self {
            id,
            display_name: PLACEHOLDER_NAME.to_string(),
            status: SessionStatus::Pending,
            peer,
            connected_at: Utc::now(),
            outbox,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Whole seconds since the connection was accepted.
    pub fn connected_secs(&self) -> i64 {
        (Utc::now() - self.connected_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId(42).to_string(), "conn-42");
    }

    #[test]
    fn pending_session_uses_placeholder() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::pending(ConnectionId(1), None, tx);
        assert_eq!(session.display_name, PLACEHOLDER_NAME);
        assert_eq!(session.status, SessionStatus::Pending);
        assert!(!session.is_active());
        assert!(session.connected_secs() >= 0);
    }
}
