//! Error taxonomy for the chat service.

use std::io;

use crate::session::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Binding, listening or connecting failed. Fatal at startup.
    #[error("transport setup failed: {context}")]
    TransportSetup {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The registry already holds the configured maximum number of sessions.
    #[error("capacity exceeded: {max} sessions already connected")]
    CapacityExceeded { max: usize },

    /// Delivery to a single broadcast recipient failed.
    #[error("failed to deliver to {conn}: {reason}")]
    PeerSend { conn: ConnectionId, reason: String },

    /// Reading from a connection failed.
    #[error("failed to read from {conn}: {reason}")]
    PeerRead { conn: ConnectionId, reason: String },

    /// The peer closed its side of the connection.
    #[error("{conn} disconnected")]
    PeerDisconnect { conn: ConnectionId },

    /// A configuration value was missing or malformed.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl ChatError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::TransportSetup { .. } => "transport_setup",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::PeerSend { .. } => "peer_send",
            Self::PeerRead { .. } => "peer_read",
            Self::PeerDisconnect { .. } => "peer_disconnect",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Only transport setup failures end the process; everything else is
    /// scoped to one connection or falls back to a default.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportSetup { .. })
    }

    pub fn transport_setup(context: impl Into<String>, source: io::Error) -> Self {
        Self::TransportSetup {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            ChatError::CapacityExceeded { max: 10 }.error_code(),
            "capacity_exceeded"
        );
        assert_eq!(
            ChatError::PeerDisconnect {
                conn: ConnectionId(3)
            }
            .error_code(),
            "peer_disconnect"
        );
        assert_eq!(
            ChatError::Configuration("PORT".into()).error_code(),
            "configuration"
        );
    }

    #[test]
    fn only_transport_setup_is_fatal() {
        let setup = ChatError::transport_setup(
            "bind 0.0.0.0:8080",
            io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(setup.is_fatal());
        assert!(!ChatError::CapacityExceeded { max: 1 }.is_fatal());
        assert!(
            !ChatError::PeerSend {
                conn: ConnectionId(1),
                reason: "closed".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn display_names_the_connection() {
        let err = ChatError::PeerRead {
            conn: ConnectionId(7),
            reason: "reset".into(),
        };
        assert_eq!(err.to_string(), "failed to read from conn-7: reset");
    }
}
