//! Identity handshake turning an accepted connection into a named session.
//!
//! ```text
//! Accepted -> AwaitingIdentity -> Registered -> Active
//!     \______________\________________________________-> Closed
//! ```

use futures::{Stream, StreamExt};
use tokio_util::codec::LinesCodecError;
use tracing::{debug, info};

use crate::broadcast::{BroadcastReport, broadcast};
use crate::error::ChatError;
use crate::protocol;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionId, Outbox};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OnboardingState {
    Accepted,
    AwaitingIdentity,
    Registered,
    Active,
    Closed,
}

impl std::fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::AwaitingIdentity => "awaiting_identity",
            Self::Registered => "registered",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Result of a completed handshake
#[derive(Debug)]
pub struct Onboarded {
    pub display_name: String,
    pub state: OnboardingState,
    /// Delivery outcome of the join announcement
    pub announcement: BroadcastReport,
}

struct Handshake {
    conn: ConnectionId,
    state: OnboardingState,
}

impl Handshake {
    fn advance(&mut self, next: OnboardingState) {
        debug!(conn = %self.conn, from = %self.state, to = %next, "onboarding transition");
        self.state = next;
    }
}

/// Run the handshake for `conn`.
///
/// Reads the identity line, registers the session under a unique name,
/// queues the private welcome on `outbox` and announces the arrival to every
/// other active session. If the stream ends or fails before an identity line
/// arrives, nothing is registered and the error is returned.
pub async fn onboard<S>(
    lines: &mut S,
    conn: ConnectionId,
    registry: &SessionRegistry,
    outbox: &Outbox,
) -> Result<Onboarded, ChatError>
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    let mut handshake = Handshake {
        conn,
        state: OnboardingState::Accepted,
    };
    handshake.advance(OnboardingState::AwaitingIdentity);

    let line = match lines.next().await {
        Some(Ok(line)) => line,
        Some(Err(e)) => {
            handshake.advance(OnboardingState::Closed);
            return Err(ChatError::PeerRead {
                conn,
                reason: e.to_string(),
            });
        }
        None => {
            handshake.advance(OnboardingState::Closed);
            return Err(ChatError::PeerDisconnect { conn });
        }
    };

    let display_name = registry
        .register(conn, protocol::proposed_name(&line), outbox.clone())
        .await
        .inspect_err(|_| handshake.advance(OnboardingState::Closed))?;
    handshake.advance(OnboardingState::Registered);

    info!(conn = %conn, name = %display_name, "User connected: {}", display_name);

    if outbox.send(protocol::welcome(&display_name)).await.is_err() {
        debug!(conn = %conn, "writer gone before welcome could be queued");
    }
    let announcement = broadcast(registry, &protocol::joined(&display_name), Some(conn)).await;
    handshake.advance(OnboardingState::Active);

    Ok(Onboarded {
        display_name,
        state: handshake.state,
        announcement,
    })
}
