//! Fan-out of one line to every active session but its author.

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::registry::SessionRegistry;
use crate::session::ConnectionId;

/// Outcome of a single broadcast call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose writer accepted the line
    pub delivered: usize,
    /// Recipients skipped because their queue was full
    pub dropped: usize,
    /// Recipients whose writer had already gone away
    pub failed: Vec<ConnectionId>,
}

/// Deliver `text` to every active session except `exclude`.
///
/// The recipient list is a snapshot taken under the registry lock; the
/// enqueueing itself happens after the lock is released and never waits on
/// a slow peer. A failure for one recipient is logged and skipped. Each
/// recipient gets the line at most once, with no retry.
pub async fn broadcast(
    registry: &SessionRegistry,
    text: &str,
    exclude: Option<ConnectionId>,
) -> BroadcastReport {
    let recipients = registry.snapshot_for_broadcast().await;
    let mut report = BroadcastReport::default();

    for recipient in recipients.iter().filter(|r| Some(r.id) != exclude) {
        match recipient.outbox.try_send(text.to_string()) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!(conn = %recipient.id, name = %recipient.name, "peer queue full, dropping line");
                report.dropped += 1;
            }
            Err(TrySendError::Closed(_)) => {
                let err = ChatError::PeerSend {
                    conn: recipient.id,
                    reason: "writer closed".to_string(),
                };
                debug!(error = %err, "skipping recipient");
                report.failed.push(recipient.id);
            }
        }
    }

    report
}
