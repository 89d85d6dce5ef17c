//! Lifecycle of one accepted connection: onboarding, the relay loop, and
//! cleanup. Generic over the byte stream so it runs the same on TCP halves
//! and in-memory pipes.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::broadcast;
use crate::error::ChatError;
use crate::metrics::ChatMetrics;
use crate::onboarding::onboard;
use crate::protocol;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionId, Outbox};

/// Shared state handed to every connection task
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<ChatMetrics>,
    pub max_line_bytes: usize,
}

/// Why a connection task finished
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionEnd {
    /// Closed or failed before sending an identity line; never registered
    Abandoned,
    /// Peer closed its stream
    Disconnected,
    /// Reading from the peer failed
    ReadFailed,
    /// The server is shutting down
    Shutdown,
}

/// Serve one admitted connection until it closes or `cancel` fires.
///
/// `outbox`/`outbox_rx` are the two ends of the connection's writer queue;
/// the same sender must have been used to admit `conn` into the registry.
/// The writer runs alongside the session and shuts the write half down
/// once every sender is gone.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    conn: ConnectionId,
    outbox: Outbox,
    outbox_rx: mpsc::Receiver<String>,
    ctx: ConnectionContext,
    cancel: CancellationToken,
) -> ConnectionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    ctx.metrics.connection_opened();

    let writer_cancel = cancel.clone();
    let writer_task = async move {
        tokio::select! {
            _ = protocol::run_writer(writer, outbox_rx, conn) => {}
            _ = writer_cancel.cancelled() => {
                debug!(conn = %conn, "writer cancelled");
            }
        }
    };

    let (end, ()) = tokio::join!(run_session(reader, conn, outbox, &ctx, &cancel), writer_task);

    ctx.metrics.connection_closed();
    debug!(conn = %conn, end = ?end, "connection finished");
    end
}

async fn run_session<R>(
    reader: R,
    conn: ConnectionId,
    outbox: Outbox,
    ctx: &ConnectionContext,
    cancel: &CancellationToken,
) -> ConnectionEnd
where
    R: AsyncRead + Unpin,
{
    let mut lines = protocol::line_reader(reader, ctx.max_line_bytes);

    let onboarded = tokio::select! {
        _ = cancel.cancelled() => {
            ctx.registry.unregister(conn).await;
            return ConnectionEnd::Shutdown;
        }
        result = onboard(&mut lines, conn, &ctx.registry, &outbox) => result,
    };
    let name = match onboarded {
        Ok(done) => {
            ctx.metrics.record_broadcast(&done.announcement);
            done.display_name
        }
        Err(e) => {
            // Release the placeholder taken at accept time.
            ctx.registry.unregister(conn).await;
            info!(conn = %conn, error = %e, "connection closed before identifying");
            return ConnectionEnd::Abandoned;
        }
    };

    let end = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break ConnectionEnd::Shutdown,
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) => {
                let text = protocol::trim_line(&line);
                if text.is_empty() {
                    continue;
                }
                info!(conn = %conn, name = %name, "Message from {}: {}", name, text);
                ctx.metrics.message_relayed();
                let report = broadcast(&ctx.registry, &protocol::chat(&name, text), Some(conn)).await;
                ctx.metrics.record_broadcast(&report);
            }
            Some(Err(e)) => {
                let err = ChatError::PeerRead {
                    conn,
                    reason: e.to_string(),
                };
                warn!(name = %name, error = %err, "dropping connection");
                break ConnectionEnd::ReadFailed;
            }
            None => break ConnectionEnd::Disconnected,
        }
    };

    if let Some(session) = ctx.registry.unregister(conn).await {
        debug!(
            conn = %conn,
            peer = ?session.peer,
            connected_secs = session.connected_secs(),
            "session closed"
        );
    }
    if end != ConnectionEnd::Shutdown {
        info!(conn = %conn, name = %name, "User disconnected: {}", name);
        let report = broadcast(&ctx.registry, &protocol::left(&name), Some(conn)).await;
        ctx.metrics.record_broadcast(&report);
    }
    end
}

/// Tell a connection the server is full, then close its write half.
pub async fn reject_connection<W>(writer: W, conn: ConnectionId)
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, protocol::ChatLineCodec::new());
    if let Err(e) = sink.send(protocol::SERVER_FULL.to_string()).await {
        debug!(conn = %conn, error = %e, "failed to send capacity notice");
    }
    if let Err(e) = sink.close().await {
        debug!(conn = %conn, error = %e, "failed to close rejected connection");
    }
}
