//! TCP listener and connection supervisor.
//!
//! Each accepted connection is checked against capacity, then served by its
//! own task. All tasks are tracked so shutdown can cancel and await them
//! instead of abandoning them.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parley_core::{
    ChatError, ChatMetrics, ConnectionContext, ConnectionId, MetricsSnapshot, SessionRegistry,
    reject_connection, serve_connection,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;

pub struct ChatServer {
    listener: TcpListener,
    ctx: ConnectionContext,
    outbox_capacity: usize,
    next_id: AtomicU64,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl ChatServer {
    /// Bind the listening socket. Failure here is fatal for the process.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ChatError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| ChatError::transport_setup(format!("bind {}", config.bind_addr), e))?;

        Ok(Self {
            listener,
            ctx: ConnectionContext {
                registry: Arc::new(SessionRegistry::new(config.max_clients)),
                metrics: Arc::new(ChatMetrics::new()),
                max_line_bytes: config.max_line_bytes,
            },
            outbox_capacity: config.outbox_capacity,
            next_id: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        self.listener
            .local_addr()
            .map_err(|e| ChatError::transport_setup("query local address", e))
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.ctx.registry.clone()
    }

    pub fn metrics(&self) -> Arc<ChatMetrics> {
        self.ctx.metrics.clone()
    }

    /// Accept connections until `shutdown` resolves, then force-close every
    /// live connection and clear the registry.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> MetricsSnapshot {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.handle_accept(stream, peer).await,
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        let dropped = self.ctx.registry.clear().await;
        info!("Shutting down, closing {} connections", dropped.len());
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        self.ctx.metrics.snapshot()
    }

    async fn handle_accept(&self, stream: TcpStream, peer: SocketAddr) {
        let conn = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (outbox, outbox_rx) = mpsc::channel(self.outbox_capacity);

        match self.ctx.registry.admit(conn, Some(peer), outbox.clone()).await {
            Ok(()) => {
                debug!(conn = %conn, peer = %peer, "connection admitted");
                let (reader, writer) = stream.into_split();
                self.tracker.spawn(serve_connection(
                    reader,
                    writer,
                    conn,
                    outbox,
                    outbox_rx,
                    self.ctx.clone(),
                    self.cancel.child_token(),
                ));
            }
            Err(e) => {
                self.ctx.metrics.connection_rejected();
                warn!(conn = %conn, peer = %peer, error = %e, "rejecting connection");
                self.tracker.spawn(reject_connection(stream, conn));
            }
        }
    }
}
