//! Parley core - session registry and broadcast engine for a line-based chat
//! server.
//!
//! This crate owns everything between an accepted byte stream and the other
//! participants: onboarding (identity negotiation and name collision
//! resolution), the shared session registry, fan-out of chat lines, and the
//! cleanup that keeps the registry consistent as connections come and go.
//! It does not bind sockets itself.
//!
//! # Example
//!
//! ```no_run
//! use parley_core::{ChatMetrics, ConnectionContext, ConnectionId, SessionRegistry, serve_connection};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let ctx = ConnectionContext {
//!         registry: Arc::new(SessionRegistry::new(10)),
//!         metrics: Arc::new(ChatMetrics::new()),
//!         max_line_bytes: parley_core::protocol::DEFAULT_MAX_LINE_BYTES,
//!     };
//!     let listener = TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     let mut next_id = 0;
//!     loop {
//!         let (stream, peer) = listener.accept().await.unwrap();
//!         next_id += 1;
//!         let conn = ConnectionId(next_id);
//!         let (outbox, outbox_rx) = mpsc::channel(256);
//!         if ctx.registry.admit(conn, Some(peer), outbox.clone()).await.is_err() {
//!             continue;
//!         }
//!         let (reader, writer) = stream.into_split();
//!         let ctx = ctx.clone();
//!         tokio::spawn(serve_connection(
//!             reader,
//!             writer,
//!             conn,
//!             outbox,
//!             outbox_rx,
//!             ctx,
//!             CancellationToken::new(),
//!         ));
//!     }
//! }
//! ```

pub mod broadcast;
pub mod connection;
mod error;
pub mod metrics;
pub mod onboarding;
pub mod protocol;
mod registry;
mod session;

pub use broadcast::{BroadcastReport, broadcast};
pub use connection::{ConnectionContext, ConnectionEnd, reject_connection, serve_connection};
pub use error::ChatError;
pub use metrics::{ChatMetrics, MetricsSnapshot};
pub use onboarding::{Onboarded, OnboardingState, onboard};
pub use registry::{Recipient, SessionRegistry};
pub use session::{ConnectionId, Outbox, PLACEHOLDER_NAME, Session, SessionStatus};
