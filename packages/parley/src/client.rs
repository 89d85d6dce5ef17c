//! `parley connect`: interactive chat client.
//!
//! Two loops run side by side over one connection. The outbound loop turns
//! local input lines into chat lines; the inbound loop renders whatever the
//! server sends. They share a single shutdown signal, and the outbound loop
//! half-closes the connection on exit so the server sees end-of-stream and
//! closes its side, which in turn ends the inbound loop.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::StreamExt;
use parley_core::protocol::{ChatLineCodec, DEFAULT_MAX_LINE_BYTES, QUIT_COMMAND};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};
use tokio_util::codec::FramedRead;
use tracing::debug;

/// Name sent when the user enters nothing at the username prompt.
pub const DEFAULT_USERNAME: &str = "Guest";

const PROMPT: &str = "Enter message (/quit to exit): ";

/// Shutdown flag shared by the two loops.
///
/// The flag itself is an atomic; the `Notify` lets a loop parked on input
/// notice that the other loop has already given up.
#[derive(Default)]
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns true if it was already set.
    pub fn trigger(&self) -> bool {
        let was_set = self.flag.swap(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        was_set
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Where the client renders chat traffic and status lines.
pub trait ChatView: Send {
    /// Show the input prompt.
    fn prompt(&mut self);
    /// Show a line received from the server.
    fn message(&mut self, line: &str);
    /// Show a local status line.
    fn notice(&mut self, text: &str);
    /// Show a local failure.
    fn error(&mut self, text: &str);
}

/// Renders to the controlling terminal, repainting the prompt after each
/// inbound line.
pub struct TerminalView;

impl TerminalView {
    fn clear_current_line(out: &mut impl Write) {
        let _ = write!(out, "\r{}\r", " ".repeat(80));
    }
}

impl ChatView for TerminalView {
    fn prompt(&mut self) {
        let mut out = io::stdout().lock();
        let _ = write!(out, "{}", PROMPT);
        let _ = out.flush();
    }

    fn message(&mut self, line: &str) {
        let mut out = io::stdout().lock();
        Self::clear_current_line(&mut out);
        let _ = writeln!(out, "{}", line);
        let _ = write!(out, "{}", PROMPT);
        let _ = out.flush();
    }

    fn notice(&mut self, text: &str) {
        let mut out = io::stdout().lock();
        Self::clear_current_line(&mut out);
        let _ = writeln!(out, "{}", text);
    }

    fn error(&mut self, text: &str) {
        let mut out = io::stdout().lock();
        Self::clear_current_line(&mut out);
        let _ = out.flush();
        eprintln!("{}", text);
    }
}

/// Why the outbound loop stopped
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutboundEnd {
    /// The user typed `/quit`
    Quit,
    /// Local input reached end-of-file
    InputClosed,
    /// Reading local input failed
    InputFailed,
    /// Writing to the server failed
    SendFailed,
    /// The inbound loop shut the session down first
    Shutdown,
}

/// Why the inbound loop stopped
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InboundEnd {
    /// The server closed the connection while the session was live
    ServerDisconnected,
    /// End-of-stream after a local quit
    Closed,
    /// Reading from the server failed
    ReceiveFailed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientExit {
    pub outbound: OutboundEnd,
    pub inbound: InboundEnd,
}

impl ClientExit {
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outbound,
            OutboundEnd::InputFailed | OutboundEnd::SendFailed
        ) || self.inbound == InboundEnd::ReceiveFailed
    }
}

pub fn resolve_username(entered: Option<&str>) -> String {
    match entered.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_USERNAME.to_string(),
    }
}

/// Read stdin on a dedicated thread, one line per message. The channel
/// closes at end-of-file; a read error is forwarded and ends the thread.
pub fn spawn_stdin_reader() -> mpsc::Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.blocking_send(Ok(text)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}

/// Run a chat session over `stream` until both loops have finished.
///
/// `username` is sent first as the identity line. The stream is closed once,
/// after both loops are done.
pub async fn run_client<S, V>(
    stream: S,
    username: &str,
    input: mpsc::Receiver<io::Result<String>>,
    view: V,
) -> io::Result<ClientExit>
where
    S: AsyncRead + AsyncWrite + Unpin,
    V: ChatView,
{
    let (reader, mut writer) = tokio::io::split(stream);
    writer.write_all(format!("{}\n", username).as_bytes()).await?;

    let shutdown = Shutdown::new();
    let view = Mutex::new(view);

    let (outbound, inbound) = tokio::join!(
        outbound_loop(&mut writer, input, &shutdown, &view),
        inbound_loop(reader, &shutdown, &view),
    );

    let (reader, inbound) = inbound;
    drop(reader.unsplit(writer));

    Ok(ClientExit { outbound, inbound })
}

fn with_view<V: ChatView>(view: &Mutex<V>, f: impl FnOnce(&mut V)) {
    match view.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

async fn outbound_loop<W, V>(
    writer: &mut W,
    mut input: mpsc::Receiver<io::Result<String>>,
    shutdown: &Shutdown,
    view: &Mutex<V>,
) -> OutboundEnd
where
    W: AsyncWrite + Unpin,
    V: ChatView,
{
    let end = loop {
        if shutdown.is_set() {
            break OutboundEnd::Shutdown;
        }
        with_view(view, |v| v.prompt());

        let next = tokio::select! {
            _ = shutdown.wait() => break OutboundEnd::Shutdown,
            next = input.recv() => next,
        };

        match next {
            None => {
                with_view(view, |v| v.notice("Input stream closed (EOF). Quitting..."));
                shutdown.trigger();
                break OutboundEnd::InputClosed;
            }
            Some(Err(e)) => {
                debug!(error = %e, "stdin read failed");
                with_view(view, |v| v.error("Input error. Quitting..."));
                shutdown.trigger();
                break OutboundEnd::InputFailed;
            }
            Some(Ok(line)) => {
                if shutdown.is_set() {
                    break OutboundEnd::Shutdown;
                }
                if line == QUIT_COMMAND {
                    shutdown.trigger();
                    break OutboundEnd::Quit;
                }
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = writer.write_all(format!("{}\n", line).as_bytes()).await {
                    if shutdown.is_set() {
                        break OutboundEnd::Shutdown;
                    }
                    debug!(error = %e, "send failed");
                    with_view(view, |v| v.error("Send failed."));
                    shutdown.trigger();
                    break OutboundEnd::SendFailed;
                }
            }
        }
    };

    // Half-close so the server's read sees end-of-stream.
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "half-close failed");
    }
    end
}

async fn inbound_loop<R, V>(reader: R, shutdown: &Shutdown, view: &Mutex<V>) -> (R, InboundEnd)
where
    R: AsyncRead + Unpin,
    V: ChatView,
{
    let codec = ChatLineCodec::with_max_length(DEFAULT_MAX_LINE_BYTES);
    let mut lines = FramedRead::new(reader, codec);

    let end = loop {
        match lines.next().await {
            Some(Ok(line)) => with_view(view, |v| v.message(&line)),
            None => {
                if shutdown.trigger() {
                    break InboundEnd::Closed;
                }
                with_view(view, |v| v.notice("Server disconnected."));
                break InboundEnd::ServerDisconnected;
            }
            Some(Err(e)) => {
                if shutdown.trigger() {
                    debug!(error = %e, "read ended after shutdown");
                    break InboundEnd::Closed;
                }
                with_view(view, |v| v.error("Receive failed."));
                break InboundEnd::ReceiveFailed;
            }
        }
    };

    (lines.into_inner(), end)
}
