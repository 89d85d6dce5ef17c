//! Line-oriented wire protocol.
//!
//! Every frame is one line terminated by `\n` (a trailing `\r` is
//! tolerated on input). The first client line is the proposed display name;
//! every later line is chat text. Inbound bytes that are not valid UTF-8 are
//! decoded lossily rather than treated as a read failure.

use bytes::{BufMut, Bytes, BytesMut};
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder, FramedRead, FramedWrite,
    LinesCodecError,
};
use tracing::debug;

use crate::session::ConnectionId;

/// Default upper bound on a single inbound line, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4096;

/// Name assigned when the identity line is blank.
pub const DEFAULT_NAME: &str = "Anonymous";

/// Client-side sentinel that ends a session. Never transmitted.
pub const QUIT_COMMAND: &str = "/quit";

/// Sent right before closing a connection that arrived at full capacity.
pub const SERVER_FULL: &str = "Server full.";

/// Strip trailing spaces, tabs, carriage returns and newlines.
pub fn trim_line(line: &str) -> &str {
    line.trim_end_matches([' ', '\t', '\r', '\n'])
}

/// Resolve the identity line into a proposed display name.
pub fn proposed_name(line: &str) -> &str {
    match trim_line(line) {
        "" => DEFAULT_NAME,
        name => name,
    }
}

pub fn welcome(name: &str) -> String {
    format!("Welcome, {}!", name)
}

pub fn joined(name: &str) -> String {
    format!("{} has joined the chat.", name)
}

pub fn left(name: &str) -> String {
    format!("{} has left the chat.", name)
}

pub fn chat(name: &str, text: &str) -> String {
    format!("[{}]: {}", name, text)
}

/// Newline-delimited text codec.
///
/// Decoding splits on `\n`, drops one trailing `\r` and replaces invalid
/// UTF-8 sequences with U+FFFD. A line longer than the configured maximum is
/// an error. Encoding appends `\n`.
#[derive(Clone, Debug)]
pub struct ChatLineCodec {
    inner: AnyDelimiterCodec,
}

impl ChatLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(usize::MAX)
    }

    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_line_bytes,
            ),
        }
    }
}

impl Default for ChatLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn into_line(chunk: Bytes) -> String {
    let raw = chunk.strip_suffix(&b"\r"[..]).unwrap_or(&chunk[..]);
    String::from_utf8_lossy(raw).into_owned()
}

fn line_error(e: AnyDelimiterCodecError) -> LinesCodecError {
    match e {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => LinesCodecError::MaxLineLengthExceeded,
        AnyDelimiterCodecError::Io(e) => LinesCodecError::Io(e),
    }
}

impl Decoder for ChatLineCodec {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        Ok(self.inner.decode(buf).map_err(line_error)?.map(into_line))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        Ok(self.inner.decode_eof(buf).map_err(line_error)?.map(into_line))
    }
}

impl Encoder<String> for ChatLineCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}

/// Frame reader over the inbound half of a connection.
pub fn line_reader<R: AsyncRead>(reader: R, max_line_bytes: usize) -> FramedRead<R, ChatLineCodec> {
    FramedRead::new(reader, ChatLineCodec::with_max_length(max_line_bytes))
}

/// Drain `rx` into `writer`, one line per frame, until every sender is gone
/// or a write fails. The writer is shut down on exit, which half-closes a
/// socket.
pub async fn run_writer<W>(writer: W, mut rx: mpsc::Receiver<String>, conn: ConnectionId)
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, ChatLineCodec::new());
    while let Some(line) = rx.recv().await {
        if let Err(e) = sink.send(line).await {
            debug!(conn = %conn, error = %e, "write failed, closing writer");
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(conn = %conn, error = %e, "writer shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_trim_line_strips_trailing_whitespace_only() {
        assert_eq!(trim_line("hello \t\r\n"), "hello");
        assert_eq!(trim_line("  indented"), "  indented");
        assert_eq!(trim_line(" \r\n"), "");
    }

    #[test]
    fn test_proposed_name_defaults_when_blank() {
        assert_eq!(proposed_name("\t \r"), DEFAULT_NAME);
        assert_eq!(proposed_name(""), DEFAULT_NAME);
        assert_eq!(proposed_name("Alice\r"), "Alice");
    }

    #[test]
    fn test_message_formats() {
        assert_eq!(welcome("Bob_1"), "Welcome, Bob_1!");
        assert_eq!(joined("Bob"), "Bob has joined the chat.");
        assert_eq!(left("Bob"), "Bob has left the chat.");
        assert_eq!(chat("Bob", "hi"), "[Bob]: hi");
    }

    #[tokio::test]
    async fn test_line_reader_handles_crlf_and_missing_terminator() {
        let input: &[u8] = b"Alice\r\nhello\nlast";
        let mut lines = line_reader(input, DEFAULT_MAX_LINE_BYTES);
        assert_eq!(lines.next().await.unwrap().unwrap(), "Alice");
        assert_eq!(lines.next().await.unwrap().unwrap(), "hello");
        assert_eq!(lines.next().await.unwrap().unwrap(), "last");
        assert!(lines.next().await.is_none());
    }

    #[tokio::test]
    async fn test_line_reader_survives_invalid_utf8() {
        let input: &[u8] = b"caf\xe9\nstill here\n";
        let mut lines = line_reader(input, DEFAULT_MAX_LINE_BYTES);
        assert_eq!(lines.next().await.unwrap().unwrap(), "caf\u{fffd}");
        assert_eq!(lines.next().await.unwrap().unwrap(), "still here");
        assert!(lines.next().await.is_none());
    }

    #[test]
    fn test_codec_encodes_newline_terminated() {
        let mut buf = BytesMut::new();
        ChatLineCodec::new()
            .encode("[Bob]: hi".to_string(), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"[Bob]: hi\n");
    }

    #[tokio::test]
    async fn test_line_reader_rejects_oversized_lines() {
        let input = vec![b'x'; 64];
        let mut lines = line_reader(&input[..], 16);
        assert!(lines.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_writer_terminates_lines_and_shuts_down() {
        let (client, mut server) = tokio::io::duplex(256);
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(run_writer(client, rx, ConnectionId(1)));

        tx.send("one".to_string()).await.unwrap();
        tx.send("two".to_string()).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "one\ntwo\n");
    }
}
