//! Incremental parser for server → client frames.
//!
//! Socket reads do not respect frame boundaries, so the parser accumulates
//! bytes and yields frames only once they are complete:
//!
//! ```text
//!            ┌──────────────────────┐  MSG line   ┌──────────────────────┐
//!   bytes ──►│ AwaitingControlLine  │────────────►│ AwaitingMsgPayload   │
//!            │  (needs "\r\n")      │◄────────────│  (needs len + 2)     │
//!            └──────────────────────┘  payload    └──────────────────────┘
//! ```
//!
//! Control lines are recognized by their first token in a fixed order:
//! `MSG`, `+OK`, `-ERR`, `PING`, `PONG`, `INFO`, then anything else as an
//! unknown line. Payloads are taken strictly by the declared byte count, so a
//! payload that happens to contain `PING\r\n` is never read as a command.
//! A `MSG` declaring more than [`MAX_MSG_PAYLOAD`] bytes is reported as an
//! unknown line.
//!
//! The parser has no side effects; the client decides what each frame means.

use bytes::{Buf, BytesMut};

use super::Message;
use crate::constants::{CRLF, MAX_MSG_PAYLOAD};

/// A complete frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// A message delivered to a subscription.
    Msg(Message),
    /// Acknowledgement in verbose mode.
    Ok,
    /// Server-reported error text (surrounding quotes removed).
    Err(String),
    /// Keepalive request; the client must answer with `PONG`.
    Ping,
    /// Keepalive response completing a round trip.
    Pong,
    /// Raw JSON from an `INFO` line.
    Info(String),
    /// A complete line that matched no known control line.
    Unknown(String),
}

/// Parser state between calls to [`FrameParser::feed`].
#[derive(Debug, Default)]
enum ParseState {
    #[default]
    AwaitingControlLine,
    AwaitingMsgPayload(PendingMsg),
}

/// Header of a `MSG` whose payload has not fully arrived yet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingMsg {
    subject: String,
    sid: u64,
    reply: Option<String>,
    needed: usize,
}

/// Incremental frame parser.
///
/// Feed bytes via [`FrameParser::feed`]; every frame completed by those bytes
/// is returned in wire order and any trailing partial frame stays buffered.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: BytesMut,
    state: ParseState,
    /// Bytes of `buf` already searched for CRLF without success.
    scanned: usize,
}

impl FrameParser {
    /// Create a parser with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every complete frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ServerFrame> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    #[cfg(test)]
    fn has_partial(&self) -> bool {
        !self.buf.is_empty() || matches!(self.state, ParseState::AwaitingMsgPayload(_))
    }

    fn next_frame(&mut self) -> Option<ServerFrame> {
        loop {
            match std::mem::take(&mut self.state) {
                ParseState::AwaitingControlLine => {
                    let end = self.find_crlf()?;
                    let line = self.buf.split_to(end + 2);
                    self.scanned = 0;
                    match classify(&line[..end]) {
                        Control::Msg(pending) => {
                            self.state = ParseState::AwaitingMsgPayload(pending);
                        }
                        Control::Frame(frame) => return Some(frame),
                    }
                }
                ParseState::AwaitingMsgPayload(pending) => {
                    let Some(frame_len) = pending.needed.checked_add(CRLF.len()) else {
                        return Some(unknown(b"MSG"));
                    };
                    if self.buf.len() < frame_len {
                        self.state = ParseState::AwaitingMsgPayload(pending);
                        return None;
                    }
                    let payload = self.buf.split_to(pending.needed).freeze();
                    self.buf.advance(CRLF.len());
                    return Some(ServerFrame::Msg(Message {
                        subject: pending.subject,
                        sid: pending.sid,
                        reply: pending.reply,
                        payload,
                    }));
                }
            }
        }
    }

    /// Position of the first CRLF in the buffer, resuming where the last
    /// unsuccessful search stopped.
    fn find_crlf(&mut self) -> Option<usize> {
        let start = self.scanned.saturating_sub(1);
        match self.buf[start..].windows(2).position(|w| w == b"\r\n") {
            Some(pos) => Some(start + pos),
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }
}

/// Outcome of classifying one control line.
enum Control {
    Msg(PendingMsg),
    Frame(ServerFrame),
}

/// Recognize a control line (without its CRLF) by its first token.
fn classify(line: &[u8]) -> Control {
    let (op, rest) = split_op(line);

    let frame = match op {
        b"MSG" => match parse_msg_args(rest) {
            Some(pending) => return Control::Msg(pending),
            None => unknown(line),
        },
        b"+OK" if is_blank(rest) => ServerFrame::Ok,
        b"-ERR" => ServerFrame::Err(unquote(&String::from_utf8_lossy(rest))),
        b"PING" if is_blank(rest) => ServerFrame::Ping,
        b"PONG" if is_blank(rest) => ServerFrame::Pong,
        b"INFO" if !is_blank(rest) => {
            ServerFrame::Info(String::from_utf8_lossy(rest).trim().to_string())
        }
        _ => unknown(line),
    };
    Control::Frame(frame)
}

/// Split the first whitespace-delimited token off `line`.
fn split_op(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|b| b.is_ascii_whitespace()) {
        Some(pos) => (&line[..pos], &line[pos..]),
        None => (line, &line[line.len()..]),
    }
}

/// `<subject> <sid> [<reply>] <length>`.
fn parse_msg_args(args: &[u8]) -> Option<PendingMsg> {
    let args = std::str::from_utf8(args).ok()?;
    let tokens: Vec<&str> = args.split_ascii_whitespace().collect();

    let (subject, sid, reply, length) = match tokens.as_slice() {
        [subject, sid, length] => (*subject, *sid, None, *length),
        [subject, sid, reply, length] => (*subject, *sid, Some(*reply), *length),
        _ => return None,
    };

    let needed = usize::try_from(parse_decimal(length)?).ok()?;
    if needed > MAX_MSG_PAYLOAD {
        return None;
    }

    Some(PendingMsg {
        subject: subject.to_string(),
        sid: parse_decimal(sid)?,
        reply: reply.map(str::to_string),
        needed,
    })
}

/// Strictly decimal digits; rejects signs and empty strings.
fn parse_decimal(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Strip surrounding whitespace and one pair of single quotes.
fn unquote(text: &str) -> String {
    let text = text.trim();
    text.strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(text)
        .to_string()
}

fn unknown(line: &[u8]) -> ServerFrame {
    ServerFrame::Unknown(String::from_utf8_lossy(line).into_owned())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
