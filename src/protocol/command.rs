//! Client → server command encoding.
//!
//! ```text
//! CONNECT {"verbose":false,"pedantic":false[,"user":..,"pass":..]}\r\n
//! PUB <subject> [reply-to] <len>\r\n<payload>\r\n
//! SUB <subject> [queue-group] <sid>\r\n
//! UNSUB <sid> [max]\r\n
//! PING\r\n
//! PONG\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::constants::{CRLF, PING_LINE, PONG_LINE};

/// Options announced in the `CONNECT` command.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Request `+OK` acknowledgements.
    pub verbose: bool,
    /// Request strict subject checking.
    pub pedantic: bool,
    /// User from the connection URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password from the connection URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
}

/// An outbound protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Connection options; always the first command on a socket.
    Connect(&'a ConnectInfo),
    /// Publish `payload` on `subject`.
    Pub {
        /// Destination subject.
        subject: &'a str,
        /// Reply subject for request/response.
        reply: Option<&'a str>,
        /// Message body.
        payload: &'a [u8],
    },
    /// Register interest in `subject`.
    Sub {
        /// Subject (may contain wildcards).
        subject: &'a str,
        /// Queue group for load-balanced delivery.
        queue: Option<&'a str>,
        /// Subscription id.
        sid: u64,
    },
    /// Drop interest, optionally after `max` total messages.
    Unsub {
        /// Subscription id.
        sid: u64,
        /// Auto-unsubscribe threshold; `None` or `Some(0)` means now.
        max: Option<u64>,
    },
    /// Round-trip request.
    Ping,
    /// Reply to a server `PING`.
    Pong,
}

impl Command<'_> {
    /// Encode this command into its wire form, including the trailing CRLF.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Command::Connect(info) => {
                let json = serde_json::to_string(info).unwrap_or_else(|_| "{}".to_string());
                let mut buf = BytesMut::with_capacity(10 + json.len());
                buf.put_slice(b"CONNECT ");
                buf.put_slice(json.as_bytes());
                buf.put_slice(CRLF);
                buf.freeze()
            }
            Command::Pub {
                subject,
                reply,
                payload,
            } => {
                let header = match reply {
                    Some(reply) => format!("PUB {} {} {}", subject, reply, payload.len()),
                    None => format!("PUB {} {}", subject, payload.len()),
                };
                let mut buf = BytesMut::with_capacity(header.len() + payload.len() + 4);
                buf.put_slice(header.as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(payload);
                buf.put_slice(CRLF);
                buf.freeze()
            }
            Command::Sub {
                subject,
                queue,
                sid,
            } => {
                let line = match queue {
                    Some(queue) => format!("SUB {} {} {}\r\n", subject, queue, sid),
                    None => format!("SUB {} {}\r\n", subject, sid),
                };
                Bytes::from(line)
            }
            Command::Unsub { sid, max } => {
                let line = match max {
                    Some(max) if *max > 0 => format!("UNSUB {} {}\r\n", sid, max),
                    _ => format!("UNSUB {}\r\n", sid),
                };
                Bytes::from(line)
            }
            Command::Ping => Bytes::from_static(PING_LINE),
            Command::Pong => Bytes::from_static(PONG_LINE),
        }
    }
}
