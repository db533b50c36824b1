//! Wire protocol: outbound command encoding and inbound frame parsing.
//!
//! The protocol is line-oriented text. Every control line ends in `\r\n`;
//! `PUB` and `MSG` are followed by a payload of exactly the declared byte
//! length plus its own `\r\n`.

pub mod command;
pub mod info;
pub mod parser;

use bytes::Bytes;

pub use command::{Command, ConnectInfo};
pub use info::ServerInfo;
pub use parser::{FrameParser, ServerFrame};

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,
    /// Subscription the server routed it to.
    pub sid: u64,
    /// Reply subject, for request/response.
    pub reply: Option<String>,
    /// Message body.
    pub payload: Bytes,
}

impl Message {
    /// Payload as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
