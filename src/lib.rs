//! Subline - line-protocol publish/subscribe client.
//!
//! Talks a text-framed messaging protocol (subjects, subscriptions,
//! request/reply) over one persistent TCP connection, buffering commands
//! while offline and re-establishing subscriptions after a reconnect.
//!
//! # Architecture
//!
//! Built bottom-up from five parts:
//!
//! - **Transport** - TCP connect plus reader/writer loops
//! - **Frame parser** - incremental `BytesMut` state machine
//! - **Subscription registry** - sid → subject, queue group, callback, caps
//! - **Outbox** - offline command queue and `PING`/`PONG` round trips
//! - **Lifecycle** - handshake, reconnect with bounded retries, stop
//!
//! # Modules
//!
//! - [`client`] - the [`Client`] handle
//! - [`protocol`] - wire commands, frame parser, [`Message`]
//! - [`subscription`] - sids and subscription options
//! - [`config`] - [`ClientOptions`] and [`ServerUri`]
//! - [`error`] - [`ClientError`]
//!
//! # Logging
//!
//! The crate logs through the `log` facade with bracketed component
//! prefixes (`[Client]`, `[Reconnect]`, `[Transport]`) and never installs a
//! logger itself.

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod subscription;

mod outbox;
mod transport;

// Re-export commonly used types
pub use client::{new_inbox, Client, ConnectCallback, ConnectionState, ErrorCallback};
pub use config::{ClientOptions, ServerUri};
pub use error::ClientError;
pub use protocol::{Message, ServerInfo};
pub use subscription::{MessageCallback, Sid, SubscribeOptions, TimeoutOptions};
