//! Protocol and client-wide constants.
//!
//! Centralizes wire-level literals and the reconnection defaults so the
//! parser, the command encoder and the lifecycle code agree on them.
//!
//! # Categories
//!
//! - **Wire**: line terminator and fixed control lines
//! - **Reconnect**: retry interval and attempt cap
//! - **Transport**: read buffer sizing

use std::time::Duration;

// ============================================================================
// Wire
// ============================================================================

/// Line terminator for every control line and payload.
pub const CRLF: &[u8] = b"\r\n";

/// Keepalive request line.
pub const PING_LINE: &[u8] = b"PING\r\n";

/// Keepalive response line.
pub const PONG_LINE: &[u8] = b"PONG\r\n";

/// Port used when the connection URI does not name one.
pub const DEFAULT_PORT: u16 = 4222;

/// Prefix for generated reply inboxes.
pub const INBOX_PREFIX: &str = "_INBOX.";

/// Number of random hex digits following [`INBOX_PREFIX`].
pub const INBOX_HEX_DIGITS: usize = 26;

/// Largest `MSG` payload the parser accepts. Longer declared lengths make the
/// line malformed.
pub const MAX_MSG_PAYLOAD: usize = 64 * 1024 * 1024;

// ============================================================================
// Reconnect
// ============================================================================

/// Fixed wait between reconnect attempts (no backoff).
pub const RECONNECT_TIME_WAIT: Duration = Duration::from_secs(2);

/// Attempts made before the client gives up and reports a disconnect.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

// ============================================================================
// Transport
// ============================================================================

/// Read buffer size used when the OS does not report a receive buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;
