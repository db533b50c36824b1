//! Outbound command buffering and round-trip bookkeeping.
//!
//! While a connection is usable, commands go straight to the writer task's
//! channel. Otherwise they wait in a FIFO queue that is flushed, whole and in
//! order, the next time a connection finishes its handshake.
//!
//! Round trips (`PING` + callback) share the same ordering: each `PONG`
//! completes the oldest outstanding callback.
//!
//! ```text
//!   send(cmd) ──► writer live? ──yes──► writer channel ──► socket
//!                     │
//!                     no
//!                     ▼
//!                pending queue ──attach(writer)──► writer channel
//! ```

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::SendError};

use crate::constants::PING_LINE;

/// Callback completed by a `PONG`.
pub type PongCallback = Box<dyn FnOnce() + Send>;

/// Pending commands, the live writer, and outstanding round trips.
#[derive(Default)]
pub(crate) struct Outbox {
    pending: VecDeque<Bytes>,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    pongs: VecDeque<PongCallback>,
    /// How many of the oldest `pongs` had their `PING` handed to a writer.
    pongs_in_flight: usize,
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox")
            .field("pending", &self.pending.len())
            .field("live", &self.writer.is_some())
            .field("pongs", &self.pongs.len())
            .field("pongs_in_flight", &self.pongs_in_flight)
            .finish()
    }
}

impl Outbox {
    /// Write `command` now if a connection is live, otherwise queue it.
    ///
    /// Returns `true` if the command was handed to a writer.
    pub fn send(&mut self, command: Bytes) -> bool {
        if let Some(writer) = &self.writer {
            match writer.send(command) {
                Ok(()) => return true,
                // Writer task already gone; keep the command for the next
                // connection.
                Err(SendError(command)) => self.pending.push_back(command),
            }
        } else {
            self.pending.push_back(command);
        }
        false
    }

    /// Write `command` only if a connection is live; otherwise drop it.
    ///
    /// For commands the handshake re-creates on its own (`SUB`).
    pub fn send_if_live(&mut self, command: Bytes) -> bool {
        self.writer
            .as_ref()
            .is_some_and(|writer| writer.send(command).is_ok())
    }

    /// Register `callback` for the next unanswered `PONG` and send `PING`.
    pub fn round_trip(&mut self, callback: PongCallback) {
        self.pongs.push_back(callback);
        if self.send(Bytes::from_static(PING_LINE)) {
            self.pongs_in_flight += 1;
        }
    }

    /// Take the callback completed by an incoming `PONG`, if any.
    pub fn complete_round_trip(&mut self) -> Option<PongCallback> {
        let callback = self.pongs.pop_front()?;
        self.pongs_in_flight = self.pongs_in_flight.saturating_sub(1);
        Some(callback)
    }

    /// Make `writer` the live connection.
    ///
    /// Writes `preamble` first, then every pending command in insertion
    /// order, and from then on writes new commands directly. Returns the
    /// number of pending commands flushed.
    pub fn attach(
        &mut self,
        writer: mpsc::UnboundedSender<Bytes>,
        preamble: impl IntoIterator<Item = Bytes>,
    ) -> usize {
        for command in preamble {
            // A closed writer surfaces through the reader as a lost
            // connection; nothing useful can be done with the error here.
            let _ = writer.send(command);
        }

        let flushed = self.pending.len();
        for command in self.pending.drain(..) {
            let _ = writer.send(command);
        }

        self.pongs_in_flight = self.pongs.len();
        self.writer = Some(writer);
        flushed
    }

    /// Forget the live writer after the connection was lost.
    ///
    /// `PING`s already handed to the dead socket will never be answered, so
    /// one `PING` per orphaned round trip is queued ahead of everything else;
    /// the callbacks keep their place and complete after the next handshake.
    /// Returns the number of re-issued round trips.
    pub fn detach(&mut self) -> usize {
        self.writer = None;
        let orphaned = std::mem::take(&mut self.pongs_in_flight);
        for _ in 0..orphaned {
            self.pending.push_front(Bytes::from_static(PING_LINE));
        }
        orphaned
    }

    /// Drop the writer so its task drains what it already holds and closes
    /// the socket. Pending commands and round trips are discarded.
    pub fn close(&mut self) {
        self.writer = None;
        self.pending.clear();
        self.pongs.clear();
        self.pongs_in_flight = 0;
    }

    /// True while commands are written directly.
    #[cfg(test)]
    pub fn is_live(&self) -> bool {
        self.writer.is_some()
    }

    /// Number of queued commands.
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of outstanding round trips.
    #[cfg(test)]
    pub fn round_trips_outstanding(&self) -> usize {
        self.pongs.len()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
