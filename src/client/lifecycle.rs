//! Connection lifecycle: connect, handshake, loss, reconnect, stop.
//!
//! ```text
//!                start()
//!   Disconnected ──────► Connecting ──bind──► Connected ◄──────────┐
//!        ▲                   │                   │                 │
//!        │   connect failed  │       unbind      │ reconnect on    │ bind
//!        └───────────────────┘                   ▼                 │
//!        ◄────────── attempts exhausted ──── Reconnecting ─────────┘
//!
//!   stop() from any state ──► Closed
//! ```
//!
//! The handshake runs under the client lock, so no other caller can slip a
//! command between `CONNECT`, the replayed subscriptions and the flushed
//! outbox.

use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;

use super::{Client, ErrorHandler};
use crate::config::ServerUri;
use crate::error::ClientError;
use crate::protocol::{Command, ConnectInfo};
use crate::transport::{self, Connection};

/// Lifecycle state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or gave up after losing the connection.
    Disconnected,
    /// `start` is opening the first connection.
    Connecting,
    /// Handshake sent; commands are written directly.
    Connected,
    /// Connection lost; retrying at a fixed interval.
    Reconnecting,
    /// Stopped by the application.
    Closed,
}

/// Outcome of one reconnect tick.
enum Tick {
    Stop,
    GiveUp(String),
    Attempt(ServerUri, u32),
}

impl Client {
    /// Connect to `uri` (`scheme://[user[:pass]@]host[:port]`).
    ///
    /// Resolves once the TCP connection is open and the handshake has been
    /// queued; [`Client::on_connect`] fires when the server answers it.
    ///
    /// A failed connect returns the I/O error. If an error handler is
    /// registered it also receives [`ClientError::CouldNotConnect`].
    pub async fn start(&self, uri: &str) -> Result<(), ClientError> {
        let uri = ServerUri::parse(uri)?;

        {
            let mut shared = self.lock();
            match shared.state {
                ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting => return Err(ClientError::AlreadyStarted),
                ConnectionState::Disconnected | ConnectionState::Closed => {}
            }
            shared.state = ConnectionState::Connecting;
            shared.uri = Some(uri.clone());
            shared.closing = false;
            shared.ever_connected = false;
            shared.reconnect_attempts = 0;
        }

        log::info!("[Client] Connecting to {}", uri);

        match transport::connect(&uri, self.inner.options.read_buffer_size).await {
            Ok(connection) => {
                if !self.bind(connection) {
                    log::debug!("[Client] Stopped while connecting to {}", uri);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("[Client] Could not connect to {}: {}", uri, e);
                let closing = {
                    let mut shared = self.lock();
                    if shared.state == ConnectionState::Connecting {
                        shared.state = ConnectionState::Disconnected;
                    }
                    shared.closing
                };
                if !closing && self.has_user_error_handler() {
                    self.raise(ClientError::CouldNotConnect {
                        uri: uri.to_string(),
                    });
                }
                Err(ClientError::Io(e))
            }
        }
    }

    /// Stop the client.
    ///
    /// Commands already handed to the writer are drained before the socket
    /// closes; queued commands, pending round trips and subscription
    /// timeouts are dropped. No reconnect happens afterwards. Idempotent.
    pub fn stop(&self) {
        let tasks = {
            let mut shared = self.lock();
            if shared.closing {
                return;
            }
            shared.closing = true;
            shared.state = ConnectionState::Closed;
            shared.generation += 1;
            shared.outbox.close();
            shared.registry.cancel_all_timeouts();
            [shared.reader_task.take(), shared.reconnect_task.take()]
        };

        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        log::info!("[Client] Stopped");
    }

    /// Adopt a freshly opened connection and run the handshake.
    ///
    /// Returns `false` (dropping the connection) if the client was stopped
    /// or is no longer trying to connect.
    fn bind(&self, connection: Connection) -> bool {
        let (reader, writer, buffer_size) = connection.into_parts();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut shared = self.lock();
        if shared.closing
            || !matches!(
                shared.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            )
        {
            return false;
        }
        let Some(uri) = shared.uri.clone() else {
            return false;
        };

        shared.generation += 1;
        let generation = shared.generation;
        let first_connect = !shared.ever_connected;
        shared.ever_connected = true;
        shared.reconnect_attempts = 0;
        shared.reconnect_task = None;
        shared.state = ConnectionState::Connected;

        if first_connect && matches!(shared.error_handler, ErrorHandler::Unset) {
            log::debug!("[Client] No error handler registered; errors will stop the client");
            shared.error_handler = ErrorHandler::Default;
        }

        // CONNECT, then every live subscription under its existing sid.
        let info = ConnectInfo {
            verbose: self.inner.options.verbose,
            pedantic: self.inner.options.pedantic,
            user: uri.user().map(str::to_string),
            pass: uri.pass().map(str::to_string),
        };
        let resubscriptions = shared.registry.resubscriptions();
        let mut preamble = Vec::with_capacity(1 + resubscriptions.len());
        preamble.push(Command::Connect(&info).encode());
        for resub in &resubscriptions {
            preamble.push(
                Command::Sub {
                    subject: &resub.subject,
                    queue: resub.queue.as_deref(),
                    sid: resub.sid.value(),
                }
                .encode(),
            );
            if let Some(remaining) = resub.remaining {
                preamble.push(
                    Command::Unsub {
                        sid: resub.sid.value(),
                        max: Some(remaining),
                    }
                    .encode(),
                );
            }
        }

        let flushed = shared.outbox.attach(command_tx, preamble);
        log::debug!(
            "[Client] Handshake: {} subscription(s) replayed, {} queued command(s) flushed",
            resubscriptions.len(),
            flushed
        );

        let client = self.clone();
        shared
            .outbox
            .round_trip(Box::new(move || client.connection_established(generation)));

        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::write_loop(writer, command_rx).await {
                log::warn!("[Transport] Write failed: {}", e);
                client.unbind(generation);
            }
        });

        let client = self.clone();
        shared.reader_task = Some(tokio::spawn(client.read_connection(
            generation,
            reader,
            buffer_size,
        )));

        log::info!("[Client] Connection to {} open (generation {})", uri, generation);
        true
    }

    /// React to the loss of connection `generation`.
    fn unbind(&self, generation: u64) {
        let error = {
            let mut shared = self.lock();
            if shared.generation != generation || shared.state != ConnectionState::Connected {
                return;
            }

            let reissued = shared.outbox.detach();
            if reissued > 0 {
                log::debug!("[Client] {} round trip(s) will be re-sent after reconnect", reissued);
            }
            if let Some(task) = shared.reader_task.take() {
                task.abort();
            }

            let uri = shared.uri_string();
            if !shared.closing && self.inner.options.reconnect {
                shared.state = ConnectionState::Reconnecting;
                shared.reconnect_attempts = 0;
                log::info!(
                    "[Reconnect] Lost connection to {}; retrying every {:?} (max {} attempts)",
                    uri,
                    self.inner.options.reconnect_wait(),
                    self.inner.options.max_reconnect_attempts
                );
                shared.reconnect_task = Some(tokio::spawn(self.clone().reconnect_loop()));
                None
            } else {
                shared.state = ConnectionState::Disconnected;
                log::info!("[Client] Disconnected from {}", uri);
                (!shared.closing).then_some(ClientError::Disconnected { uri })
            }
        };

        if let Some(error) = error {
            self.raise(error);
        }
    }

    /// Retry the connection at a fixed interval until it succeeds, the
    /// attempts run out, or the client is stopped.
    async fn reconnect_loop(self) {
        let wait = self.inner.options.reconnect_wait();
        let max_attempts = self.inner.options.max_reconnect_attempts;

        loop {
            tokio::time::sleep(wait).await;

            let tick = {
                let mut shared = self.lock();
                if shared.closing || shared.state != ConnectionState::Reconnecting {
                    Tick::Stop
                } else {
                    shared.reconnect_attempts += 1;
                    if shared.reconnect_attempts > max_attempts {
                        shared.state = ConnectionState::Disconnected;
                        shared.reconnect_task = None;
                        Tick::GiveUp(shared.uri_string())
                    } else {
                        match shared.uri.clone() {
                            Some(uri) => Tick::Attempt(uri, shared.reconnect_attempts),
                            None => Tick::Stop,
                        }
                    }
                }
            };

            match tick {
                Tick::Stop => return,
                Tick::GiveUp(uri) => {
                    log::warn!(
                        "[Reconnect] Giving up on {} after {} attempts",
                        uri,
                        max_attempts
                    );
                    self.raise(ClientError::Disconnected { uri });
                    return;
                }
                Tick::Attempt(uri, attempt) => {
                    log::info!("[Reconnect] Attempt {}/{} to {}", attempt, max_attempts, uri);
                    match transport::connect(&uri, self.inner.options.read_buffer_size).await {
                        Ok(connection) => {
                            if self.bind(connection) {
                                log::info!("[Reconnect] Reconnected to {}", uri);
                            }
                            return;
                        }
                        Err(e) => {
                            log::warn!("[Reconnect] Attempt {} failed: {}", attempt, e);
                        }
                    }
                }
            }
        }
    }

    /// Handshake round trip completed: the connection is usable.
    fn connection_established(&self, generation: u64) {
        let callback = {
            let shared = self.lock();
            if shared.generation != generation || shared.state != ConnectionState::Connected {
                return;
            }
            shared.on_connect.clone()
        };

        log::info!("[Client] Connected");
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Reader task body for connection `generation`.
    async fn read_connection(self, generation: u64, reader: OwnedReadHalf, buffer_size: usize) {
        let mut parser = crate::protocol::FrameParser::new();
        let result = transport::read_loop(reader, buffer_size, |chunk| {
            for frame in parser.feed(chunk) {
                self.handle_frame(generation, frame);
            }
        })
        .await;

        match result {
            Ok(()) => log::info!("[Transport] Server closed the connection"),
            Err(e) => log::warn!("[Transport] Read failed: {}", e),
        }
        self.unbind(generation);
    }
}
