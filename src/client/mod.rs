//! Publish/subscribe client.
//!
//! [`Client`] is a cheap, cloneable handle. Every clone shares one
//! connection, one subscription registry and one outbox.
//!
//! # Architecture
//!
//! ```text
//!   application ──publish/subscribe──► Shared (one mutex)
//!                                        │  registry · outbox · state
//!                                        ▼
//!                                  writer task ──► socket
//!                                                    │
//!   callbacks ◄── dispatch ◄── FrameParser ◄── reader task
//! ```
//!
//! - The reader task parses frames and dispatches them synchronously, so
//!   message callbacks run on the I/O task in wire order and must not block.
//! - User callbacks are always invoked after the lock is released; they may
//!   call back into the client freely.
//! - Each connection carries a generation number. Events from the reader or
//!   writer of a replaced connection are ignored.
//!
//! Clones held by the background tasks keep the client alive until
//! [`Client::stop`] is called.

// Rust guideline compliant 2026-02

mod dispatch;
mod lifecycle;

use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{ClientOptions, ServerUri};
use crate::constants::{INBOX_HEX_DIGITS, INBOX_PREFIX};
use crate::error::ClientError;
use crate::outbox::Outbox;
use crate::protocol::{Command, Message, ServerInfo};
use crate::subscription::{Sid, SubscribeOptions, SubscriptionRegistry, TimeoutOptions};

pub use lifecycle::ConnectionState;

/// Handler for asynchronous errors.
pub type ErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Handler for the "connected" event.
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Who receives asynchronous errors.
enum ErrorHandler {
    /// Nobody yet; errors are only logged.
    Unset,
    /// Installed on first connect: log, record, stop.
    Default,
    /// Registered through [`Client::on_error`].
    User(ErrorCallback),
}

/// All mutable client state, guarded by one mutex.
struct Shared {
    state: ConnectionState,
    uri: Option<ServerUri>,
    /// Bumped for every new connection and on stop.
    generation: u64,
    ever_connected: bool,
    closing: bool,
    reconnect_attempts: u32,
    outbox: Outbox,
    registry: SubscriptionRegistry,
    server_info: Option<ServerInfo>,
    error_handler: ErrorHandler,
    on_connect: Option<ConnectCallback>,
    last_error: Option<ClientError>,
    reader_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            uri: None,
            generation: 0,
            ever_connected: false,
            closing: false,
            reconnect_attempts: 0,
            outbox: Outbox::default(),
            registry: SubscriptionRegistry::default(),
            server_info: None,
            error_handler: ErrorHandler::Unset,
            on_connect: None,
            last_error: None,
            reader_task: None,
            reconnect_task: None,
        }
    }

    /// Send `UNSUB` and apply it locally.
    fn unsubscribe(&mut self, sid: Sid, max: u64) {
        self.outbox.send(
            Command::Unsub {
                sid: sid.value(),
                max: Some(max),
            }
            .encode(),
        );
        self.registry.unsubscribe(sid, max);
    }

    fn uri_string(&self) -> String {
        self.uri.as_ref().map(ToString::to_string).unwrap_or_default()
    }
}

struct Inner {
    options: ClientOptions,
    shared: Mutex<Shared>,
}

/// Handle to a publish/subscribe client.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> Result<(), subline::ClientError> {
/// use subline::{Client, ClientOptions};
///
/// let client = Client::new(ClientOptions::default());
/// client.on_connect(|| log::info!("connected"));
/// client.start("nats://127.0.0.1:4222").await?;
///
/// client.subscribe("greet.*", |msg| println!("{}: {}", msg.subject, msg.payload_str()));
/// client.publish("greet.joe", "hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.lock();
        f.debug_struct("Client")
            .field("state", &shared.state)
            .field("uri", &shared.uri)
            .field("subscriptions", &shared.registry.len())
            .field("outbox", &shared.outbox)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client. Nothing happens on the network until
    /// [`Client::start`].
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                shared: Mutex::new(Shared::new()),
            }),
        }
    }

    /// Options this client was created with.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Callbacks never run under the lock.
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// True while a connection is established and its handshake was sent.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.lock().state == ConnectionState::Connected
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Most recent `INFO` the server sent.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.lock().server_info.clone()
    }

    /// Error that stopped the client through the default error handler.
    #[must_use]
    pub fn last_error(&self) -> Option<ClientError> {
        self.lock().last_error.as_ref().map(ClientError::duplicate)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Register the handler for asynchronous errors, replacing any previous
    /// one (including the default handler).
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.lock().error_handler = ErrorHandler::User(Arc::new(handler));
    }

    /// Register the handler fired after every successful (re)connect, once
    /// the server has answered the handshake round trip.
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock().on_connect = Some(Arc::new(handler));
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publish `payload` on `subject`. Empty subjects are ignored.
    pub fn publish(&self, subject: &str, payload: impl AsRef<[u8]>) {
        self.publish_inner(subject, None, payload.as_ref(), None);
    }

    /// Publish with a reply subject.
    pub fn publish_with_reply(&self, subject: &str, reply: &str, payload: impl AsRef<[u8]>) {
        self.publish_inner(subject, Some(reply), payload.as_ref(), None);
    }

    /// Publish, then run `on_ack` once the server has processed it.
    pub fn publish_with_ack<F>(&self, subject: &str, payload: impl AsRef<[u8]>, on_ack: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.publish_inner(subject, None, payload.as_ref(), Some(Box::new(on_ack)));
    }

    fn publish_inner(
        &self,
        subject: &str,
        reply: Option<&str>,
        payload: &[u8],
        on_ack: Option<crate::outbox::PongCallback>,
    ) {
        if subject.is_empty() {
            return;
        }

        let command = Command::Pub {
            subject,
            reply: reply.filter(|r| !r.is_empty()),
            payload,
        }
        .encode();

        let mut shared = self.lock();
        shared.outbox.send(command);
        if let Some(on_ack) = on_ack {
            shared.outbox.round_trip(on_ack);
        }
    }

    /// Run `callback` once the server has processed every command sent so
    /// far (`PING`/`PONG` round trip).
    pub fn flush<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock().outbox.round_trip(Box::new(callback));
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe to `subject`. Returns [`Sid::NONE`] for an empty subject.
    pub fn subscribe<F>(&self, subject: &str, callback: F) -> Sid
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.subscribe_with(subject, SubscribeOptions::default(), callback)
    }

    /// Subscribe with a queue group and/or an auto-unsubscribe cap.
    pub fn subscribe_with<F>(&self, subject: &str, options: SubscribeOptions, callback: F) -> Sid
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        if subject.is_empty() {
            return Sid::NONE;
        }

        let queue = options.queue.filter(|q| !q.is_empty());
        let mut shared = self.lock();
        let sid = shared
            .registry
            .insert(subject, queue.clone(), Arc::new(callback));

        // Offline subscriptions are announced by the next handshake.
        shared.outbox.send_if_live(
            Command::Sub {
                subject,
                queue: queue.as_deref(),
                sid: sid.value(),
            }
            .encode(),
        );
        log::debug!("[Client] Subscribed sid={} to {}", sid, subject);

        if let Some(max) = options.max {
            shared.unsubscribe(sid, max);
        }
        sid
    }

    /// Unsubscribe immediately.
    ///
    /// `UNSUB` is sent even if `sid` is not known locally.
    pub fn unsubscribe(&self, sid: Sid) {
        self.lock().unsubscribe(sid, 0);
    }

    /// Unsubscribe once `max` messages in total have been received.
    ///
    /// If that many have already arrived the subscription ends now.
    pub fn unsubscribe_after(&self, sid: Sid, max: u64) {
        self.lock().unsubscribe(sid, max);
    }

    /// Publish a request and subscribe to its replies on a fresh inbox.
    ///
    /// Returns the inbox subscription, or [`Sid::NONE`] for an empty subject.
    /// Pass [`SubscribeOptions::max`] to stop listening after N replies.
    pub fn request<F>(
        &self,
        subject: &str,
        payload: impl AsRef<[u8]>,
        options: SubscribeOptions,
        callback: F,
    ) -> Sid
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        if subject.is_empty() {
            return Sid::NONE;
        }

        let inbox = new_inbox();
        let sid = self.subscribe_with(&inbox, options, callback);
        self.publish_with_reply(subject, &inbox, payload);
        sid
    }

    /// Arm a one-shot timeout on `sid`.
    ///
    /// Unless `options.expected` messages arrive within `after`, the timeout
    /// fires: the subscription is dropped if `options.auto_unsubscribe`, then
    /// `on_timeout` runs. Re-arming replaces the previous timeout. Unknown
    /// sids are ignored. Must be called from within a tokio runtime.
    pub fn timeout<F>(&self, sid: Sid, after: Duration, options: TimeoutOptions, on_timeout: F)
    where
        F: FnOnce(Sid) + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("[Client] timeout() called outside a tokio runtime; ignored");
            return;
        };

        let mut shared = self.lock();
        let Some(token) = shared.registry.next_timeout_token(sid) else {
            return;
        };

        let client = self.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            client.fire_timeout(sid, token, on_timeout);
        });
        shared
            .registry
            .arm_timeout(sid, token, options, Some(handle));
    }

    // ========================================================================
    // Error escalation
    // ========================================================================

    /// Route an asynchronous error to whoever handles it. Never called with
    /// the lock held.
    fn raise(&self, error: ClientError) {
        let handler = {
            let mut guard = self.lock();
            let shared = &mut *guard;
            match &shared.error_handler {
                ErrorHandler::User(handler) => Some(Arc::clone(handler)),
                ErrorHandler::Default => {
                    log::error!("[Client] {}", error);
                    shared.last_error = Some(error.duplicate());
                    None
                }
                ErrorHandler::Unset => {
                    log::warn!("[Client] {} (no error handler registered)", error);
                    return;
                }
            }
        };

        match handler {
            Some(handler) => handler(&error),
            None => self.stop(),
        }
    }

    /// True if the application registered its own error handler.
    fn has_user_error_handler(&self) -> bool {
        matches!(self.lock().error_handler, ErrorHandler::User(_))
    }
}

/// Generate a unique reply subject: `_INBOX.` followed by random hex.
#[must_use]
pub fn new_inbox() -> String {
    let bytes: [u8; INBOX_HEX_DIGITS.div_ceil(2)] = rand::random();
    let mut inbox = String::with_capacity(INBOX_PREFIX.len() + INBOX_HEX_DIGITS);
    inbox.push_str(INBOX_PREFIX);
    for byte in bytes {
        let _ = write!(inbox, "{byte:02x}");
    }
    inbox.truncate(INBOX_PREFIX.len() + INBOX_HEX_DIGITS);
    inbox
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_inbox_shape_and_uniqueness() {
        let a = new_inbox();
        let b = new_inbox();
        assert_ne!(a, b);
        for inbox in [&a, &b] {
            let suffix = inbox.strip_prefix("_INBOX.").unwrap();
            assert_eq!(suffix.len(), 26);
            assert!(suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = Client::default();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.connected());
        assert!(client.server_info().is_none());
        assert!(client.last_error().is_none());
    }

    #[test]
    fn test_empty_subjects_are_ignored() {
        let client = Client::default();
        client.publish("", "x");
        assert_eq!(client.subscribe("", |_| {}), Sid::NONE);
        assert_eq!(
            client.request("", "x", SubscribeOptions::default(), |_| {}),
            Sid::NONE
        );
        assert_eq!(client.lock().outbox.pending_len(), 0);
        assert_eq!(client.lock().registry.len(), 0);
    }

    #[test]
    fn test_offline_commands_queue_but_sub_does_not() {
        let client = Client::default();
        let sid = client.subscribe("foo", |_| {});
        client.publish("foo", "hello");
        client.unsubscribe_after(sid, 2);

        let shared = client.lock();
        // PUB + UNSUB; the SUB is replayed from the registry on connect.
        assert_eq!(shared.outbox.pending_len(), 2);
        assert!(shared.registry.contains(sid));
    }

    #[test]
    fn test_request_registers_inbox_subscription() {
        let client = Client::default();
        let first = client.request("svc", "q", SubscribeOptions::max(1), |_| {});
        let second = client.request("svc", "q", SubscribeOptions::max(1), |_| {});
        assert_eq!(first, Sid::new(1));
        assert_eq!(second, Sid::new(2));

        let resubs = client.lock().registry.resubscriptions();
        assert_ne!(resubs[0].subject, resubs[1].subject);
        assert!(resubs.iter().all(|r| r.subject.starts_with("_INBOX.")));
        assert!(resubs.iter().all(|r| r.remaining == Some(1)));
    }

    #[test]
    fn test_unsubscribe_removes_locally() {
        let client = Client::default();
        let sid = client.subscribe("foo", |_| {});
        client.unsubscribe(sid);
        assert!(!client.lock().registry.contains(sid));
        // UNSUB for an unknown sid is still sent.
        client.unsubscribe(Sid::new(99));
        assert_eq!(client.lock().outbox.pending_len(), 2);
    }

    #[test]
    fn test_user_error_handler_receives_errors() {
        let client = Client::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        client.on_error(move |err| {
            assert!(err.is_protocol());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.raise(ClientError::Protocol("bad".into()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(client.last_error().is_none());
        assert!(client.has_user_error_handler());
    }

    #[test]
    fn test_default_error_handler_records_and_stops() {
        let client = Client::default();
        client.lock().error_handler = ErrorHandler::Default;

        client.raise(ClientError::UnknownProtocol("WAT".into()));

        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            client.last_error(),
            Some(ClientError::UnknownProtocol(line)) if line == "WAT"
        ));
    }

    #[test]
    fn test_unset_error_handler_only_logs() {
        let client = Client::default();
        client.raise(ClientError::Protocol("ignored".into()));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.last_error().is_none());
    }

    #[test]
    fn test_timeout_outside_runtime_is_ignored() {
        let client = Client::default();
        let sid = client.subscribe("foo", |_| {});
        client.timeout(sid, Duration::from_millis(1), TimeoutOptions::default(), |_| {});
        assert!(client.lock().registry.contains(sid));
    }
}
