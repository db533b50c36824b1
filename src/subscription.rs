//! Subscription registry.
//!
//! Maps subscription ids to their state and decides what happens to each
//! incoming `MSG`. The registry never touches the socket: it tells the
//! caller which callback to run and whether an `UNSUB` must go out, and the
//! client acts on that after releasing its lock.
//!
//! # Lifecycle
//!
//! ```text
//! insert() ──► live ──dispatch()──► received += 1
//!                │                    │
//!                │                    ├── received == max  → deliver, remove, UNSUB
//!                │                    └── received  > max  → drop,    remove, UNSUB
//!                │
//!                ├── unsubscribe(sid, 0)              → remove
//!                ├── unsubscribe(sid, n), received>=n → remove
//!                └── timeout fires (auto-unsubscribe) → remove
//! ```
//!
//! Ids start at 1 and are never reused; they survive reconnects so the
//! server sees the same sid when a subscription is re-announced.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::protocol::Message;

/// Callback invoked for every message delivered to a subscription.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Subscription identifier.
///
/// [`Sid::NONE`] is returned when a subscribe request is ignored (empty
/// subject); real ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(u64);

impl Sid {
    /// Sentinel for "nothing was subscribed".
    pub const NONE: Sid = Sid(0);

    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id as sent on the wire.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// False for [`Sid::NONE`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options for a new subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Queue group; the server delivers each message to one group member.
    pub queue: Option<String>,
    /// Unsubscribe automatically after this many messages.
    pub max: Option<u64>,
}

impl SubscribeOptions {
    /// Options with a queue group.
    #[must_use]
    pub fn queue(group: impl Into<String>) -> Self {
        Self {
            queue: Some(group.into()),
            max: None,
        }
    }

    /// Options with an auto-unsubscribe threshold.
    #[must_use]
    pub fn max(max: u64) -> Self {
        Self {
            queue: None,
            max: Some(max),
        }
    }
}

/// Options for [`crate::Client::timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutOptions {
    /// Messages that must arrive before the timeout is cancelled.
    pub expected: u64,
    /// Unsubscribe when the timeout fires.
    pub auto_unsubscribe: bool,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            expected: 1,
            auto_unsubscribe: true,
        }
    }
}

/// A timeout armed on a subscription.
struct ArmedTimeout {
    expected: u64,
    auto_unsubscribe: bool,
    /// Distinguishes this arming from earlier ones whose tasks may still be
    /// running when they are replaced.
    token: u64,
    handle: Option<JoinHandle<()>>,
}

impl ArmedTimeout {
    fn cancel(self) {
        if let Some(handle) = self.handle {
            handle.abort();
        }
    }
}

/// State of one subscription.
struct Subscription {
    subject: String,
    queue: Option<String>,
    callback: MessageCallback,
    received: u64,
    max: u64,
    timeout: Option<ArmedTimeout>,
}

/// What the client must do with an incoming message.
pub(crate) enum Dispatch {
    /// No such subscription (already gone); ignore the message.
    Unknown,
    /// Hand the message to `callback`. When `finished` the subscription just
    /// reached its cap and was removed; the client sends `UNSUB`.
    Deliver {
        callback: MessageCallback,
        message: Message,
        finished: bool,
    },
    /// The subscription was already over its cap; it was removed without
    /// delivering and the client sends `UNSUB`.
    Dropped,
}

/// A subscription as re-announced after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resubscribe {
    pub sid: Sid,
    pub subject: String,
    pub queue: Option<String>,
    /// Messages still allowed before the cap, if capped.
    pub remaining: Option<u64>,
}

/// Registry of live subscriptions, ordered by sid.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    subs: BTreeMap<Sid, Subscription>,
    last_sid: u64,
    next_timeout_token: u64,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("live", &self.subs.len())
            .field("last_sid", &self.last_sid)
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Register a subscription under the next sid.
    pub fn insert(
        &mut self,
        subject: &str,
        queue: Option<String>,
        callback: MessageCallback,
    ) -> Sid {
        self.last_sid += 1;
        let sid = Sid(self.last_sid);
        self.subs.insert(
            sid,
            Subscription {
                subject: subject.to_string(),
                queue,
                callback,
                received: 0,
                max: 0,
                timeout: None,
            },
        );
        sid
    }

    /// Apply an unsubscribe with an optional cap (`0` = immediately).
    ///
    /// Returns `true` if the subscription was removed.
    pub fn unsubscribe(&mut self, sid: Sid, max: u64) -> bool {
        let Some(sub) = self.subs.get_mut(&sid) else {
            return false;
        };
        sub.max = max;
        if sub.max == 0 || sub.received >= sub.max {
            self.remove(sid);
            return true;
        }
        false
    }

    /// Account for one incoming message and decide its fate.
    pub fn dispatch(&mut self, message: Message) -> Dispatch {
        let sid = Sid(message.sid);
        let Some(sub) = self.subs.get_mut(&sid) else {
            return Dispatch::Unknown;
        };

        sub.received += 1;

        if sub.max > 0 && sub.received > sub.max {
            self.remove(sid);
            return Dispatch::Dropped;
        }

        if sub
            .timeout
            .as_ref()
            .is_some_and(|timeout| sub.received >= timeout.expected)
        {
            if let Some(timeout) = sub.timeout.take() {
                timeout.cancel();
            }
        }

        let callback = Arc::clone(&sub.callback);
        let finished = sub.max > 0 && sub.received == sub.max;
        if finished {
            self.remove(sid);
        }

        Dispatch::Deliver {
            callback,
            message,
            finished,
        }
    }

    /// Reserve a token for a timeout about to be armed on `sid`.
    ///
    /// Returns `None` if the subscription does not exist.
    pub fn next_timeout_token(&mut self, sid: Sid) -> Option<u64> {
        if !self.subs.contains_key(&sid) {
            return None;
        }
        self.next_timeout_token += 1;
        Some(self.next_timeout_token)
    }

    /// Attach a timeout, cancelling any previous one on the same sid.
    ///
    /// If the subscription vanished in the meantime the task is aborted.
    pub fn arm_timeout(
        &mut self,
        sid: Sid,
        token: u64,
        options: TimeoutOptions,
        handle: Option<JoinHandle<()>>,
    ) {
        let armed = ArmedTimeout {
            expected: options.expected,
            auto_unsubscribe: options.auto_unsubscribe,
            token,
            handle,
        };
        match self.subs.get_mut(&sid) {
            Some(sub) => {
                if let Some(previous) = sub.timeout.replace(armed) {
                    previous.cancel();
                }
            }
            None => armed.cancel(),
        }
    }

    /// Claim a fired timeout.
    ///
    /// Returns `Some(auto_unsubscribe)` if `token` is still the armed timeout
    /// of `sid`, clearing it; `None` if it was cancelled or replaced.
    pub fn take_fired_timeout(&mut self, sid: Sid, token: u64) -> Option<bool> {
        let sub = self.subs.get_mut(&sid)?;
        if sub.timeout.as_ref().map(|t| t.token) != Some(token) {
            return None;
        }
        sub.timeout.take().map(|t| t.auto_unsubscribe)
    }

    /// Cancel every armed timeout (client shutdown).
    pub fn cancel_all_timeouts(&mut self) {
        for sub in self.subs.values_mut() {
            if let Some(timeout) = sub.timeout.take() {
                timeout.cancel();
            }
        }
    }

    /// Subscriptions to re-announce after a reconnect, in sid order.
    pub fn resubscriptions(&self) -> Vec<Resubscribe> {
        self.subs
            .iter()
            .map(|(sid, sub)| Resubscribe {
                sid: *sid,
                subject: sub.subject.clone(),
                queue: sub.queue.clone(),
                remaining: (sub.max > 0).then(|| sub.max.saturating_sub(sub.received)),
            })
            .collect()
    }

    /// True if `sid` is live.
    #[cfg(test)]
    pub fn contains(&self, sid: Sid) -> bool {
        self.subs.contains_key(&sid)
    }

    /// Messages received so far by `sid`.
    #[cfg(test)]
    pub fn received(&self, sid: Sid) -> Option<u64> {
        self.subs.get(&sid).map(|sub| sub.received)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    fn remove(&mut self, sid: Sid) {
        if let Some(mut sub) = self.subs.remove(&sid) {
            if let Some(timeout) = sub.timeout.take() {
                timeout.cancel();
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
