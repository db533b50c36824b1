//! Applying server frames and timer events to client state.

use super::Client;
use crate::error::ClientError;
use crate::protocol::{Command, Message, ServerFrame, ServerInfo};
use crate::subscription::{Dispatch, Sid};

impl Client {
    /// Apply one frame read from connection `generation`.
    ///
    /// Frames from a replaced or stopped connection are ignored.
    pub(super) fn handle_frame(&self, generation: u64, frame: ServerFrame) {
        match frame {
            ServerFrame::Msg(message) => self.deliver(generation, message),
            ServerFrame::Ok => log::trace!("[Client] +OK"),
            ServerFrame::Err(text) => {
                if self.is_current(generation) {
                    self.raise(ClientError::Protocol(text));
                }
            }
            ServerFrame::Ping => {
                let mut shared = self.lock();
                if shared.generation == generation {
                    shared.outbox.send(Command::Pong.encode());
                }
            }
            ServerFrame::Pong => {
                let callback = {
                    let mut shared = self.lock();
                    if shared.generation != generation {
                        return;
                    }
                    shared.outbox.complete_round_trip()
                };
                match callback {
                    Some(callback) => callback(),
                    None => log::debug!("[Client] PONG with no pending round trip"),
                }
            }
            ServerFrame::Info(json) => match ServerInfo::from_json(&json) {
                Ok(info) => {
                    let mut shared = self.lock();
                    if shared.generation == generation {
                        log::debug!(
                            "[Client] Server info: id={:?} version={:?}",
                            info.server_id,
                            info.version
                        );
                        shared.server_info = Some(info);
                    }
                }
                Err(e) => log::warn!("[Client] Ignoring malformed INFO: {}", e),
            },
            ServerFrame::Unknown(line) => {
                if self.is_current(generation) {
                    self.raise(ClientError::UnknownProtocol(line));
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Route a `MSG` through the registry and run its callback unlocked.
    fn deliver(&self, generation: u64, message: Message) {
        let delivery = {
            let mut shared = self.lock();
            if shared.generation != generation {
                return;
            }

            let sid = message.sid;
            match shared.registry.dispatch(message) {
                Dispatch::Unknown => None,
                Dispatch::Dropped => {
                    shared.outbox.send(Command::Unsub { sid, max: None }.encode());
                    None
                }
                Dispatch::Deliver {
                    callback,
                    message,
                    finished,
                } => {
                    if finished {
                        log::debug!("[Client] sid={} reached its limit", sid);
                        shared.outbox.send(Command::Unsub { sid, max: None }.encode());
                    }
                    Some((callback, message))
                }
            }
        };

        if let Some((callback, message)) = delivery {
            callback(message);
        }
    }

    /// Timer task body: claim the timeout and run its callback.
    pub(super) fn fire_timeout<F>(&self, sid: Sid, token: u64, on_timeout: F)
    where
        F: FnOnce(Sid),
    {
        {
            let mut shared = self.lock();
            let Some(auto_unsubscribe) = shared.registry.take_fired_timeout(sid, token) else {
                return;
            };
            if auto_unsubscribe {
                shared.unsubscribe(sid, 0);
            }
        }

        log::debug!("[Client] Timeout fired for sid={}", sid);
        on_timeout(sid);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
