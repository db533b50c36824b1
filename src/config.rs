//! Client options and connection URI parsing.
//!
//! [`ClientOptions`] carries the knobs the application controls (protocol
//! flags, reconnect policy). Values can be overridden from the environment
//! with [`ClientOptions::apply_env_overrides`]. [`ServerUri`] is the parsed
//! form of `scheme://[user[:pass]@]host[:port]`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PORT, MAX_RECONNECT_ATTEMPTS, RECONNECT_TIME_WAIT};
use crate::error::ClientError;

/// Options controlling a [`crate::Client`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClientOptions {
    /// Ask the server to acknowledge every command with `+OK`.
    pub verbose: bool,
    /// Ask the server to perform strict subject checking.
    pub pedantic: bool,
    /// Reconnect automatically after losing an established connection.
    pub reconnect: bool,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed wait between reconnect attempts, in milliseconds.
    pub reconnect_wait_ms: u64,
    /// Read buffer size override. `None` sizes the buffer from the socket's
    /// receive buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_buffer_size: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            reconnect: true,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_wait_ms: RECONNECT_TIME_WAIT.as_millis() as u64,
            read_buffer_size: None,
        }
    }
}

impl ClientOptions {
    /// Default options with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env_overrides();
        options
    }

    /// Overlay `SUBLINE_*` environment variables onto these options.
    ///
    /// Unparseable values are ignored and the current value is kept.
    pub fn apply_env_overrides(&mut self) {
        if let Some(verbose) = env_bool("SUBLINE_VERBOSE") {
            self.verbose = verbose;
        }

        if let Some(pedantic) = env_bool("SUBLINE_PEDANTIC") {
            self.pedantic = pedantic;
        }

        if let Some(reconnect) = env_bool("SUBLINE_RECONNECT") {
            self.reconnect = reconnect;
        }

        if let Ok(attempts) = std::env::var("SUBLINE_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<u32>() {
                self.max_reconnect_attempts = attempts;
            }
        }

        if let Ok(wait) = std::env::var("SUBLINE_RECONNECT_WAIT_MS") {
            if let Ok(wait) = wait.parse::<u64>() {
                self.reconnect_wait_ms = wait;
            }
        }
    }

    /// Wait between reconnect attempts.
    #[must_use]
    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parsed connection URI.
///
/// `Display` omits credentials so the value is safe to log and to embed in
/// error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerUri {
    scheme: String,
    host: String,
    port: u16,
    user: Option<String>,
    pass: Option<String>,
}

impl fmt::Debug for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerUri")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

impl ServerUri {
    /// Parse `scheme://[user[:pass]@]host[:port][/...]`.
    ///
    /// Anything after the authority (path, query) is ignored. The port
    /// defaults to [`DEFAULT_PORT`].
    pub fn parse(uri: &str) -> Result<Self, ClientError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| ClientError::InvalidUri(format!("missing scheme in {uri:?}")))?;
        if scheme.is_empty() {
            return Err(ClientError::InvalidUri(format!("missing scheme in {uri:?}")));
        }

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, authority),
        };

        let (user, pass) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        let (host, port) = split_host_port(hostport)
            .ok_or_else(|| ClientError::InvalidUri(format!("invalid host or port in {uri:?}")))?;
        if host.is_empty() {
            return Err(ClientError::InvalidUri(format!("missing host in {uri:?}")));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            user,
            pass,
        })
    }

    /// URI scheme as written.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host name or address (IPv6 without brackets).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// User name from the URI, if present.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Password from the URI, if present.
    #[must_use]
    pub fn pass(&self) -> Option<&str> {
        self.pass.as_deref()
    }

    /// `host:port` string suitable for address resolution.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Split `host[:port]` or `[v6][:port]`.
fn split_host_port(hostport: &str) -> Option<(&str, u16)> {
    if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']')?;
        return match after.strip_prefix(':') {
            Some(port) => Some((host, port.parse().ok()?)),
            None if after.is_empty() => Some((host, DEFAULT_PORT)),
            None => None,
        };
    }

    match hostport.rsplit_once(':') {
        Some((host, port)) => Some((host, port.parse().ok()?)),
        None => Some((hostport, DEFAULT_PORT)),
    }
}
