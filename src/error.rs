//! Client error type.
//!
//! Every asynchronous failure reaches the application through the single
//! error event ([`crate::Client::on_error`]) as a [`ClientError`]. Only
//! [`crate::Client::start`] returns one directly.

use thiserror::Error;

/// Errors reported by the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with `-ERR`.
    #[error("Server error: {0}")]
    Protocol(String),

    /// The server sent a control line the client does not recognize.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The connection was lost after a successful connect and could not be
    /// re-established.
    #[error("Client disconnected from server on {uri}.")]
    Disconnected {
        /// Server the client was attached to.
        uri: String,
    },

    /// No connection was ever established.
    #[error("Could not connect to server on {uri}")]
    CouldNotConnect {
        /// Server the client tried to reach.
        uri: String,
    },

    /// The connection URI could not be parsed.
    #[error("Invalid server URI: {0}")]
    InvalidUri(String),

    /// `start` was called on a client that is already running.
    #[error("Client already started")]
    AlreadyStarted,

    /// Socket-level failure while establishing the connection.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// True for errors raised by the server or by unparseable server output.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::UnknownProtocol(_))
    }

    /// True for errors describing the loss or absence of the connection.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::CouldNotConnect { .. } | Self::Io(_)
        )
    }

    /// Copy of this error suitable for handing to several observers.
    ///
    /// `std::io::Error` is not `Clone`; its kind and message are preserved.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Protocol(msg) => Self::Protocol(msg.clone()),
            Self::UnknownProtocol(line) => Self::UnknownProtocol(line.clone()),
            Self::Disconnected { uri } => Self::Disconnected { uri: uri.clone() },
            Self::CouldNotConnect { uri } => Self::CouldNotConnect { uri: uri.clone() },
            Self::InvalidUri(msg) => Self::InvalidUri(msg.clone()),
            Self::AlreadyStarted => Self::AlreadyStarted,
            Self::Io(err) => Self::Io(std::io::Error::new(err.kind(), err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_messages_name_the_server() {
        let lost = ClientError::Disconnected {
            uri: "nats://localhost:4222".to_string(),
        };
        assert_eq!(
            lost.to_string(),
            "Client disconnected from server on nats://localhost:4222."
        );

        let never = ClientError::CouldNotConnect {
            uri: "nats://localhost:4222".to_string(),
        };
        assert_eq!(
            never.to_string(),
            "Could not connect to server on nats://localhost:4222"
        );
    }

    #[test]
    fn test_classification() {
        assert!(ClientError::Protocol("x".into()).is_protocol());
        assert!(ClientError::UnknownProtocol("x".into()).is_protocol());
        assert!(!ClientError::AlreadyStarted.is_protocol());
        assert!(ClientError::CouldNotConnect { uri: String::new() }.is_connection());
        assert!(!ClientError::Protocol("x".into()).is_connection());
    }

    #[test]
    fn test_duplicate_keeps_io_kind() {
        let err = ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        match err.duplicate() {
            ClientError::Io(copy) => {
                assert_eq!(copy.kind(), std::io::ErrorKind::ConnectionRefused);
                assert!(copy.to_string().contains("refused"));
            }
            other => panic!("unexpected copy: {other:?}"),
        }
    }
}
