//! Error types for the ARI client, event stream and call flows

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AriResult<T> = Result<T, AriError>;

/// Everything that can go wrong talking to the control plane.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AriError {
    /// Connectivity failures on every attempt of a command.
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    TransportExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// The control plane answered with a non-success status. Never retried.
    #[error("{operation} rejected with HTTP {status}: {body}")]
    RemoteRejected {
        operation: String,
        status: u16,
        body: String,
    },

    /// A second digit wait was started for a channel that is already waiting.
    #[error("digit wait already pending for channel {channel_id}")]
    DuplicateWait { channel_id: String },

    /// Caller-supplied value that cannot be put on the wire.
    #[error("invalid {field}: {message}")]
    InvalidArgument { field: &'static str, message: String },

    /// A payload from the control plane did not have the expected shape.
    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    /// Startup configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Event stream handshake or framing failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl AriError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        AriError::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn decode(what: &'static str, message: impl Into<String>) -> Self {
        AriError::Decode {
            what,
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        AriError::Config(message.into())
    }

    /// `true` for the two command-level failures a call flow abandons on.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            AriError::TransportExhausted { .. } | AriError::RemoteRejected { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AriError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AriError::WebSocket(err.to_string())
    }
}
