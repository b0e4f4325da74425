//! Error types for the synthesis client

use thiserror::Error;

/// Synthesis errors
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure: open timeout, abrupt close, handshake error
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Well-formed frame whose contents violate the protocol contract
    #[error("unexpected response from service: {0}")]
    UnexpectedResponse(String),

    /// Frame with a recognized structure but an unrecognized path or type
    #[error("unrecognized response from service: {0}")]
    UnknownResponse(String),

    /// The turn ended without any audio frame
    #[error("no audio was received; verify that the voice and prosody parameters are valid")]
    NoAudioReceived,

    /// Caller-supplied parameter failed validation
    #[error("invalid {field}: {message}")]
    Config { field: &'static str, message: String },

    /// Authentication failure (403-equivalent)
    #[error("authentication failed: {reason}")]
    Drm {
        reason: String,
        /// `Date` header from the rejecting response, when present
        server_date: Option<String>,
    },
}

impl Error {
    /// Whether the reconnect policy may retry after this error.
    ///
    /// Only transport-level failures are transient; authentication and
    /// protocol errors have their own handling paths.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::WebSocket(_))
    }

    /// Whether this is an authentication failure eligible for clock-skew
    /// recovery.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Drm { .. })
    }

    pub(crate) fn config(field: &'static str, message: impl Into<String>) -> Self {
        Error::Config {
            field,
            message: message.into(),
        }
    }
}

/// Result type for the synthesis client
pub type Result<T> = std::result::Result<T, Error>;
