//! Error types for the application.

use thiserror::Error;

use crate::slackid::IdError;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    IoError { path: String, message: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Errors returned by the Slack Web API client and the RTM stream.
#[derive(Debug, Error)]
pub enum SlackApiError {
    /// Slack answered with `"ok": false`.
    #[error("Slack API error: {code}")]
    Api { code: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode Slack response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Event stream is not connected")]
    StreamClosed,
}

impl SlackApiError {
    pub fn api(code: impl Into<String>) -> Self {
        Self::Api { code: code.into() }
    }

    /// The Slack error code, if this is an API-level error.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code } => Some(code),
            _ => None,
        }
    }

    /// Whether the error means the stored credentials can never work again.
    pub fn is_credential_error(&self) -> bool {
        matches!(self.code(), Some("invalid_auth" | "user_removed_from_team"))
    }
}

/// Errors surfaced by the remote-session adapter.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The session has no authenticated client.
    #[error("Not logged in")]
    NotLoggedIn,

    /// A local or remote identifier could not be decoded or resolved.
    #[error("Invalid addressing: {0}")]
    InvalidAddressing(String),

    /// No room is known for the channel and no descriptor was supplied.
    #[error("Unknown channel {channel_id}")]
    UnknownChannel { channel_id: String },

    /// The converted outbound message carried nothing to send.
    #[error("No message or attachment to send")]
    NoPayload,

    #[error("Remote API failure: {0}")]
    RemoteApi(#[from] SlackApiError),

    /// The event stream reported a different account than this session.
    #[error("Identity mismatch: expected {expected_team}/{expected_user}, got {actual_team}/{actual_user}")]
    IdentityMismatch {
        expected_team: String,
        expected_user: String,
        actual_team: String,
        actual_user: String,
    },

    #[error("Invalid credentials: {code}")]
    InvalidCredentials { code: String },

    /// A disconnect arrived while the session was still connecting.
    #[error("Disconnected while connecting")]
    ConnectAborted,

    #[error("Unknown emoji '{0}'")]
    UnknownEmoji(String),

    #[error("Message conversion failed: {0}")]
    Conversion(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<IdError> for BridgeError {
    fn from(error: IdError) -> Self {
        Self::InvalidAddressing(error.to_string())
    }
}

/// Result type alias for adapter operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type alias for Slack API calls.
pub type SlackResult<T> = std::result::Result<T, SlackApiError>;
