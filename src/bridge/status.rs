//! Per-login connectivity state reported to the rest of the bridge.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

pub const ERR_INVALID_AUTH: &str = "slack-invalid-auth";
pub const ERR_USER_REMOVED: &str = "slack-user-removed-from-team";
pub const ERR_ID_MISMATCH: &str = "slack-id-mismatch";
pub const ERR_UNKNOWN_FETCH: &str = "slack-unknown-fetch-error";

static HUMAN_ERRORS: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

/// Install the human-readable messages for the adapter's error codes.
///
/// Idempotent; later calls keep the first table.
pub fn register_human_errors() {
    HUMAN_ERRORS.get_or_init(|| {
        HashMap::from([
            (ERR_INVALID_AUTH, "Invalid credentials, please log in again"),
            (ERR_USER_REMOVED, "You were removed from the Slack workspace"),
            (ERR_ID_MISMATCH, "Unexpected internal error: got different user ID"),
        ])
    });
}

/// Human-readable text for an error code, if one is registered.
pub fn human_error(code: &str) -> Option<&'static str> {
    HUMAN_ERRORS.get().and_then(|table| table.get(code).copied())
}

/// Error code for a credential failure reported by the Web API.
pub fn credential_error_code(slack_code: &str) -> String {
    format!("slack-{}", slack_code.replace('_', "-"))
}

/// Error code for an RTM error frame.
pub fn rtm_error_code(code: i64) -> String {
    format!("slack-rtm-error-{}", code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Connecting,
    Connected,
    BadCredentials,
    UnknownError,
    LoggedOut,
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::BadCredentials => "BAD_CREDENTIALS",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::LoggedOut => "LOGGED_OUT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeState {
    pub state_event: StateEvent,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl BridgeState {
    pub fn new(state_event: StateEvent) -> Self {
        Self {
            state_event,
            error: None,
            message: None,
        }
    }

    pub fn with_error(mut self, code: impl Into<String>) -> Self {
        self.error = Some(code.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Explicit message, or the registered text for the error code.
    pub fn display_message(&self) -> Option<String> {
        self.message.clone().or_else(|| {
            self.error
                .as_deref()
                .and_then(human_error)
                .map(str::to_string)
        })
    }
}
