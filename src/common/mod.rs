//! Common utilities and types shared across the application.

pub mod error;
pub mod reconnect;

pub use error::{BridgeError, BridgeResult, ConfigError, SlackApiError, SlackResult};
pub use reconnect::ReconnectConfig;
