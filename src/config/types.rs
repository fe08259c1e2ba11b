//! Configuration type definitions.

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Accounts restored at startup.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Slack Web API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    /// Base URL of the Web API, without trailing slash.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Per-request timeout for Web API calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Behavior switches of the adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Render custom emoji reactions as images instead of `:shortcode:` text.
    #[serde(default = "default_true")]
    pub custom_emoji_reactions: bool,
    #[serde(default)]
    pub backfill: BackfillConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            custom_emoji_reactions: true,
            backfill: BackfillConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Channel sync limits.
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    /// Upper bound on conversations fetched during channel sync.
    #[serde(default = "default_conversation_count")]
    pub conversation_count: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            conversation_count: default_conversation_count(),
        }
    }
}

fn default_conversation_count() -> usize {
    50
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level directive (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A bridged Slack account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub team_id: String,
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    pub token: String,
    #[serde(default)]
    pub cookie_token: Option<String>,
}
