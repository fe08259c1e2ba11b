//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::Config;

const TOKEN_PREFIXES: [&str; 4] = ["xoxc-", "xoxp-", "xoxs-", "xoxb-"];

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if !config.slack.api_url.starts_with("http://") && !config.slack.api_url.starts_with("https://") {
        errors.push(format!(
            "slack.api_url must be an http(s) URL (got '{}')",
            config.slack.api_url
        ));
    }
    if config.slack.request_timeout_secs == 0 {
        errors.push("slack.request_timeout_secs must be non-zero".to_string());
    }
    if config.bridge.backfill.conversation_count == 0 {
        errors.push("bridge.backfill.conversation_count must be non-zero".to_string());
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
        errors.push(format!(
            "logging.level '{}' is invalid (use: trace, debug, info, warn, error)",
            config.logging.level
        ));
    }

    for (i, account) in config.accounts.iter().enumerate() {
        if account.team_id.is_empty() {
            errors.push(format!("accounts[{}].team_id is required", i));
        }
        if account.user_id.is_empty() {
            errors.push(format!("accounts[{}].user_id is required", i));
        }
        if account.team_id.contains(':') || account.user_id.contains(':') {
            errors.push(format!("accounts[{}] ids must not contain ':'", i));
        }
        if account.token.is_empty() {
            errors.push(format!("accounts[{}].token is required", i));
        } else if !TOKEN_PREFIXES.iter().any(|p| account.token.starts_with(p)) {
            errors.push(format!(
                "accounts[{}].token does not look like a Slack token (expected xoxc-/xoxp-/xoxs-/xoxb-)",
                i
            ));
        }
        if account.token.starts_with("xoxc-") && account.cookie_token.is_none() {
            errors.push(format!(
                "accounts[{}].cookie_token is required for xoxc- tokens",
                i
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
