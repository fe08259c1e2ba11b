//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `SLACKBRIDGE_API_URL` - Slack Web API base URL
//! - `SLACKBRIDGE_LOG_LEVEL` - Default log level
//! - `SLACKBRIDGE_TOKEN` - Token of the first configured account
//! - `SLACKBRIDGE_COOKIE_TOKEN` - Cookie token of the first configured account

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "SLACKBRIDGE";

/// Apply environment variable overrides to a config.
///
/// Secrets can be kept out of the config file this way; token overrides
/// apply to the first account only.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(url) = env::var(format!("{}_API_URL", ENV_PREFIX)) {
        config.slack.api_url = url;
    }
    if let Ok(level) = env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
        config.logging.level = level;
    }

    if let Some(account) = config.accounts.first_mut() {
        if let Ok(token) = env::var(format!("{}_TOKEN", ENV_PREFIX)) {
            account.token = token;
        }
        if let Ok(cookie) = env::var(format!("{}_COOKIE_TOKEN", ENV_PREFIX)) {
            account.cookie_token = Some(cookie);
        }
    }

    config
}

/// Check if any secret environment variables are set but empty.
///
/// Returns a list of variable names that are set but empty.
pub fn check_empty_env_vars() -> Vec<String> {
    let vars = [
        format!("{}_TOKEN", ENV_PREFIX),
        format!("{}_COOKIE_TOKEN", ENV_PREFIX),
    ];

    vars.into_iter()
        .filter(|var| env::var(var).map(|v| v.is_empty()).unwrap_or(false))
        .collect()
}

/// Get the config file path from environment or use default.
///
/// Checks `SLACKBRIDGE_CONFIG` environment variable, otherwise returns "slackbridge.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "slackbridge.conf".to_string())
}
