//! Stable identifiers for Slack entities.
//!
//! Every Slack object the bridge talks about (team, channel, user, message,
//! emoji) is addressed elsewhere through an opaque string built here. The
//! format is a kind tag followed by `:`-separated fields:
//!
//! - `team:<TEAM>`
//! - `portal:<TEAM>:<CHANNEL>`
//! - `user:<TEAM>:<USER>`
//! - `login:<TEAM>:<USER>`
//! - `msg:<TEAM>:<CHANNEL>:<TS>`
//! - `emoji:<TEAM>:<NAME>`
//!
//! Slack ids are uppercase alphanumerics and never contain `:`, so the
//! encoding is injective. Message timestamps are kept as the original
//! fixed-point string and are never routed through a float.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

const TEAM_PORTAL_TAG: &str = "team";
const PORTAL_TAG: &str = "portal";
const USER_TAG: &str = "user";
const LOGIN_TAG: &str = "login";
const MESSAGE_TAG: &str = "msg";
const EMOJI_TAG: &str = "emoji";

const SEPARATOR: char = ':';

/// Decoding failure for a bridge identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("malformed {kind} identifier '{id}'")]
    MalformedIdentifier { kind: &'static str, id: String },
}

impl IdError {
    fn malformed(kind: &'static str, id: &str) -> Self {
        Self::MalformedIdentifier {
            kind,
            id: id.to_string(),
        }
    }
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Wrap an already-encoded identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a bridged room (team space or channel).
    PortalId
);
string_id!(
    /// Identifier of a remote user (ghost).
    UserId
);
string_id!(
    /// Identifier of a bridged account.
    UserLoginId
);
string_id!(
    /// Identifier of a single remote message.
    MessageId
);
string_id!(
    /// Identifier of a reaction emoji.
    EmojiId
);

// ============================================================================
// Encoders
// ============================================================================

/// Portal id of the team space room.
pub fn make_team_portal_id(team_id: &str) -> PortalId {
    PortalId(format!("{TEAM_PORTAL_TAG}{SEPARATOR}{team_id}"))
}

/// Portal id of a channel, DM or group DM.
pub fn make_portal_id(team_id: &str, channel_id: &str) -> PortalId {
    PortalId(format!("{PORTAL_TAG}{SEPARATOR}{team_id}{SEPARATOR}{channel_id}"))
}

pub fn make_user_id(team_id: &str, user_id: &str) -> UserId {
    UserId(format!("{USER_TAG}{SEPARATOR}{team_id}{SEPARATOR}{user_id}"))
}

pub fn make_user_login_id(team_id: &str, user_id: &str) -> UserLoginId {
    UserLoginId(format!("{LOGIN_TAG}{SEPARATOR}{team_id}{SEPARATOR}{user_id}"))
}

pub fn make_message_id(team_id: &str, channel_id: &str, timestamp: &str) -> MessageId {
    MessageId(format!(
        "{MESSAGE_TAG}{SEPARATOR}{team_id}{SEPARATOR}{channel_id}{SEPARATOR}{timestamp}"
    ))
}

pub fn make_emoji_id(team_id: &str, name: &str) -> EmojiId {
    EmojiId(format!("{EMOJI_TAG}{SEPARATOR}{team_id}{SEPARATOR}{name}"))
}

// ============================================================================
// Decoders
// ============================================================================

/// Split `id` into exactly `count` fields after the expected kind tag.
///
/// The last field takes the remainder when `greedy_tail` is set.
fn split_fields<'a>(
    id: &'a str,
    tag: &str,
    count: usize,
    greedy_tail: bool,
) -> Option<Vec<&'a str>> {
    let rest = id.strip_prefix(tag)?.strip_prefix(SEPARATOR)?;
    let fields: Vec<&str> = if greedy_tail {
        rest.splitn(count, SEPARATOR).collect()
    } else {
        rest.split(SEPARATOR).collect()
    };
    if fields.len() != count || fields.iter().any(|f| f.is_empty()) {
        return None;
    }
    Some(fields)
}

pub fn parse_team_portal_id(id: &PortalId) -> Result<String, IdError> {
    split_fields(id.as_str(), TEAM_PORTAL_TAG, 1, false)
        .map(|f| f[0].to_string())
        .ok_or_else(|| IdError::malformed("team portal", id.as_str()))
}

/// Returns `(team_id, channel_id)`.
pub fn parse_portal_id(id: &PortalId) -> Result<(String, String), IdError> {
    split_fields(id.as_str(), PORTAL_TAG, 2, false)
        .map(|f| (f[0].to_string(), f[1].to_string()))
        .ok_or_else(|| IdError::malformed("portal", id.as_str()))
}

/// Returns `(team_id, user_id)`.
pub fn parse_user_id(id: &UserId) -> Result<(String, String), IdError> {
    split_fields(id.as_str(), USER_TAG, 2, false)
        .map(|f| (f[0].to_string(), f[1].to_string()))
        .ok_or_else(|| IdError::malformed("user", id.as_str()))
}

/// Returns `(team_id, user_id)`.
pub fn parse_user_login_id(id: &UserLoginId) -> Result<(String, String), IdError> {
    split_fields(id.as_str(), LOGIN_TAG, 2, false)
        .map(|f| (f[0].to_string(), f[1].to_string()))
        .ok_or_else(|| IdError::malformed("user login", id.as_str()))
}

/// Returns `(team_id, channel_id, timestamp)`.
pub fn parse_message_id(id: &MessageId) -> Result<(String, String, String), IdError> {
    split_fields(id.as_str(), MESSAGE_TAG, 3, false)
        .filter(|f| is_slack_timestamp(f[2]))
        .map(|f| (f[0].to_string(), f[1].to_string(), f[2].to_string()))
        .ok_or_else(|| IdError::malformed("message", id.as_str()))
}

/// Returns `(team_id, emoji_name)`.
pub fn parse_emoji_id(id: &EmojiId) -> Result<(String, String), IdError> {
    split_fields(id.as_str(), EMOJI_TAG, 2, true)
        .map(|f| (f[0].to_string(), f[1].to_string()))
        .ok_or_else(|| IdError::malformed("emoji", id.as_str()))
}

/// Map a ghost id to the login id of the same Slack account.
pub fn user_id_to_login_id(id: &UserId) -> Result<UserLoginId, IdError> {
    let (team_id, user_id) = parse_user_id(id)?;
    Ok(make_user_login_id(&team_id, &user_id))
}

// ============================================================================
// Timestamps
// ============================================================================

/// Whether `ts` has the `seconds.fraction` shape Slack uses for message ids.
pub fn is_slack_timestamp(ts: &str) -> bool {
    match ts.split_once('.') {
        Some((secs, frac)) => {
            !secs.is_empty()
                && !frac.is_empty()
                && secs.bytes().all(|b| b.is_ascii_digit())
                && frac.bytes().all(|b| b.is_ascii_digit())
        }
        None => !ts.is_empty() && ts.bytes().all(|b| b.is_ascii_digit()),
    }
}

/// Parse a Slack timestamp (`"1712345678.123456"`) with microsecond precision.
///
/// Digits beyond the sixth fractional place are truncated.
pub fn parse_slack_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if !is_slack_timestamp(ts) {
        return None;
    }
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let mut micros = String::with_capacity(6);
    micros.extend(frac.chars().take(6));
    while micros.len() < 6 {
        micros.push('0');
    }
    let micros: u32 = micros.parse().ok()?;
    Utc.timestamp_opt(secs, micros * 1_000).single()
}

/// Sortable form of a Slack timestamp; malformed or empty values sort first.
pub fn timestamp_sort_key(ts: &str) -> (u64, u64) {
    if !is_slack_timestamp(ts) {
        return (0, 0);
    }
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
    let mut padded: String = frac.chars().take(9).collect();
    while padded.len() < 9 {
        padded.push('0');
    }
    (secs.parse().unwrap_or(0), padded.parse().unwrap_or(0))
}
