//! Slack remote-session adapter.
//!
//! Keeps one live session per bridged Slack account, turns the RTM event
//! stream into normalized bridge events and maps local room actions back
//! onto Slack Web API calls.

pub mod bridge;
pub mod common;
pub mod config;
pub mod msgconv;
pub mod slack;
pub mod slackid;
