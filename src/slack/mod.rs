//! Slack remote API: wire model, Web API client and RTM event stream.

pub mod api;
pub mod client;
pub mod events;
pub mod rtm;
pub mod types;

pub use api::{ApiFactory, RtmCommand, RtmConnection, SlackApi};
pub use client::{SlackClient, SlackClientFactory};
pub use events::SlackEvent;
