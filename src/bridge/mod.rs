//! Remote-session adapter.
//!
//! ## Module Structure
//!
//! - `session`: per-login lifecycle and the serial event loop
//! - `translate`, `meta`, `chatinfo`: Slack events into [`RemoteEvent`]s
//! - `dispatch`, `startchat`: local actions into Slack calls
//! - `sync`: channel, emoji and team-room reconciliation
//! - `connector`, `pool`: shared collaborators and one session per login
//! - `directory`, `memory`: storage seams and their in-memory versions
//! - `channels`, `status`: what sessions publish to the rest of the bridge

pub mod channels;
pub mod chatinfo;
pub mod connector;
pub mod directory;
pub mod dispatch;
pub mod event;
pub mod memory;
pub mod meta;
pub mod pool;
pub mod session;
pub mod startchat;
pub mod status;
pub mod sync;
pub mod translate;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use channels::{ChannelBundle, ConsumerChannels, QueuedRemoteEvent, SessionChannels, StateUpdate};
pub use connector::{login_from_account, BridgeConnector, ConnectorContext};
pub use dispatch::{send_to_slack, Delivery, OutboundMessage};
pub use event::{RemoteEvent, RemoteEventKind, RemoteEventMeta};
pub use pool::SessionPool;
pub use session::{SessionState, SlackSession};
pub use status::{BridgeState, StateEvent};
