//! Bridge channel management.
//!
//! Sessions publish normalized events and connectivity states over unbounded
//! channels; whoever applies them to local rooms holds the receivers.

use tokio::sync::mpsc;
use tracing::warn;

use crate::slackid::UserLoginId;

use super::event::RemoteEvent;
use super::status::BridgeState;

/// A normalized event tagged with the login that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRemoteEvent {
    pub login_id: UserLoginId,
    pub event: RemoteEvent,
}

/// A connectivity state change of one login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub login_id: UserLoginId,
    pub state: BridgeState,
}

/// Senders cloned into every session.
#[derive(Clone)]
pub struct SessionChannels {
    /// Sender for normalized remote events.
    pub event_tx: mpsc::UnboundedSender<QueuedRemoteEvent>,
    /// Sender for bridge state updates.
    pub state_tx: mpsc::UnboundedSender<StateUpdate>,
}

impl SessionChannels {
    pub fn queue_event(&self, login_id: &UserLoginId, event: RemoteEvent) {
        let queued = QueuedRemoteEvent {
            login_id: login_id.clone(),
            event,
        };
        if let Err(e) = self.event_tx.send(queued) {
            warn!("Failed to queue remote event: {}", e);
        }
    }

    pub fn send_state(&self, login_id: &UserLoginId, state: BridgeState) {
        let update = StateUpdate {
            login_id: login_id.clone(),
            state,
        };
        if let Err(e) = self.state_tx.send(update) {
            warn!("Failed to send bridge state: {}", e);
        }
    }
}

/// Receivers for the consumer side.
pub struct ConsumerChannels {
    /// Receiver for normalized remote events.
    pub event_rx: mpsc::UnboundedReceiver<QueuedRemoteEvent>,
    /// Receiver for bridge state updates.
    pub state_rx: mpsc::UnboundedReceiver<StateUpdate>,
}

/// Bundle of all channels created by the bridge.
pub struct ChannelBundle {
    pub sessions: SessionChannels,
    pub consumer: ConsumerChannels,
}

impl ChannelBundle {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::unbounded_channel();

        Self {
            sessions: SessionChannels { event_tx, state_tx },
            consumer: ConsumerChannels { event_rx, state_rx },
        }
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new()
    }
}
