//! RTM event model.
//!
//! Frames coming off the RTM websocket are JSON objects tagged by `type`.
//! [`SlackEvent`] covers the ones the bridge reacts to, the ones it knowingly
//! ignores, and the lifecycle notifications produced by the connection
//! manager itself (never sent by Slack).

use serde::Deserialize;
use serde_json::Value;

use super::types::{Channel, Message};

/// An event delivered to a session's consume loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    // ========================================================================
    // Lifecycle (produced by the connection manager)
    // ========================================================================
    /// A connection attempt is starting.
    #[serde(skip)]
    Connecting { attempt: u32, connection_count: u32 },

    /// `rtm.connect` succeeded; carries the identity Slack reported.
    #[serde(skip)]
    Connected { team_id: String, user_id: String },

    /// `rtm.connect` rejected the credentials. The manager stops afterwards.
    #[serde(skip)]
    InvalidAuth,

    /// A frame with a `type` the bridge does not model.
    #[serde(skip)]
    Unrecognized { event_type: String, payload: Value },

    // ========================================================================
    // Wire events
    // ========================================================================
    Hello {},

    /// Server-side error frame.
    Error { error: RtmErrorInfo },

    Message(MessageEvent),

    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),

    UserTyping { channel: String, user: String },

    ChannelMarked(MarkedEvent),
    ImMarked(MarkedEvent),
    GroupMarked(MarkedEvent),

    /// The logged-in user joined a channel; carries the full descriptor.
    ChannelJoined { channel: Channel },
    GroupJoined { channel: Channel },

    ChannelLeft(LeftEvent),
    GroupLeft(LeftEvent),

    MemberJoinedChannel(MemberEvent),
    MemberLeftChannel(MemberEvent),

    ChannelUpdated {
        channel: String,
        #[serde(default)]
        event_ts: Option<String>,
    },

    // Handled elsewhere or irrelevant to room state.
    EmojiChanged {},
    FileCreated {},
    FileShared {},
    FileUnshared {},
    FileChange {},
    FileDeleted {},
    FilePublic {},
    DesktopNotification {},
    ReconnectUrl {},
    Pong {},
}

impl SlackEvent {
    /// Name used in logs and spans.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::InvalidAuth => "invalid_auth",
            Self::Unrecognized { event_type, .. } => event_type,
            Self::Hello {} => "hello",
            Self::Error { .. } => "error",
            Self::Message(_) => "message",
            Self::ReactionAdded(_) => "reaction_added",
            Self::ReactionRemoved(_) => "reaction_removed",
            Self::UserTyping { .. } => "user_typing",
            Self::ChannelMarked(_) => "channel_marked",
            Self::ImMarked(_) => "im_marked",
            Self::GroupMarked(_) => "group_marked",
            Self::ChannelJoined { .. } => "channel_joined",
            Self::GroupJoined { .. } => "group_joined",
            Self::ChannelLeft(_) => "channel_left",
            Self::GroupLeft(_) => "group_left",
            Self::MemberJoinedChannel(_) => "member_joined_channel",
            Self::MemberLeftChannel(_) => "member_left_channel",
            Self::ChannelUpdated { .. } => "channel_updated",
            Self::EmojiChanged {} => "emoji_changed",
            Self::FileCreated {} => "file_created",
            Self::FileShared {} => "file_shared",
            Self::FileUnshared {} => "file_unshared",
            Self::FileChange {} => "file_change",
            Self::FileDeleted {} => "file_deleted",
            Self::FilePublic {} => "file_public",
            Self::DesktopNotification {} => "desktop_notification",
            Self::ReconnectUrl {} => "reconnect_url",
            Self::Pong {} => "pong",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RtmErrorInfo {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

/// A `message` event of any subtype.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(flatten)]
    pub msg: Message,
    /// New version of an edited message (`message_changed`).
    #[serde(default)]
    pub message: Option<Box<Message>>,
    /// Old version of an edited message (`message_changed`).
    #[serde(default)]
    pub previous_message: Option<Box<Message>>,
    /// Target of a `message_deleted`.
    #[serde(default)]
    pub deleted_ts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReactionEvent {
    pub user: String,
    pub reaction: String,
    #[serde(default)]
    pub item_user: String,
    pub item: ReactionItem,
    #[serde(default)]
    pub event_ts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReactionItem {
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub ts: String,
}

/// Read position moved in a channel, DM or group.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MarkedEvent {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LeftEvent {
    pub channel: String,
    #[serde(default)]
    pub event_ts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MemberEvent {
    pub user: String,
    pub channel: String,
    #[serde(default)]
    pub channel_type: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub event_ts: Option<String>,
}

/// Decode one websocket text frame.
///
/// Returns `None` for frames that carry no event (acknowledgements of our
/// own sends, which have `reply_to` and no `type`). Frames whose `type` is
/// known but whose shape does not match are reported as unrecognized rather
/// than dropped.
pub fn decode_frame(text: &str) -> Result<Option<SlackEvent>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let Some(event_type) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
        return Ok(None);
    };

    match serde_json::from_value::<SlackEvent>(value.clone()) {
        Ok(event) => Ok(Some(event)),
        Err(_) => Ok(Some(SlackEvent::Unrecognized {
            event_type,
            payload: value,
        })),
    }
}
