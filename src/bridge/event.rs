//! Normalized remote events.
//!
//! Every chat-relevant Slack event becomes one [`RemoteEvent`]. The envelope
//! ([`EventMeta`]) is shared; what each variant offers beyond that is exposed
//! through the per-kind capability traits below, so consumers can handle
//! "anything with a target message" or "anything with a timestamp" without
//! matching on every variant.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::Span;

use crate::msgconv::ConvertedMessage;
use crate::slack::events::MessageEvent as RawMessageEvent;
use crate::slack::types::Message;
use crate::slackid::{EmojiId, MessageId};

use super::types::{ChatInfoChange, EventSender, PortalKey};

/// How long a typing notification stays active without a refresh.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEventKind {
    Message,
    Edit,
    MessageRemove,
    Reaction,
    ReactionRemove,
    Typing,
    ReadReceipt,
    ChatInfoChange,
}

impl fmt::Display for RemoteEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Message => "message",
            Self::Edit => "edit",
            Self::MessageRemove => "message_remove",
            Self::Reaction => "reaction",
            Self::ReactionRemove => "reaction_remove",
            Self::Typing => "typing",
            Self::ReadReceipt => "read_receipt",
            Self::ChatInfoChange => "chat_info_change",
        };
        f.write_str(name)
    }
}

/// Extra log fields of an event; the span is only built when asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    pub message_ts: Option<String>,
    pub message_sender: Option<String>,
}

impl LogContext {
    pub fn span(&self) -> Span {
        tracing::debug_span!(
            "remote_event",
            message_ts = self.message_ts.as_deref(),
            message_sender = self.message_sender.as_deref(),
        )
    }
}

/// Envelope shared by all normalized events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMeta {
    pub kind: RemoteEventKind,
    pub portal_key: PortalKey,
    pub sender: EventSender,
    pub timestamp: Option<DateTime<Utc>>,
    pub id: Option<MessageId>,
    pub create_portal: bool,
    pub log_context: LogContext,
}

// ============================================================================
// Capability traits
// ============================================================================

pub trait RemoteEventMeta {
    fn meta(&self) -> &EventMeta;

    fn kind(&self) -> RemoteEventKind {
        self.meta().kind
    }

    fn portal_key(&self) -> &PortalKey {
        &self.meta().portal_key
    }

    fn sender(&self) -> &EventSender {
        &self.meta().sender
    }

    /// Remote timestamp, or now when the event carried none.
    fn timestamp(&self) -> DateTime<Utc> {
        self.meta().timestamp.unwrap_or_else(Utc::now)
    }

    fn id(&self) -> Option<&MessageId> {
        self.meta().id.as_ref()
    }

    fn should_create_portal(&self) -> bool {
        self.meta().create_portal
    }
}

pub trait MessageEvent: RemoteEventMeta {
    fn converted_message(&self) -> Option<&ConvertedMessage>;
}

pub trait EditEvent: RemoteEventMeta {
    fn target_message(&self) -> Option<&MessageId>;
    fn previous_message(&self) -> Option<&Message>;
    fn new_message(&self) -> Option<&Message>;
    /// Converted replacement content. Edits are not converted yet, so this
    /// is always `None` and consumers keep the old content.
    fn converted_edit(&self) -> Option<&ConvertedMessage>;
}

pub trait RemoveEvent: RemoteEventMeta {
    fn target_message(&self) -> Option<&MessageId>;
}

pub trait ReactionEvent: RemoteEventMeta {
    fn target_message(&self) -> &MessageId;
    /// Visible emoji and its identifier.
    fn reaction_emoji(&self) -> (&str, &EmojiId);
    fn removed_emoji_id(&self) -> &EmojiId;
    fn extra_content(&self) -> &Value;
}

pub trait ReceiptEvent: RemoteEventMeta {
    fn last_receipt_target(&self) -> Option<&MessageId>;
    fn read_up_to(&self) -> Option<DateTime<Utc>>;
}

pub trait TypingEvent: RemoteEventMeta {
    fn typing_timeout(&self) -> Duration {
        TYPING_TIMEOUT
    }
}

pub trait ChatInfoChangeEvent: RemoteEventMeta {
    fn chat_info_change(&self) -> &ChatInfoChange;
}

// ============================================================================
// Event payloads
// ============================================================================

/// A `message` event: new message, edit or removal depending on the kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SlackMessage {
    pub meta: EventMeta,
    pub data: RawMessageEvent,
    pub converted: Option<ConvertedMessage>,
}

impl RemoteEventMeta for SlackMessage {
    fn meta(&self) -> &EventMeta {
        &self.meta
    }
}

impl MessageEvent for SlackMessage {
    fn converted_message(&self) -> Option<&ConvertedMessage> {
        self.converted.as_ref()
    }
}

impl EditEvent for SlackMessage {
    fn target_message(&self) -> Option<&MessageId> {
        self.meta.id.as_ref()
    }

    fn previous_message(&self) -> Option<&Message> {
        self.data.previous_message.as_deref()
    }

    fn new_message(&self) -> Option<&Message> {
        self.data.message.as_deref()
    }

    fn converted_edit(&self) -> Option<&ConvertedMessage> {
        None
    }
}

impl RemoveEvent for SlackMessage {
    fn target_message(&self) -> Option<&MessageId> {
        self.meta.id.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlackReaction {
    pub meta: EventMeta,
    pub target_id: MessageId,
    pub emoji_id: EmojiId,
    pub emoji: String,
    pub extra_content: Value,
}

impl RemoteEventMeta for SlackReaction {
    fn meta(&self) -> &EventMeta {
        &self.meta
    }
}

impl ReactionEvent for SlackReaction {
    fn target_message(&self) -> &MessageId {
        &self.target_id
    }

    fn reaction_emoji(&self) -> (&str, &EmojiId) {
        (&self.emoji, &self.emoji_id)
    }

    fn removed_emoji_id(&self) -> &EmojiId {
        &self.emoji_id
    }

    fn extra_content(&self) -> &Value {
        &self.extra_content
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlackTyping {
    pub meta: EventMeta,
}

impl RemoteEventMeta for SlackTyping {
    fn meta(&self) -> &EventMeta {
        &self.meta
    }
}

impl TypingEvent for SlackTyping {}

#[derive(Debug, Clone, PartialEq)]
pub struct SlackReadReceipt {
    pub meta: EventMeta,
}

impl RemoteEventMeta for SlackReadReceipt {
    fn meta(&self) -> &EventMeta {
        &self.meta
    }
}

impl ReceiptEvent for SlackReadReceipt {
    fn last_receipt_target(&self) -> Option<&MessageId> {
        self.meta.id.as_ref()
    }

    fn read_up_to(&self) -> Option<DateTime<Utc>> {
        self.meta.timestamp
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlackChatInfoChange {
    pub meta: EventMeta,
    pub change: ChatInfoChange,
}

impl RemoteEventMeta for SlackChatInfoChange {
    fn meta(&self) -> &EventMeta {
        &self.meta
    }
}

impl ChatInfoChangeEvent for SlackChatInfoChange {
    fn chat_info_change(&self) -> &ChatInfoChange {
        &self.change
    }
}

// ============================================================================
// Tagged union
// ============================================================================

/// A normalized event ready to be applied to a local room.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Message(SlackMessage),
    Edit(SlackMessage),
    Remove(SlackMessage),
    Reaction(SlackReaction),
    ReactionRemove(SlackReaction),
    Typing(SlackTyping),
    ReadReceipt(SlackReadReceipt),
    ChatInfoChange(SlackChatInfoChange),
}

impl RemoteEventMeta for RemoteEvent {
    fn meta(&self) -> &EventMeta {
        match self {
            Self::Message(e) | Self::Edit(e) | Self::Remove(e) => &e.meta,
            Self::Reaction(e) | Self::ReactionRemove(e) => &e.meta,
            Self::Typing(e) => &e.meta,
            Self::ReadReceipt(e) => &e.meta,
            Self::ChatInfoChange(e) => &e.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slackid::{make_message_id, make_portal_id};

    fn meta(kind: RemoteEventKind) -> EventMeta {
        EventMeta {
            kind,
            portal_key: PortalKey::shared(make_portal_id("T1", "C1")),
            sender: EventSender::default(),
            timestamp: None,
            id: Some(make_message_id("T1", "C1", "1.000000")),
            create_portal: false,
            log_context: LogContext::default(),
        }
    }

    #[test]
    fn test_missing_timestamp_defaults_to_now() {
        let before = Utc::now();
        let typing = SlackTyping {
            meta: meta(RemoteEventKind::Typing),
        };
        let ts = typing.timestamp();
        assert!(ts >= before && ts <= Utc::now());
        assert_eq!(typing.typing_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_edit_has_no_converted_payload() {
        let edit = SlackMessage {
            meta: meta(RemoteEventKind::Edit),
            data: RawMessageEvent::default(),
            converted: None,
        };
        assert!(edit.converted_edit().is_none());
        assert_eq!(
            EditEvent::target_message(&edit),
            Some(&make_message_id("T1", "C1", "1.000000"))
        );
    }

    #[test]
    fn test_tagged_union_exposes_envelope() {
        let event = RemoteEvent::ReadReceipt(SlackReadReceipt {
            meta: meta(RemoteEventKind::ReadReceipt),
        });
        assert_eq!(event.kind(), RemoteEventKind::ReadReceipt);
        assert_eq!(event.portal_key().id, make_portal_id("T1", "C1"));
        assert_eq!(event.kind().to_string(), "read_receipt");
    }
}
