//! Translation of Slack chat events into normalized remote events.
//!
//! Lifecycle events (connecting, connected, auth failures, stream errors) are
//! handled by the session and never reach this module.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::common::error::BridgeResult;
use crate::msgconv::MessageConverter;
use crate::slack::api::SlackApi;
use crate::slack::events::{MessageEvent as RawMessageEvent, ReactionEvent as RawReaction, SlackEvent};
use crate::slack::types::EmojiValue;
use crate::slackid::{make_emoji_id, make_message_id};

use super::chatinfo::fetch_chat_info;
use super::directory::{EmojiDirectory, PortalDirectory};
use super::event::{
    EventMeta, LogContext, RemoteEvent, RemoteEventKind, SlackChatInfoChange, SlackMessage,
    SlackReaction, SlackReadReceipt, SlackTyping,
};
use super::meta::Identity;
use super::types::{ChatInfo, ChatInfoChange, ChatMember, Membership};

/// Extra-content key carrying the `:shortcode:` of a reaction.
pub const SHORTCODE_KEY: &str = "com.beeper.reaction.shortcode";
/// Extra-content key carrying the Slack reaction name and image reference.
pub const REACTION_INFO_KEY: &str = "slackbridge.reaction";

/// Alias chains longer than this are treated as unknown.
const MAX_ALIAS_DEPTH: usize = 5;

/// Slack's `::skin-tone-N` suffixes.
const SKIN_TONES: [(emojis::SkinTone, &str); 5] = [
    (emojis::SkinTone::Light, "skin-tone-2"),
    (emojis::SkinTone::MediumLight, "skin-tone-3"),
    (emojis::SkinTone::Medium, "skin-tone-4"),
    (emojis::SkinTone::MediumDark, "skin-tone-5"),
    (emojis::SkinTone::Dark, "skin-tone-6"),
];

/// Everything the translator reads; borrowed from the session.
pub struct TranslateContext<'a> {
    pub identity: &'a Identity,
    pub portals: &'a dyn PortalDirectory,
    pub emojis: &'a dyn EmojiDirectory,
    pub client: &'a dyn SlackApi,
    pub converter: &'a dyn MessageConverter,
    pub custom_emoji_reactions: bool,
}

/// Unicode emoji for a Slack shortcode such as `thumbsup` or
/// `wave::skin-tone-3`.
pub fn unicode_for_shortcode(name: &str) -> Option<&'static str> {
    let (base, modifier) = match name.split_once("::") {
        Some((base, modifier)) => (base, Some(modifier)),
        None => (name, None),
    };
    let emoji = emojis::get_by_shortcode(base)?;

    let tone = modifier.and_then(|modifier| {
        SKIN_TONES
            .iter()
            .find(|(_, name)| *name == modifier)
            .map(|(tone, _)| *tone)
    });
    match tone {
        Some(tone) => Some(emoji.with_skin_tone(tone).unwrap_or(emoji).as_str()),
        None => Some(emoji.as_str()),
    }
}

/// Slack reaction name for a unicode emoji, the inverse of
/// [`unicode_for_shortcode`]. A trailing variation selector is ignored.
pub fn shortcode_for_unicode(unicode: &str) -> Option<String> {
    let emoji = emojis::get(unicode).or_else(|| emojis::get(unicode.trim_end_matches('\u{fe0f}')))?;

    let tone = emoji
        .skin_tone()
        .and_then(|tone| SKIN_TONES.iter().find(|(known, _)| *known == tone));
    match tone {
        Some((_, modifier)) => {
            let base = emoji.with_skin_tone(emojis::SkinTone::Default).unwrap_or(emoji);
            Some(format!("{}::{}", base.shortcode()?, modifier))
        }
        None => emoji.shortcode().map(str::to_string),
    }
}

impl TranslateContext<'_> {
    /// Translate one chat event. `Ok(None)` means the event is deliberately
    /// dropped.
    pub async fn wrap_event(&self, event: &SlackEvent) -> BridgeResult<Option<RemoteEvent>> {
        let me = self.identity;
        let portals = self.portals;
        let self_id = Some(me.user_id.as_str());

        let wrapped = match event {
            SlackEvent::Message(message) => return self.wrap_message(message).await,

            SlackEvent::ReactionAdded(reaction) => {
                let meta = self.reaction_meta(RemoteEventKind::Reaction, reaction).await?;
                RemoteEvent::Reaction(self.wrap_reaction(meta, reaction).await?)
            }
            SlackEvent::ReactionRemoved(reaction) => {
                let meta = self.reaction_meta(RemoteEventKind::ReactionRemove, reaction).await?;
                RemoteEvent::ReactionRemove(self.wrap_reaction(meta, reaction).await?)
            }

            SlackEvent::UserTyping { channel, user } => {
                let meta = me
                    .make_event_meta(portals, RemoteEventKind::Typing, channel, None, Some(user), None)
                    .await?;
                RemoteEvent::Typing(SlackTyping { meta })
            }

            SlackEvent::ChannelMarked(marked) | SlackEvent::ImMarked(marked) | SlackEvent::GroupMarked(marked) => {
                let meta = me
                    .make_event_meta(
                        portals,
                        RemoteEventKind::ReadReceipt,
                        &marked.channel,
                        None,
                        self_id,
                        Some(&marked.ts),
                    )
                    .await?;
                RemoteEvent::ReadReceipt(SlackReadReceipt { meta })
            }

            SlackEvent::ChannelJoined { channel } | SlackEvent::GroupJoined { channel } => {
                let mut meta = me
                    .make_event_meta(
                        portals,
                        RemoteEventKind::ChatInfoChange,
                        &channel.id,
                        Some(channel),
                        self_id,
                        None,
                    )
                    .await?;
                meta.create_portal = true;
                member_change(meta, Membership::Join, None)
            }
            SlackEvent::ChannelLeft(left) | SlackEvent::GroupLeft(left) => {
                let meta = me
                    .make_event_meta(
                        portals,
                        RemoteEventKind::ChatInfoChange,
                        &left.channel,
                        None,
                        self_id,
                        left.event_ts.as_deref(),
                    )
                    .await?;
                member_change(meta, Membership::Leave, Some(Membership::Join))
            }
            SlackEvent::MemberJoinedChannel(member) => {
                let meta = me
                    .make_event_meta(
                        portals,
                        RemoteEventKind::ChatInfoChange,
                        &member.channel,
                        None,
                        Some(&member.user),
                        None,
                    )
                    .await?;
                member_change(meta, Membership::Join, None)
            }
            SlackEvent::MemberLeftChannel(member) => {
                let meta = me
                    .make_event_meta(
                        portals,
                        RemoteEventKind::ChatInfoChange,
                        &member.channel,
                        None,
                        Some(&member.user),
                        None,
                    )
                    .await?;
                member_change(meta, Membership::Leave, Some(Membership::Join))
            }

            SlackEvent::ChannelUpdated { channel, event_ts } => {
                let mut meta = me
                    .make_event_meta(
                        portals,
                        RemoteEventKind::ChatInfoChange,
                        channel,
                        None,
                        None,
                        event_ts.as_deref(),
                    )
                    .await?;
                meta.create_portal = true;
                let info = fetch_chat_info(self.client, me, channel).await?;
                RemoteEvent::ChatInfoChange(SlackChatInfoChange {
                    meta,
                    change: ChatInfoChange {
                        chat_info: Some(info),
                        member_changes: Vec::new(),
                    },
                })
            }

            other => {
                debug!("No translation for {} event", other.type_name());
                return Ok(None);
            }
        };

        Ok(Some(wrapped))
    }

    async fn wrap_message(&self, event: &RawMessageEvent) -> BridgeResult<Option<RemoteEvent>> {
        let me = self.identity;
        let msg = &event.msg;

        let (kind, sender, timestamp) = match msg.subtype.as_str() {
            "message_changed" => {
                let edited = event.message.as_deref();
                let sender = edited.map(|m| m.user.as_str()).unwrap_or(&msg.user);
                let ts = edited.map(|m| m.ts.as_str()).unwrap_or(&msg.ts);
                (RemoteEventKind::Edit, sender, ts)
            }
            "message_deleted" => {
                let previous = event.previous_message.as_deref();
                let sender = previous.map(|m| m.user.as_str()).unwrap_or(&msg.user);
                let ts = event
                    .deleted_ts
                    .as_deref()
                    .or(previous.map(|m| m.ts.as_str()))
                    .unwrap_or(&msg.ts);
                (RemoteEventKind::MessageRemove, sender, ts)
            }
            "channel_topic" | "channel_purpose" | "channel_name" | "group_topic"
            | "group_purpose" | "group_name" => (RemoteEventKind::ChatInfoChange, msg.user.as_str(), msg.ts.as_str()),
            "message_replied" | "channel_join" | "channel_leave" | "group_join" | "group_leave" => {
                debug!(subtype = %msg.subtype, "Dropping message subtype");
                return Ok(None);
            }
            _ => (RemoteEventKind::Message, msg.user.as_str(), msg.ts.as_str()),
        };

        let mut meta = me
            .make_event_meta(self.portals, kind, &event.channel, None, Some(sender), Some(timestamp))
            .await?;
        meta.create_portal = true;
        meta.log_context = LogContext {
            message_ts: Some(msg.ts.clone()),
            message_sender: Some(msg.user.clone()).filter(|user| !user.is_empty()),
        };

        let wrapped = match kind {
            RemoteEventKind::ChatInfoChange => {
                let mut info = ChatInfo::default();
                match msg.subtype.as_str() {
                    "channel_name" | "group_name" => info.name = msg.name.clone(),
                    "channel_topic" | "group_topic" => info.topic = msg.topic.clone(),
                    _ => info.topic = msg.purpose.clone(),
                }
                RemoteEvent::ChatInfoChange(SlackChatInfoChange {
                    meta,
                    change: ChatInfoChange {
                        chat_info: Some(info),
                        member_changes: Vec::new(),
                    },
                })
            }
            RemoteEventKind::Edit => RemoteEvent::Edit(SlackMessage {
                meta,
                data: event.clone(),
                converted: None,
            }),
            RemoteEventKind::MessageRemove => RemoteEvent::Remove(SlackMessage {
                meta,
                data: event.clone(),
                converted: None,
            }),
            _ => {
                let converted = self.converter.to_local(&meta.portal_key.id, msg);
                RemoteEvent::Message(SlackMessage {
                    meta,
                    data: event.clone(),
                    converted: Some(converted),
                })
            }
        };

        Ok(Some(wrapped))
    }

    async fn reaction_meta(&self, kind: RemoteEventKind, reaction: &RawReaction) -> BridgeResult<EventMeta> {
        self.identity
            .make_event_meta(
                self.portals,
                kind,
                &reaction.item.channel,
                None,
                Some(&reaction.user),
                Some(&reaction.event_ts),
            )
            .await
    }

    /// Visible emoji for a reaction name and whether it is an image.
    ///
    /// Custom emoji resolve to their image reference (following aliases),
    /// standard shortcodes to unicode, anything else to `:name:`.
    pub async fn get_emoji(&self, name: &str) -> BridgeResult<(String, bool)> {
        let mut current = name.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            let Some(custom) = self.emojis.get_by_id(&self.identity.team_id, &current).await? else {
                break;
            };
            match custom.value {
                EmojiValue::Image(url) => return Ok((url, true)),
                EmojiValue::Alias(target) => current = target,
            }
        }

        let unicode = unicode_for_shortcode(&current)
            .map(str::to_string)
            .unwrap_or_else(|| format!(":{}:", name));
        Ok((unicode, false))
    }

    async fn wrap_reaction(&self, meta: EventMeta, reaction: &RawReaction) -> BridgeResult<SlackReaction> {
        let name = &reaction.reaction;
        let shortcode = format!(":{}:", name);

        let (mut emoji, is_image) = match self.get_emoji(name).await {
            Ok(found) => found,
            // Removals only need the emoji id
            Err(e) if meta.kind == RemoteEventKind::ReactionRemove => {
                debug!("Emoji lookup failed for removed reaction: {}", e);
                (shortcode.clone(), false)
            }
            Err(e) => return Err(e),
        };

        let mut info = Map::new();
        info.insert("name".to_string(), Value::String(name.clone()));
        if is_image {
            info.insert("mxc".to_string(), Value::String(emoji.clone()));
            if !self.custom_emoji_reactions {
                emoji = shortcode.clone();
            }
        }

        Ok(SlackReaction {
            target_id: make_message_id(&self.identity.team_id, &reaction.item.channel, &reaction.item.ts),
            emoji_id: make_emoji_id(&self.identity.team_id, name),
            emoji,
            extra_content: json!({
                SHORTCODE_KEY: shortcode,
                REACTION_INFO_KEY: Value::Object(info),
            }),
            meta,
        })
    }
}

fn member_change(meta: EventMeta, membership: Membership, prev_membership: Option<Membership>) -> RemoteEvent {
    let member = ChatMember {
        sender: meta.sender.clone(),
        membership,
        prev_membership,
    };
    RemoteEvent::ChatInfoChange(SlackChatInfoChange {
        meta,
        change: ChatInfoChange {
            chat_info: None,
            member_changes: vec![member],
        },
    })
}
