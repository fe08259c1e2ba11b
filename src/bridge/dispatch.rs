//! Local actions turned into Slack API calls.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::common::error::{BridgeError, BridgeResult, SlackApiError};
use crate::msgconv::{ConvertedSlackMessage, LocalContent, OrigSender, OutboundContent};
use crate::slack::api::{RtmCommand, SlackApi};
use crate::slack::types::ItemRef;
use crate::slackid::{
    make_emoji_id, make_message_id, parse_emoji_id, parse_message_id, parse_portal_id, EmojiId,
    MessageId, PortalId,
};

use super::meta::Identity;
use super::session::SlackSession;
use super::translate::shortcode_for_unicode;
use super::types::PortalKey;

/// Outcome of sending a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { id: MessageId, timestamp: String },
    /// Slack has not shared the uploaded file yet; the message arrives later
    /// through the event stream and is matched by `transaction_id`.
    Pending { transaction_id: String },
}

/// A message from a local room.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub portal: PortalKey,
    pub content: LocalContent,
    pub thread_root: Option<MessageId>,
    pub orig_sender: Option<OrigSender>,
}

/// Send one converted message.
///
/// Exactly one payload is used: a post request wins over an upload, which
/// wins over a share by reference.
pub async fn send_to_slack(
    client: &dyn SlackApi,
    identity: &Identity,
    channel_id: &str,
    message: &ConvertedSlackMessage,
) -> BridgeResult<Delivery> {
    let sent = |timestamp: String| Delivery::Sent {
        id: make_message_id(&identity.team_id, channel_id, &timestamp),
        timestamp,
    };

    if let Some(request) = &message.send_req {
        let timestamp = client.post_message(channel_id, request).await?;
        return Ok(sent(timestamp));
    }

    if let Some(upload) = &message.file_upload {
        let file = client.upload_file(upload).await?;
        return Ok(match file.shares.message_ts(channel_id) {
            Some(timestamp) => sent(timestamp.to_string()),
            None => {
                debug!(file_id = %file.id, "Uploaded file not shared yet");
                Delivery::Pending {
                    transaction_id: format!("{}:{}", identity.user_id, file.id),
                }
            }
        });
    }

    if let Some(share) = &message.file_share {
        let response = client.share_file(share).await?;
        return Ok(sent(response.file_msg_ts));
    }

    Err(BridgeError::NoPayload)
}

/// Channel id of a room, checking it belongs to this team.
fn channel_of(identity: &Identity, portal: &PortalId) -> BridgeResult<String> {
    let (team_id, channel_id) = parse_portal_id(portal)?;
    if team_id != identity.team_id {
        return Err(BridgeError::InvalidAddressing(format!(
            "room {} belongs to another team",
            portal
        )));
    }
    Ok(channel_id)
}

fn item_of(target: &MessageId) -> BridgeResult<ItemRef> {
    let (_, channel, timestamp) = parse_message_id(target)?;
    Ok(ItemRef { channel, timestamp })
}

impl SlackSession {
    fn convert(
        &self,
        portal: &PortalId,
        content: &LocalContent,
        thread_root: Option<&MessageId>,
        edit_target: Option<&MessageId>,
        orig_sender: Option<&OrigSender>,
        is_real_user: bool,
    ) -> BridgeResult<ConvertedSlackMessage> {
        self.context().converter.to_slack(OutboundContent {
            portal,
            content,
            thread_root,
            edit_target,
            orig_sender,
            is_real_user,
        })
    }

    pub async fn handle_message(&self, message: &OutboundMessage) -> BridgeResult<Delivery> {
        let client = self.client().await?;
        let channel_id = channel_of(self.identity(), &message.portal.id)?;
        let converted = self.convert(
            &message.portal.id,
            &message.content,
            message.thread_root.as_ref(),
            None,
            message.orig_sender.as_ref(),
            self.is_real_user().await,
        )?;
        send_to_slack(client.as_ref(), self.identity(), &channel_id, &converted).await
    }

    pub async fn handle_edit(
        &self,
        portal: &PortalKey,
        target: &MessageId,
        content: &LocalContent,
        orig_sender: Option<&OrigSender>,
    ) -> BridgeResult<()> {
        let client = self.client().await?;
        let channel_id = channel_of(self.identity(), &portal.id)?;
        let converted = self.convert(
            &portal.id,
            content,
            None,
            Some(target),
            orig_sender,
            self.is_real_user().await,
        )?;
        send_to_slack(client.as_ref(), self.identity(), &channel_id, &converted).await?;
        Ok(())
    }

    pub async fn handle_redaction(&self, target: &MessageId) -> BridgeResult<()> {
        let client = self.client().await?;
        let item = item_of(target)?;
        client.delete_message(&item.channel, &item.timestamp).await?;
        Ok(())
    }

    /// Map a local reaction key to an emoji id.
    ///
    /// Keys containing `:` are media references of custom emoji; anything
    /// else must be a unicode emoji with a Slack shortcode.
    pub async fn pre_handle_reaction(&self, key: &str) -> BridgeResult<EmojiId> {
        self.client().await?;
        let team_id = &self.identity().team_id;

        let name = if key.contains(':') {
            self.context()
                .emojis
                .get_by_media(key)
                .await?
                .filter(|emoji| emoji.team_id == *team_id)
                .map(|emoji| emoji.name)
        } else {
            shortcode_for_unicode(key)
        };

        name.map(|name| make_emoji_id(team_id, &name))
            .ok_or_else(|| BridgeError::UnknownEmoji(key.to_string()))
    }

    pub async fn handle_reaction(&self, target: &MessageId, emoji_id: &EmojiId) -> BridgeResult<()> {
        let client = self.client().await?;
        let (_, name) = parse_emoji_id(emoji_id)?;
        client.add_reaction(&name, &item_of(target)?).await?;
        Ok(())
    }

    pub async fn handle_reaction_remove(&self, target: &MessageId, emoji_id: &EmojiId) -> BridgeResult<()> {
        let client = self.client().await?;
        let (_, name) = parse_emoji_id(emoji_id)?;
        match client.remove_reaction(&name, &item_of(target)?).await {
            Err(e) if e.code() == Some("no_reaction") => {
                debug!("Reaction {} was already gone", name);
                Ok(())
            }
            result => Ok(result?),
        }
    }

    /// Mark a room read up to `exact`, or up to the last bridged message at
    /// or before `read_up_to`.
    pub async fn handle_read_receipt(
        &self,
        portal: &PortalKey,
        exact: Option<&MessageId>,
        read_up_to: DateTime<Utc>,
    ) -> BridgeResult<()> {
        let client = self.client().await?;
        if !self.is_real_user().await {
            return Ok(());
        }

        let target = match exact {
            Some(id) => Some(id.clone()),
            None => {
                self.context()
                    .portals
                    .last_message_at_or_before(portal, read_up_to)
                    .await?
            }
        };
        let Some(target) = target else {
            debug!(portal = %portal.id, "No message to mark as read");
            return Ok(());
        };

        let item = item_of(&target)?;
        client.mark_conversation(&item.channel, &item.timestamp).await?;
        Ok(())
    }

    pub async fn handle_typing(&self, portal: &PortalId, is_typing: bool) -> BridgeResult<()> {
        self.client().await?;
        if !is_typing || !self.is_real_user().await {
            return Ok(());
        }
        let channel = channel_of(self.identity(), portal)?;
        match self.rtm_outgoing().await {
            Some(outgoing) => outgoing
                .send(RtmCommand::Typing { channel })
                .map_err(|_| BridgeError::RemoteApi(SlackApiError::StreamClosed)),
            None => {
                debug!("Event stream not running, dropping typing notification");
                Ok(())
            }
        }
    }

    pub async fn handle_room_name(&self, portal: &PortalId, name: &str) -> BridgeResult<()> {
        let client = self.client().await?;
        if !self.is_real_user().await {
            return Ok(());
        }
        let channel_id = channel_of(self.identity(), portal)?;
        client.rename_conversation(&channel_id, name).await?;
        info!(channel_id = %channel_id, "Renamed channel");
        Ok(())
    }

    pub async fn handle_room_topic(&self, portal: &PortalId, topic: &str) -> BridgeResult<()> {
        let client = self.client().await?;
        if !self.is_real_user().await {
            return Ok(());
        }
        let channel_id = channel_of(self.identity(), portal)?;
        client.set_topic(&channel_id, topic).await?;
        Ok(())
    }
}
