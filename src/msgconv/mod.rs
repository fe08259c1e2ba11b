//! Message content conversion between local rooms and Slack.
//!
//! Rich rendering (mrkdwn, mentions, blocks) is not done here; the adapter
//! only needs the [`MessageConverter`] contract. [`PlainTextConverter`] is the
//! reference implementation used by the daemon and the tests: bodies pass
//! through as plain text and attachments map onto uploads or shares.

use bytes::Bytes;

use crate::common::error::{BridgeError, BridgeResult};
use crate::slack::types::{FileShareParams, FileUploadParams, Message, PostMessageRequest};
use crate::slackid::{make_message_id, parse_message_id, parse_portal_id, MessageId, PortalId};

/// Content of an outgoing local message.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalContent {
    Text {
        body: String,
    },
    /// An attachment. When `remote_file_id` is set the file already lives on
    /// Slack and is shared by reference instead of uploaded again.
    Media {
        filename: String,
        data: Bytes,
        caption: Option<String>,
        remote_file_id: Option<String>,
    },
}

/// Sender of a relayed message when the session posts on someone's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrigSender {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Input of [`MessageConverter::to_slack`].
#[derive(Debug, Clone, Copy)]
pub struct OutboundContent<'a> {
    pub portal: &'a PortalId,
    pub content: &'a LocalContent,
    pub thread_root: Option<&'a MessageId>,
    pub edit_target: Option<&'a MessageId>,
    pub orig_sender: Option<&'a OrigSender>,
    pub is_real_user: bool,
}

/// Result of converting a local message: at most one of the three is used,
/// in field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedSlackMessage {
    pub send_req: Option<PostMessageRequest>,
    pub file_upload: Option<FileUploadParams>,
    pub file_share: Option<FileShareParams>,
}

/// One part of a converted remote message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedPart {
    /// Empty for the text part, the Slack file id for attachments.
    pub part_id: String,
    pub body: String,
    pub attachment_url: Option<String>,
}

/// A remote message ready to be applied to a local room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertedMessage {
    pub parts: Vec<ConvertedPart>,
    /// Root of the thread this message replies in.
    pub thread_root: Option<MessageId>,
}

/// Converts message content in both directions.
pub trait MessageConverter: Send + Sync {
    fn to_slack(&self, outbound: OutboundContent<'_>) -> BridgeResult<ConvertedSlackMessage>;

    fn to_local(&self, portal: &PortalId, message: &Message) -> ConvertedMessage;
}

/// Plain-text converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextConverter;

impl MessageConverter for PlainTextConverter {
    fn to_slack(&self, outbound: OutboundContent<'_>) -> BridgeResult<ConvertedSlackMessage> {
        let (_, channel_id) = parse_portal_id(outbound.portal)?;
        let thread_ts = outbound
            .thread_root
            .map(|root| parse_message_id(root).map(|(_, _, ts)| ts))
            .transpose()?;
        let update_ts = outbound
            .edit_target
            .map(|target| parse_message_id(target).map(|(_, _, ts)| ts))
            .transpose()?;

        match outbound.content {
            LocalContent::Text { body } => {
                if body.is_empty() {
                    return Ok(ConvertedSlackMessage::default());
                }
                let mut request = PostMessageRequest {
                    text: body.clone(),
                    thread_ts,
                    update_ts,
                    ..PostMessageRequest::default()
                };
                if let Some(sender) = outbound.orig_sender {
                    if outbound.is_real_user {
                        request.text = format!("{}: {}", sender.display_name, body);
                    } else {
                        request.username = Some(sender.display_name.clone());
                        request.icon_url = sender.avatar_url.clone();
                    }
                }
                Ok(ConvertedSlackMessage {
                    send_req: Some(request),
                    ..ConvertedSlackMessage::default()
                })
            }
            LocalContent::Media { .. } if update_ts.is_some() => Err(BridgeError::Conversion(
                "attachments cannot be edited".to_string(),
            )),
            LocalContent::Media {
                caption,
                remote_file_id: Some(file_id),
                ..
            } => Ok(ConvertedSlackMessage {
                file_share: Some(FileShareParams {
                    file_id: file_id.clone(),
                    channel: channel_id,
                    text: caption.clone(),
                    thread_ts,
                }),
                ..ConvertedSlackMessage::default()
            }),
            LocalContent::Media {
                filename,
                data,
                caption,
                remote_file_id: None,
            } => Ok(ConvertedSlackMessage {
                file_upload: Some(FileUploadParams {
                    channel: channel_id,
                    filename: filename.clone(),
                    title: filename.clone(),
                    content: data.clone(),
                    initial_comment: caption.clone(),
                    thread_ts,
                }),
                ..ConvertedSlackMessage::default()
            }),
        }
    }

    fn to_local(&self, portal: &PortalId, message: &Message) -> ConvertedMessage {
        let mut parts = Vec::new();
        if !message.text.is_empty() {
            parts.push(ConvertedPart {
                part_id: String::new(),
                body: message.text.clone(),
                attachment_url: None,
            });
        }
        for file in &message.files {
            parts.push(ConvertedPart {
                part_id: file.id.clone(),
                body: if file.title.is_empty() {
                    file.name.clone()
                } else {
                    file.title.clone()
                },
                attachment_url: Some(file.url_private.clone()).filter(|url| !url.is_empty()),
            });
        }

        let thread_root = match (parse_portal_id(portal), &message.thread_ts) {
            (Ok((team_id, channel_id)), Some(thread_ts)) if *thread_ts != message.ts => {
                Some(make_message_id(&team_id, &channel_id, thread_ts))
            }
            _ => None,
        };

        ConvertedMessage { parts, thread_root }
    }
}
