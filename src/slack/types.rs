//! Slack Web API data model.
//!
//! Only the fields the bridge reads are modelled; everything else in the
//! JSON payloads is ignored by serde.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A conversation: public channel, private channel, DM or group DM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_channel: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_general: bool,
    #[serde(default)]
    pub is_archived: bool,
    /// Counterpart of a DM.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub topic: Option<Topic>,
    #[serde(default)]
    pub purpose: Option<Topic>,
    /// Latest message, only present in list responses.
    #[serde(default)]
    pub latest: Option<Message>,
    #[serde(default)]
    pub last_read: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

impl Channel {
    /// DMs and group DMs are scoped to one login.
    pub fn is_direct(&self) -> bool {
        self.is_im || self.is_mpim
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub creator: String,
}

/// A message as it appears in history, list responses and RTM events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub edited: Option<Edited>,
    #[serde(default)]
    pub files: Vec<File>,
    #[serde(default)]
    pub blocks: Option<Value>,
    /// New topic on `channel_topic` / `group_topic` messages.
    #[serde(default)]
    pub topic: Option<String>,
    /// New purpose on `channel_purpose` / `group_purpose` messages.
    #[serde(default)]
    pub purpose: Option<String>,
    /// New name on `channel_name` / `group_name` messages.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub old_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Edited {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub ts: String,
}

/// An uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url_private: String,
    #[serde(default)]
    pub shares: Shares,
}

/// Where a file has been posted, keyed by channel id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shares {
    #[serde(default)]
    pub private: HashMap<String, Vec<ShareFileInfo>>,
    #[serde(default)]
    pub public: HashMap<String, Vec<ShareFileInfo>>,
}

impl Shares {
    /// Timestamp of the message that carries the file in `channel_id`.
    ///
    /// Slack puts the share either under `private` or `public`; a populated
    /// private entry wins. `None` while Slack is still processing the upload.
    pub fn message_ts(&self, channel_id: &str) -> Option<&str> {
        fn first_ts<'a>(shares: &'a HashMap<String, Vec<ShareFileInfo>>, channel_id: &str) -> Option<&'a str> {
            shares
                .get(channel_id)
                .and_then(|infos| infos.first())
                .map(|info| info.ts.as_str())
                .filter(|ts| !ts.is_empty())
        }
        first_ts(&self.private, channel_id).or_else(|| first_ts(&self.public, channel_id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareFileInfo {
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

/// A workspace member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub profile: UserProfile,
}

impl User {
    /// Name shown for the user's ghost.
    pub fn display_name(&self) -> &str {
        [
            self.profile.display_name.as_str(),
            self.profile.real_name.as_str(),
            self.real_name.as_str(),
        ]
        .into_iter()
        .find(|name| !name.is_empty())
        .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub image_192: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub icon: TeamIcon,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamIcon {
    #[serde(default)]
    pub image_230: String,
    #[serde(default)]
    pub image_default: bool,
}

/// Bootstrap data returned by `client.userBoot`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootResponse {
    #[serde(rename = "self")]
    pub self_user: User,
    pub team: Team,
}

/// Identity reported by `rtm.connect`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub url: String,
    #[serde(rename = "self")]
    pub self_user: User,
    pub team: Team,
}

/// Parameters for `users.conversations`.
#[derive(Debug, Clone)]
pub struct ConversationsParams {
    pub types: Vec<String>,
    pub limit: usize,
    pub cursor: String,
}

/// Reference to a message, for reactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub channel: String,
    pub timestamp: String,
}

/// A message to post, or an update to an existing one when `update_ts` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostMessageRequest {
    pub text: String,
    pub blocks: Option<Value>,
    pub thread_ts: Option<String>,
    pub reply_broadcast: bool,
    pub username: Option<String>,
    pub icon_url: Option<String>,
    pub update_ts: Option<String>,
}

/// A new file upload into a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileUploadParams {
    pub channel: String,
    pub filename: String,
    pub title: String,
    pub content: Bytes,
    pub initial_comment: Option<String>,
    pub thread_ts: Option<String>,
}

/// Re-posting a file that already exists on Slack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileShareParams {
    pub file_id: String,
    pub channel: String,
    pub text: Option<String>,
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileShareResponse {
    #[serde(default)]
    pub file_msg_ts: String,
}

/// One entry of `emoji.list`: either an image URL or an alias of another emoji.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmojiValue {
    Image(String),
    Alias(String),
}

impl EmojiValue {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("alias:") {
            Some(target) => Self::Alias(target.to_string()),
            None => Self::Image(raw.to_string()),
        }
    }
}
