//! The remote API seam.
//!
//! Everything the adapter asks of Slack goes through [`SlackApi`], so sessions
//! can run against the real HTTP/websocket client or an in-process fake.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::common::error::SlackResult;

use super::events::SlackEvent;
use super::types::{
    BootResponse, Channel, ConversationsParams, File, FileShareParams, FileShareResponse,
    FileUploadParams, ItemRef, PostMessageRequest, Team, User,
};

/// Handle on a running RTM connection manager.
///
/// Dropping `events` does not stop the manager; cancel the token passed to
/// [`SlackApi::start_rtm`] for that, then wait on the tracker.
pub struct RtmConnection {
    /// Decoded events, including lifecycle notifications.
    pub events: mpsc::Receiver<SlackEvent>,
    /// Outgoing frames (typing indicators).
    pub outgoing: mpsc::UnboundedSender<RtmCommand>,
}

/// Frames a session can send over the RTM socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtmCommand {
    Typing { channel: String },
}

/// Slack Web API and RTM operations used by the adapter.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// `client.userBoot`: identity and team of the token owner.
    async fn client_boot(&self) -> SlackResult<BootResponse>;

    async fn team_info(&self, team_id: &str) -> SlackResult<Team>;

    /// One page of `users.conversations`; returns the channels and the next
    /// cursor (empty when exhausted).
    async fn conversations_for_user(
        &self,
        params: &ConversationsParams,
    ) -> SlackResult<(Vec<Channel>, String)>;

    async fn conversation_info(&self, channel_id: &str) -> SlackResult<Channel>;

    async fn user_info(&self, user_id: &str) -> SlackResult<User>;

    /// Look up workspace members whose name contains `query`.
    async fn search_users(&self, query: &str) -> SlackResult<Vec<User>>;

    /// Open (or reuse) a DM with a user and return its channel.
    async fn open_conversation(&self, user_id: &str) -> SlackResult<Channel>;

    /// `chat.postMessage`, or `chat.update` when `update_ts` is set.
    /// Returns the message timestamp.
    async fn post_message(&self, channel_id: &str, request: &PostMessageRequest) -> SlackResult<String>;

    /// Upload a new file and post it to the channel. Returns the file as
    /// Slack reports it right after the upload.
    async fn upload_file(&self, params: &FileUploadParams) -> SlackResult<File>;

    /// Re-post an existing file by reference.
    async fn share_file(&self, params: &FileShareParams) -> SlackResult<FileShareResponse>;

    async fn delete_message(&self, channel_id: &str, timestamp: &str) -> SlackResult<()>;

    async fn add_reaction(&self, name: &str, item: &ItemRef) -> SlackResult<()>;

    async fn remove_reaction(&self, name: &str, item: &ItemRef) -> SlackResult<()>;

    /// Move the read marker of a conversation.
    async fn mark_conversation(&self, channel_id: &str, timestamp: &str) -> SlackResult<()>;

    async fn rename_conversation(&self, channel_id: &str, name: &str) -> SlackResult<()>;

    async fn set_topic(&self, channel_id: &str, topic: &str) -> SlackResult<()>;

    /// Custom emoji of the workspace: name to URL or `alias:<target>`.
    async fn emoji_list(&self) -> SlackResult<HashMap<String, String>>;

    /// Invalidate the token server-side.
    async fn auth_signout(&self) -> SlackResult<()>;

    /// Start the RTM connection manager on `tracker`. It reconnects on its
    /// own until `cancel` fires or the credentials are rejected.
    async fn start_rtm(&self, cancel: CancellationToken, tracker: &TaskTracker) -> SlackResult<RtmConnection>;
}

/// Builds authenticated clients from stored credentials.
pub trait ApiFactory: Send + Sync {
    fn create(&self, token: &str, cookie_token: Option<&str>) -> SlackResult<Arc<dyn SlackApi>>;
}
