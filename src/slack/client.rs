//! HTTP client for the Slack Web API.
//!
//! All methods are form-encoded POSTs authenticated with the bearer token and,
//! for browser (`xoxc-`) tokens, the `d` cookie. Slack reports failures in the
//! body as `{"ok": false, "error": "<code>"}`, usually with HTTP 200.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::multipart;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use crate::common::error::{SlackApiError, SlackResult};
use crate::config::SlackConfig;

use super::api::{ApiFactory, RtmConnection, SlackApi};
use super::rtm;
use super::types::{
    BootResponse, Channel, ConnectInfo, ConversationsParams, File, FileShareParams,
    FileShareResponse, FileUploadParams, ItemRef, PostMessageRequest, Team, User,
};

/// Pages of `users.list` scanned by [`SlackClient::search_users`].
const USER_SEARCH_MAX_PAGES: usize = 5;

// ============================================================================
// Response envelopes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsPage {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct MembersPage {
    #[serde(default)]
    members: Vec<User>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: User,
}

#[derive(Debug, Deserialize)]
struct TeamResponse {
    team: Team,
}

#[derive(Debug, Deserialize)]
struct TimestampResponse {
    ts: String,
}

#[derive(Debug, Deserialize)]
struct EmojiResponse {
    #[serde(default)]
    emoji: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct UploadUrlResponse {
    upload_url: String,
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct CompleteUploadResponse {
    #[serde(default)]
    files: Vec<File>,
}

/// Check the `ok` flag of a Web API response and decode the rest.
fn parse_response<T: DeserializeOwned>(status: reqwest::StatusCode, body: &str) -> SlackResult<T> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) if !status.is_success() => {
            return Err(SlackApiError::api(format!("http_{}", status.as_u16())));
        }
        Err(e) => return Err(e.into()),
    };

    if !value.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        let code = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        return Err(SlackApiError::api(code));
    }

    Ok(serde_json::from_value(value)?)
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated Slack Web API client.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    cookie_token: Option<String>,
}

impl SlackClient {
    pub fn new(config: &SlackConfig, token: &str, cookie_token: Option<&str>) -> SlackResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            cookie_token: cookie_token.map(str::to_string),
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.post(url).bearer_auth(&self.token);
        match &self.cookie_token {
            Some(cookie) => request.header(COOKIE, format!("d={}", cookie)),
            None => request,
        }
    }

    /// Call a Web API method with form parameters.
    async fn call<T: DeserializeOwned>(&self, method: &str, form: &[(&str, &str)]) -> SlackResult<T> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self.request(&url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        trace!(method, status = %status, body = %body, "Slack API response");
        parse_response(status, &body)
    }

    /// `rtm.connect`: websocket URL plus the identity Slack sees.
    pub async fn rtm_connect(&self) -> SlackResult<ConnectInfo> {
        self.call("rtm.connect", &[]).await
    }
}

#[async_trait]
impl SlackApi for SlackClient {
    async fn client_boot(&self) -> SlackResult<BootResponse> {
        self.call("client.userBoot", &[("_x_reason", "initial-data")]).await
    }

    async fn team_info(&self, team_id: &str) -> SlackResult<Team> {
        let response: TeamResponse = self.call("team.info", &[("team", team_id)]).await?;
        Ok(response.team)
    }

    async fn conversations_for_user(
        &self,
        params: &ConversationsParams,
    ) -> SlackResult<(Vec<Channel>, String)> {
        let types = params.types.join(",");
        let limit = params.limit.to_string();
        let mut form = vec![("types", types.as_str()), ("limit", limit.as_str())];
        if !params.cursor.is_empty() {
            form.push(("cursor", params.cursor.as_str()));
        }

        let page: ChannelsPage = self.call("users.conversations", &form).await?;
        Ok((page.channels, page.response_metadata.next_cursor))
    }

    async fn conversation_info(&self, channel_id: &str) -> SlackResult<Channel> {
        let response: ChannelResponse = self
            .call("conversations.info", &[("channel", channel_id)])
            .await?;
        Ok(response.channel)
    }

    async fn user_info(&self, user_id: &str) -> SlackResult<User> {
        let response: UserResponse = self.call("users.info", &[("user", user_id)]).await?;
        Ok(response.user)
    }

    async fn search_users(&self, query: &str) -> SlackResult<Vec<User>> {
        let needle = query.to_lowercase();
        let mut results = Vec::new();
        let mut cursor = String::new();

        for _ in 0..USER_SEARCH_MAX_PAGES {
            let mut form = vec![("limit", "200")];
            if !cursor.is_empty() {
                form.push(("cursor", cursor.as_str()));
            }
            let page: MembersPage = self.call("users.list", &form).await?;

            results.extend(page.members.into_iter().filter(|user| {
                !user.deleted
                    && [
                        user.name.as_str(),
                        user.real_name.as_str(),
                        user.profile.display_name.as_str(),
                    ]
                    .iter()
                    .any(|name| name.to_lowercase().contains(&needle))
            }));

            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                break;
            }
        }

        Ok(results)
    }

    async fn open_conversation(&self, user_id: &str) -> SlackResult<Channel> {
        let response: ChannelResponse = self
            .call("conversations.open", &[("users", user_id), ("return_im", "true")])
            .await?;
        Ok(response.channel)
    }

    async fn post_message(&self, channel_id: &str, request: &PostMessageRequest) -> SlackResult<String> {
        let blocks = request.blocks.as_ref().map(Value::to_string);
        let mut form = vec![("channel", channel_id), ("text", request.text.as_str())];
        if let Some(blocks) = &blocks {
            form.push(("blocks", blocks.as_str()));
        }
        if let Some(thread_ts) = &request.thread_ts {
            form.push(("thread_ts", thread_ts.as_str()));
            if request.reply_broadcast {
                form.push(("reply_broadcast", "true"));
            }
        }
        if let Some(username) = &request.username {
            form.push(("username", username.as_str()));
        }
        if let Some(icon_url) = &request.icon_url {
            form.push(("icon_url", icon_url.as_str()));
        }

        let method = match &request.update_ts {
            Some(ts) => {
                form.push(("ts", ts.as_str()));
                "chat.update"
            }
            None => "chat.postMessage",
        };

        let response: TimestampResponse = self.call(method, &form).await?;
        Ok(response.ts)
    }

    async fn upload_file(&self, params: &FileUploadParams) -> SlackResult<File> {
        let length = params.content.len().to_string();
        let target: UploadUrlResponse = self
            .call(
                "files.getUploadURLExternal",
                &[("filename", params.filename.as_str()), ("length", length.as_str())],
            )
            .await?;
        debug!(file_id = %target.file_id, "Uploading file content");

        let part = multipart::Part::bytes(params.content.to_vec()).file_name(params.filename.clone());
        let upload = self
            .request(&target.upload_url)
            .multipart(multipart::Form::new().part("file", part))
            .send()
            .await?;
        if !upload.status().is_success() {
            return Err(SlackApiError::api(format!("upload_http_{}", upload.status().as_u16())));
        }

        let title = if params.title.is_empty() {
            params.filename.as_str()
        } else {
            params.title.as_str()
        };
        let files = json!([{ "id": target.file_id, "title": title }]).to_string();
        let mut form = vec![("files", files.as_str()), ("channel_id", params.channel.as_str())];
        if let Some(comment) = &params.initial_comment {
            form.push(("initial_comment", comment.as_str()));
        }
        if let Some(thread_ts) = &params.thread_ts {
            form.push(("thread_ts", thread_ts.as_str()));
        }

        let completed: CompleteUploadResponse = self.call("files.completeUploadExternal", &form).await?;
        completed
            .files
            .into_iter()
            .next()
            .ok_or_else(|| SlackApiError::api("no_file_in_response"))
    }

    async fn share_file(&self, params: &FileShareParams) -> SlackResult<FileShareResponse> {
        let mut form = vec![("file", params.file_id.as_str()), ("channel", params.channel.as_str())];
        if let Some(text) = &params.text {
            form.push(("text", text.as_str()));
        }
        if let Some(thread_ts) = &params.thread_ts {
            form.push(("thread_ts", thread_ts.as_str()));
        }
        self.call("files.share", &form).await
    }

    async fn delete_message(&self, channel_id: &str, timestamp: &str) -> SlackResult<()> {
        let _: IgnoredAny = self
            .call("chat.delete", &[("channel", channel_id), ("ts", timestamp)])
            .await?;
        Ok(())
    }

    async fn add_reaction(&self, name: &str, item: &ItemRef) -> SlackResult<()> {
        let _: IgnoredAny = self
            .call(
                "reactions.add",
                &[("name", name), ("channel", item.channel.as_str()), ("timestamp", item.timestamp.as_str())],
            )
            .await?;
        Ok(())
    }

    async fn remove_reaction(&self, name: &str, item: &ItemRef) -> SlackResult<()> {
        let _: IgnoredAny = self
            .call(
                "reactions.remove",
                &[("name", name), ("channel", item.channel.as_str()), ("timestamp", item.timestamp.as_str())],
            )
            .await?;
        Ok(())
    }

    async fn mark_conversation(&self, channel_id: &str, timestamp: &str) -> SlackResult<()> {
        let _: IgnoredAny = self
            .call("conversations.mark", &[("channel", channel_id), ("ts", timestamp)])
            .await?;
        Ok(())
    }

    async fn rename_conversation(&self, channel_id: &str, name: &str) -> SlackResult<()> {
        let _: IgnoredAny = self
            .call("conversations.rename", &[("channel", channel_id), ("name", name)])
            .await?;
        Ok(())
    }

    async fn set_topic(&self, channel_id: &str, topic: &str) -> SlackResult<()> {
        let _: IgnoredAny = self
            .call("conversations.setTopic", &[("channel", channel_id), ("topic", topic)])
            .await?;
        Ok(())
    }

    async fn emoji_list(&self) -> SlackResult<HashMap<String, String>> {
        let response: EmojiResponse = self.call("emoji.list", &[]).await?;
        Ok(response.emoji)
    }

    async fn auth_signout(&self) -> SlackResult<()> {
        let _: IgnoredAny = self.call("auth.signout", &[]).await?;
        Ok(())
    }

    async fn start_rtm(&self, cancel: CancellationToken, tracker: &TaskTracker) -> SlackResult<RtmConnection> {
        Ok(rtm::spawn(self.clone(), cancel, tracker))
    }
}

/// Builds [`SlackClient`]s sharing one API configuration.
pub struct SlackClientFactory {
    config: SlackConfig,
}

impl SlackClientFactory {
    pub fn new(config: SlackConfig) -> Self {
        Self { config }
    }
}

impl ApiFactory for SlackClientFactory {
    fn create(&self, token: &str, cookie_token: Option<&str>) -> SlackResult<Arc<dyn SlackApi>> {
        Ok(Arc::new(SlackClient::new(&self.config, token, cookie_token)?))
    }
}
