//! In-process Slack fake for adapter tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::common::error::{SlackApiError, SlackResult};
use crate::slack::api::{ApiFactory, RtmCommand, RtmConnection, SlackApi};
use crate::slack::events::SlackEvent;
use crate::slack::types::{
    BootResponse, Channel, ConversationsParams, File, FileShareParams, FileShareResponse,
    FileUploadParams, ItemRef, PostMessageRequest, Team, User,
};

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    boot: BootResponse,
    channels: HashMap<String, Channel>,
    conversation_pages: Vec<(Vec<Channel>, String)>,
    users: HashMap<String, User>,
    emoji: HashMap<String, String>,
    uploaded: File,
    failures: HashMap<&'static str, String>,
    posted: Vec<(String, PostMessageRequest)>,
    next_ts: u64,
}

/// Records every call as `method:args` and answers from canned data.
pub struct MockSlackApi {
    state: Mutex<MockState>,
    rtm_tx: mpsc::Sender<SlackEvent>,
    rtm_rx: Mutex<Option<mpsc::Receiver<SlackEvent>>>,
    outgoing_tx: mpsc::UnboundedSender<RtmCommand>,
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<RtmCommand>>>,
    boot_gate: Mutex<Option<Arc<Notify>>>,
    rtm_stopped: Arc<AtomicBool>,
}

impl MockSlackApi {
    pub fn new() -> Self {
        let (rtm_tx, rtm_rx) = mpsc::channel(64);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(MockState::default()),
            rtm_tx,
            rtm_rx: Mutex::new(Some(rtm_rx)),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            boot_gate: Mutex::new(None),
            rtm_stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A fake whose bootstrap reports `team_id`/`user_id`.
    pub fn for_account(team_id: &str, user_id: &str) -> Self {
        let mock = Self::new();
        mock.set_boot(BootResponse {
            self_user: User {
                id: user_id.into(),
                team_id: team_id.into(),
                name: "me".into(),
                ..User::default()
            },
            team: Team {
                id: team_id.into(),
                name: "Acme".into(),
                ..Team::default()
            },
        });
        mock
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn record(&self, method: &'static str, args: &str) -> SlackResult<()> {
        self.with_state(|state| {
            state.calls.push(if args.is_empty() {
                method.to_string()
            } else {
                format!("{}:{}", method, args)
            });
            match state.failures.get(method) {
                Some(code) => Err(SlackApiError::api(code.clone())),
                None => Ok(()),
            }
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|state| state.calls.clone())
    }

    pub fn calls_to(&self, method: &str) -> usize {
        let prefix = format!("{}:", method);
        self.calls()
            .iter()
            .filter(|call| call.as_str() == method || call.starts_with(&prefix))
            .count()
    }

    pub fn set_boot(&self, boot: BootResponse) {
        self.with_state(|state| state.boot = boot);
    }

    pub fn set_channel(&self, channel: Channel) {
        self.with_state(|state| {
            state.channels.insert(channel.id.clone(), channel);
        });
    }

    /// Pages returned by successive `conversations_for_user` calls.
    pub fn set_conversation_pages(&self, pages: Vec<(Vec<Channel>, String)>) {
        self.with_state(|state| state.conversation_pages = pages);
    }

    pub fn set_user(&self, user: User) {
        self.with_state(|state| {
            state.users.insert(user.id.clone(), user);
        });
    }

    pub fn set_emoji(&self, emoji: HashMap<String, String>) {
        self.with_state(|state| state.emoji = emoji);
    }

    pub fn set_uploaded(&self, file: File) {
        self.with_state(|state| state.uploaded = file);
    }

    /// Make `method` fail with the Slack error `code`.
    pub fn fail(&self, method: &'static str, code: &str) {
        self.with_state(|state| {
            state.failures.insert(method, code.to_string());
        });
    }

    pub fn posted(&self) -> Vec<(String, PostMessageRequest)> {
        self.with_state(|state| state.posted.clone())
    }

    /// Feed events into the stream handed out by `start_rtm`.
    pub fn rtm_sender(&self) -> mpsc::Sender<SlackEvent> {
        self.rtm_tx.clone()
    }

    /// Hold `client_boot` until `gate` is notified.
    pub fn set_boot_gate(&self, gate: Arc<Notify>) {
        *self.boot_gate.lock().unwrap() = Some(gate);
    }

    /// Whether the stand-in stream manager has finished its shutdown.
    pub fn rtm_stopped(&self) -> bool {
        self.rtm_stopped.load(Ordering::SeqCst)
    }

    pub fn take_outgoing(&self) -> Option<mpsc::UnboundedReceiver<RtmCommand>> {
        self.outgoing_rx.lock().unwrap().take()
    }
}

#[async_trait]
impl SlackApi for MockSlackApi {
    async fn client_boot(&self) -> SlackResult<BootResponse> {
        self.record("client_boot", "")?;
        let gate = self.boot_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.with_state(|state| state.boot.clone()))
    }

    async fn team_info(&self, team_id: &str) -> SlackResult<Team> {
        self.record("team_info", team_id)?;
        Ok(self.with_state(|state| state.boot.team.clone()))
    }

    async fn conversations_for_user(&self, params: &ConversationsParams) -> SlackResult<(Vec<Channel>, String)> {
        self.record(
            "conversations_for_user",
            &format!("{}:{}", params.limit, params.cursor),
        )?;
        Ok(self.with_state(|state| {
            if state.conversation_pages.is_empty() {
                (Vec::new(), String::new())
            } else {
                state.conversation_pages.remove(0)
            }
        }))
    }

    async fn conversation_info(&self, channel_id: &str) -> SlackResult<Channel> {
        self.record("conversation_info", channel_id)?;
        self.with_state(|state| state.channels.get(channel_id).cloned())
            .ok_or_else(|| SlackApiError::api("channel_not_found"))
    }

    async fn user_info(&self, user_id: &str) -> SlackResult<User> {
        self.record("user_info", user_id)?;
        self.with_state(|state| state.users.get(user_id).cloned())
            .ok_or_else(|| SlackApiError::api("user_not_found"))
    }

    async fn search_users(&self, query: &str) -> SlackResult<Vec<User>> {
        self.record("search_users", query)?;
        let query = query.to_lowercase();
        let mut users: Vec<User> = self.with_state(|state| {
            state
                .users
                .values()
                .filter(|user| user.name.to_lowercase().contains(&query))
                .cloned()
                .collect()
        });
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn open_conversation(&self, user_id: &str) -> SlackResult<Channel> {
        self.record("open_conversation", user_id)?;
        Ok(Channel {
            id: format!("D{}", user_id),
            is_im: true,
            user: Some(user_id.to_string()),
            ..Channel::default()
        })
    }

    async fn post_message(&self, channel_id: &str, request: &PostMessageRequest) -> SlackResult<String> {
        self.record("post_message", channel_id)?;
        Ok(self.with_state(|state| {
            state.next_ts += 1;
            state.posted.push((channel_id.to_string(), request.clone()));
            request
                .update_ts
                .clone()
                .unwrap_or_else(|| format!("1700000000.{:06}", state.next_ts))
        }))
    }

    async fn upload_file(&self, params: &FileUploadParams) -> SlackResult<File> {
        self.record("upload_file", &params.filename)?;
        Ok(self.with_state(|state| state.uploaded.clone()))
    }

    async fn share_file(&self, params: &FileShareParams) -> SlackResult<FileShareResponse> {
        self.record("share_file", &params.file_id)?;
        Ok(FileShareResponse {
            file_msg_ts: "1700000001.000001".into(),
        })
    }

    async fn delete_message(&self, channel_id: &str, timestamp: &str) -> SlackResult<()> {
        self.record("delete_message", &format!("{}:{}", channel_id, timestamp))
    }

    async fn add_reaction(&self, name: &str, item: &ItemRef) -> SlackResult<()> {
        self.record("add_reaction", &format!("{}:{}:{}", name, item.channel, item.timestamp))
    }

    async fn remove_reaction(&self, name: &str, item: &ItemRef) -> SlackResult<()> {
        self.record("remove_reaction", &format!("{}:{}:{}", name, item.channel, item.timestamp))
    }

    async fn mark_conversation(&self, channel_id: &str, timestamp: &str) -> SlackResult<()> {
        self.record("mark_conversation", &format!("{}:{}", channel_id, timestamp))
    }

    async fn rename_conversation(&self, channel_id: &str, name: &str) -> SlackResult<()> {
        self.record("rename_conversation", &format!("{}:{}", channel_id, name))
    }

    async fn set_topic(&self, channel_id: &str, topic: &str) -> SlackResult<()> {
        self.record("set_topic", &format!("{}:{}", channel_id, topic))
    }

    async fn emoji_list(&self) -> SlackResult<HashMap<String, String>> {
        self.record("emoji_list", "")?;
        Ok(self.with_state(|state| state.emoji.clone()))
    }

    async fn auth_signout(&self) -> SlackResult<()> {
        self.record("auth_signout", "")
    }

    async fn start_rtm(&self, cancel: CancellationToken, tracker: &TaskTracker) -> SlackResult<RtmConnection> {
        self.record("start_rtm", "")?;
        // stands in for the socket manager: slow to close after cancellation
        let stopped = Arc::clone(&self.rtm_stopped);
        tracker.spawn(async move {
            cancel.cancelled().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopped.store(true, Ordering::SeqCst);
        });
        let events = self
            .rtm_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(SlackApiError::StreamClosed)?;
        Ok(RtmConnection {
            events,
            outgoing: self.outgoing_tx.clone(),
        })
    }
}

/// Hands out the same fake for every login.
pub struct MockApiFactory {
    pub api: Arc<MockSlackApi>,
}

impl ApiFactory for MockApiFactory {
    fn create(&self, _token: &str, _cookie_token: Option<&str>) -> SlackResult<Arc<dyn SlackApi>> {
        Ok(self.api.clone())
    }
}
