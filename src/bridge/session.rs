//! Per-login session: connect, event consumption, invalidation, teardown.
//!
//! A session owns the authenticated client and the RTM stream of one bridged
//! account. Connecting starts three tracked tasks (the serial event loop, the
//! emoji sync and the channel sync) next to the RTM connection manager;
//! disconnecting cancels them and waits, even when a connect is in flight.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::common::error::{BridgeError, BridgeResult};
use crate::slack::api::{RtmCommand, SlackApi};
use crate::slack::events::SlackEvent;
use crate::slack::types::BootResponse;
use crate::slackid::{UserId, UserLoginId, user_id_to_login_id};

use super::chatinfo::team_chat_info;
use super::connector::ConnectorContext;
use super::meta::Identity;
use super::status::{self, BridgeState, StateEvent};
use super::sync::{sync_channels, sync_emojis, sync_team_portal};
use super::translate::TranslateContext;
use super::types::{Portal, UserLogin};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Credentials are gone; only a new login brings the session back.
    Invalid,
}

#[derive(Default)]
struct Live {
    client: Option<Arc<dyn SlackApi>>,
    token: String,
    outgoing: Option<mpsc::UnboundedSender<RtmCommand>>,
    cancel: Option<CancellationToken>,
    boot: Option<BootResponse>,
    team_portal: Option<Portal>,
    state: SessionState,
}

pub struct SlackSession {
    ctx: Arc<ConnectorContext>,
    identity: Identity,
    live: RwLock<Live>,
    /// Held by `connect` while it starts tasks and by `disconnect` while it
    /// waits for them.
    lifecycle: Mutex<()>,
    tracker: TaskTracker,
}

impl SlackSession {
    pub fn new(ctx: Arc<ConnectorContext>, login: &UserLogin, client: Option<Arc<dyn SlackApi>>) -> Self {
        let token = login
            .credentials
            .as_ref()
            .map(|credentials| credentials.token.clone())
            .unwrap_or_default();

        Self {
            ctx,
            identity: Identity {
                team_id: login.team_id.clone(),
                user_id: login.user_id.clone(),
                login_id: login.id.clone(),
            },
            live: RwLock::new(Live {
                client,
                token,
                ..Live::default()
            }),
            lifecycle: Mutex::new(()),
            tracker: TaskTracker::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn login_id(&self) -> &UserLoginId {
        &self.identity.login_id
    }

    pub(crate) fn context(&self) -> &ConnectorContext {
        &self.ctx
    }

    pub async fn state(&self) -> SessionState {
        self.live.read().await.state
    }

    pub async fn is_logged_in(&self) -> bool {
        self.live.read().await.client.is_some()
    }

    /// Whether the session acts as a person rather than a bot token.
    pub async fn is_real_user(&self) -> bool {
        !self.live.read().await.token.starts_with("xoxb")
    }

    pub fn is_this_user(&self, user_id: &UserId) -> bool {
        user_id_to_login_id(user_id).is_ok_and(|login_id| login_id == self.identity.login_id)
    }

    pub async fn boot(&self) -> Option<BootResponse> {
        self.live.read().await.boot.clone()
    }

    pub async fn team_portal(&self) -> Option<Portal> {
        self.live.read().await.team_portal.clone()
    }

    pub(crate) async fn set_team_portal(&self, portal: Option<Portal>) {
        self.live.write().await.team_portal = portal;
    }

    /// The authenticated client, or `NotLoggedIn`.
    pub(crate) async fn client(&self) -> BridgeResult<Arc<dyn SlackApi>> {
        self.live.read().await.client.clone().ok_or(BridgeError::NotLoggedIn)
    }

    pub(crate) async fn rtm_outgoing(&self) -> Option<mpsc::UnboundedSender<RtmCommand>> {
        self.live.read().await.outgoing.clone()
    }

    fn send_state(&self, state: BridgeState) {
        self.ctx.channels.send_state(&self.identity.login_id, state);
    }

    async fn set_state(&self, state: SessionState) {
        let mut live = self.live.write().await;
        if live.state != SessionState::Invalid {
            live.state = state;
        }
    }

    // ========================================================================
    // Connect
    // ========================================================================

    /// Bootstrap the session and start its background tasks.
    ///
    /// Credential failures invalidate the session. Any other failure leaves it
    /// disconnected so the caller can retry. A disconnect that lands first
    /// makes this return `ConnectAborted` with nothing left running.
    pub async fn connect(self: &Arc<Self>) -> BridgeResult<()> {
        let client = self.client().await?;
        let cancel = CancellationToken::new();
        {
            let mut live = self.live.write().await;
            if let Some(previous) = live.cancel.replace(cancel.clone()) {
                previous.cancel();
            }
            if live.state != SessionState::Invalid {
                live.state = SessionState::Connecting;
            }
        }
        let _lifecycle = self.lifecycle.lock().await;
        info!(
            "Connecting to Slack team {} as {}",
            self.identity.team_id, self.identity.user_id
        );

        let boot = tokio::select! {
            _ = cancel.cancelled() => return Err(BridgeError::ConnectAborted),
            result = client.client_boot() => result,
        };
        let boot = match boot {
            Ok(boot) => boot,
            Err(e) if e.is_credential_error() => {
                let code = e.code().unwrap_or_default().to_string();
                error!("Slack rejected the credentials: {}", e);
                self.invalidate(
                    BridgeState::new(StateEvent::BadCredentials).with_error(status::credential_error_code(&code)),
                )
                .await;
                return Err(BridgeError::InvalidCredentials { code });
            }
            Err(e) => {
                error!("Failed to fetch bootstrap data: {}", e);
                self.set_state(SessionState::Disconnected).await;
                self.send_state(
                    BridgeState::new(StateEvent::UnknownError)
                        .with_error(status::ERR_UNKNOWN_FETCH)
                        .with_message(format!("Unknown error from Slack: {}", e)),
                );
                return Err(e.into());
            }
        };

        let team_info = team_chat_info(&boot.team);
        let team_portal = tokio::select! {
            _ = cancel.cancelled() => return Err(BridgeError::ConnectAborted),
            result = sync_team_portal(self.ctx.portals.as_ref(), &self.identity, &team_info) => result,
        };
        let team_portal = match team_portal {
            Ok(portal) => portal,
            Err(e) => {
                error!("Failed to sync team portal: {}", e);
                self.set_state(SessionState::Disconnected).await;
                return Err(e);
            }
        };

        self.tracker.reopen();
        let rtm = match client.start_rtm(cancel.child_token(), &self.tracker).await {
            Ok(rtm) => rtm,
            Err(e) => {
                error!("Failed to start event stream: {}", e);
                self.set_state(SessionState::Disconnected).await;
                return Err(e.into());
            }
        };

        let token = {
            let mut live = self.live.write().await;
            // the manager is tracked and cancelled; disconnect waits for it
            if cancel.is_cancelled() {
                info!("Disconnected while connecting; not starting session tasks");
                return Err(BridgeError::ConnectAborted);
            }
            live.boot = Some(boot);
            live.team_portal = Some(team_portal);
            live.outgoing = Some(rtm.outgoing);
            live.token.clone()
        };

        let session = Arc::clone(self);
        let loop_cancel = cancel.clone();
        self.tracker.spawn(async move {
            session.consume_events(rtm.events, loop_cancel).await;
        });

        let emoji_client = Arc::clone(&client);
        let emojis = Arc::clone(&self.ctx.emojis);
        let team_id = self.identity.team_id.clone();
        let emoji_cancel = cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = emoji_cancel.cancelled() => debug!("Emoji sync cancelled"),
                result = sync_emojis(emoji_client.as_ref(), &team_id, emojis.as_ref()) => {
                    if let Err(e) = result {
                        error!("Failed to sync emoji: {}", e);
                    }
                }
            }
        });

        let portals = Arc::clone(&self.ctx.portals);
        let identity = self.identity.clone();
        let conversation_count = self.ctx.config.backfill.conversation_count;
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!("Channel sync cancelled"),
                result = sync_channels(client.as_ref(), &identity, portals.as_ref(), &token, conversation_count) => {
                    if let Err(e) = result {
                        error!("Failed to sync channels: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    async fn consume_events(self: Arc<Self>, mut events: mpsc::Receiver<SlackEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Event loop cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Event stream closed");
                        break;
                    }
                },
            };

            let span = info_span!(
                "slack_event",
                login_id = %self.identity.login_id,
                event_type = event.type_name(),
            );
            if self.handle_event(event).instrument(span).await.is_break() {
                break;
            }
        }
    }

    async fn handle_event(&self, event: SlackEvent) -> ControlFlow<()> {
        match &event {
            SlackEvent::Connecting {
                attempt,
                connection_count,
            } => {
                debug!(attempt, connection_count, "Connecting to event stream");
                self.set_state(SessionState::Connecting).await;
                self.send_state(BridgeState::new(StateEvent::Connecting));
            }
            SlackEvent::Connected { team_id, user_id } => {
                if *team_id != self.identity.team_id || *user_id != self.identity.user_id {
                    let mismatch = BridgeError::IdentityMismatch {
                        expected_team: self.identity.team_id.clone(),
                        expected_user: self.identity.user_id.clone(),
                        actual_team: team_id.clone(),
                        actual_user: user_id.clone(),
                    };
                    error!("{}", mismatch);
                    self.invalidate(
                        BridgeState::new(StateEvent::UnknownError)
                            .with_error(status::ERR_ID_MISMATCH)
                            .with_message(mismatch.to_string()),
                    )
                    .await;
                    return ControlFlow::Break(());
                }
                info!("Connected to Slack");
                self.set_state(SessionState::Connected).await;
                self.send_state(BridgeState::new(StateEvent::Connected));
            }
            SlackEvent::Hello {} => debug!("Received hello"),
            SlackEvent::InvalidAuth => {
                error!("Event stream rejected the credentials");
                self.invalidate(BridgeState::new(StateEvent::BadCredentials).with_error(status::ERR_INVALID_AUTH))
                    .await;
                return ControlFlow::Break(());
            }
            SlackEvent::Error { error } => {
                error!(code = error.code, "Event stream error: {}", error.msg);
                self.send_state(
                    BridgeState::new(StateEvent::UnknownError)
                        .with_error(status::rtm_error_code(error.code))
                        .with_message(format!("{}: {}", error.code, error.msg)),
                );
            }
            SlackEvent::Unrecognized { event_type, payload } => {
                warn!("Unrecognized event type {}", event_type);
                trace!(%payload, "Unrecognized event payload");
            }
            _ => {
                let Ok(client) = self.client().await else {
                    return ControlFlow::Break(());
                };
                let translate = TranslateContext {
                    identity: &self.identity,
                    portals: self.ctx.portals.as_ref(),
                    emojis: self.ctx.emojis.as_ref(),
                    client: client.as_ref(),
                    converter: self.ctx.converter.as_ref(),
                    custom_emoji_reactions: self.ctx.config.custom_emoji_reactions,
                };
                match translate.wrap_event(&event).await {
                    Ok(Some(remote)) => self.ctx.channels.queue_event(&self.identity.login_id, remote),
                    Ok(None) => {}
                    Err(e) => warn!("Failed to handle {} event: {}", event.type_name(), e),
                }
            }
        }
        ControlFlow::Continue(())
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Drop the credentials and tear down without waiting on tracked tasks,
    /// so the event loop can call it on itself.
    pub(crate) async fn invalidate(&self, state: BridgeState) {
        let cancel = {
            let mut live = self.live.write().await;
            live.client = None;
            live.outgoing = None;
            live.token.clear();
            live.state = SessionState::Invalid;
            live.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Err(e) = self.ctx.credentials.clear(&self.identity.login_id).await {
            error!("Failed to clear credentials after invalidating session: {}", e);
        }
        warn!(state = %state.state_event, error = ?state.error, "Session invalidated");
        self.send_state(state);
    }

    /// Stop the event stream and wait for the session's tasks, the RTM
    /// connection manager included, to finish.
    pub async fn disconnect(&self) {
        let cancel = {
            let mut live = self.live.write().await;
            live.outgoing = None;
            if live.state != SessionState::Invalid {
                live.state = SessionState::Disconnected;
            }
            live.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let _lifecycle = self.lifecycle.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        info!("Disconnected session {}", self.identity.login_id);
    }

    /// Sign out remotely (best effort), disconnect and forget the credentials.
    pub async fn logout(&self) {
        if let Ok(client) = self.client().await {
            if let Err(e) = client.auth_signout().await {
                warn!("Failed to send sign out request to Slack: {}", e);
            }
        }
        self.disconnect().await;

        {
            let mut live = self.live.write().await;
            live.client = None;
            live.token.clear();
        }
        if let Err(e) = self.ctx.credentials.clear(&self.identity.login_id).await {
            error!("Failed to clear credentials on logout: {}", e);
        }
        self.send_state(BridgeState::new(StateEvent::LoggedOut));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::bridge::channels::{ChannelBundle, ConsumerChannels};
    use crate::bridge::directory::PortalDirectory;
    use crate::bridge::event::{RemoteEventKind, RemoteEventMeta};
    use crate::bridge::memory::{MemoryCredentialStore, MemoryEmojiDirectory, MemoryPortalDirectory};
    use crate::bridge::testutil::{MockApiFactory, MockSlackApi};
    use crate::bridge::connector::{login_from_account, BridgeConnector};
    use crate::bridge::types::PortalKey;
    use crate::config::types::{AccountConfig, BridgeConfig};
    use crate::msgconv::PlainTextConverter;
    use crate::slack::types::Channel;
    use crate::slackid::{make_portal_id, make_user_id};

    struct Harness {
        session: Arc<SlackSession>,
        api: Arc<MockSlackApi>,
        portals: Arc<MemoryPortalDirectory>,
        credentials: Arc<MemoryCredentialStore>,
        consumer: ConsumerChannels,
    }

    async fn harness(token: &str) -> Harness {
        let api = Arc::new(MockSlackApi::for_account("T1", "U1"));
        let portals = Arc::new(MemoryPortalDirectory::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let bundle = ChannelBundle::new();

        let connector = BridgeConnector::new(ConnectorContext {
            config: BridgeConfig::default(),
            portals: portals.clone(),
            emojis: Arc::new(MemoryEmojiDirectory::new()),
            credentials: credentials.clone(),
            converter: Arc::new(PlainTextConverter),
            api_factory: Arc::new(MockApiFactory { api: api.clone() }),
            channels: bundle.sessions,
        });
        let login = login_from_account(&AccountConfig {
            team_id: "T1".into(),
            user_id: "U1".into(),
            email: String::new(),
            token: token.into(),
            cookie_token: None,
        });
        let session = connector.load_user_login(&login).await.unwrap();

        Harness {
            session,
            api,
            portals,
            credentials,
            consumer: bundle.consumer,
        }
    }

    async fn next_state(consumer: &mut ConsumerChannels) -> BridgeState {
        tokio::time::timeout(Duration::from_secs(1), consumer.state_rx.recv())
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed")
            .state
    }

    #[tokio::test]
    async fn test_connect_syncs_team_portal_and_starts_tasks() {
        let mut h = harness("xoxp-1").await;
        h.session.connect().await.unwrap();

        let team_key = h.session.identity().team_portal_key();
        assert!(h.portals.portal(&team_key).await.unwrap().is_materialized());
        assert!(h.session.boot().await.is_some());
        assert!(h.session.team_portal().await.is_some());

        let rtm = h.api.rtm_sender();
        rtm.send(SlackEvent::Connecting {
            attempt: 1,
            connection_count: 0,
        })
        .await
        .unwrap();
        rtm.send(SlackEvent::Connected {
            team_id: "T1".into(),
            user_id: "U1".into(),
        })
        .await
        .unwrap();

        assert_eq!(next_state(&mut h.consumer).await.state_event, StateEvent::Connecting);
        assert_eq!(next_state(&mut h.consumer).await.state_event, StateEvent::Connected);
        assert_eq!(h.session.state().await, SessionState::Connected);

        h.session.disconnect().await;
        assert_eq!(h.session.state().await, SessionState::Disconnected);
        assert_eq!(h.api.calls_to("emoji_list"), 1);
        assert_eq!(h.api.calls_to("conversations_for_user"), 1);
    }

    #[tokio::test]
    async fn test_identity_mismatch_invalidates_once() {
        let mut h = harness("xoxp-1").await;
        h.session.connect().await.unwrap();

        let rtm = h.api.rtm_sender();
        rtm.send(SlackEvent::Connected {
            team_id: "T1".into(),
            user_id: "U999".into(),
        })
        .await
        .unwrap();
        // never handled: the loop stops at the mismatch
        rtm.send(SlackEvent::Connected {
            team_id: "T1".into(),
            user_id: "U1".into(),
        })
        .await
        .unwrap();

        let state = next_state(&mut h.consumer).await;
        assert_eq!(state.state_event, StateEvent::UnknownError);
        assert_eq!(state.error.as_deref(), Some(status::ERR_ID_MISMATCH));

        h.session.disconnect().await;
        assert!(h.consumer.state_rx.try_recv().is_err());
        assert!(h.consumer.event_rx.try_recv().is_err());
        assert_eq!(h.session.state().await, SessionState::Invalid);
        assert!(!h.session.is_logged_in().await);
        assert!(h.credentials.get(h.session.login_id()).await.is_none());
    }

    #[tokio::test]
    async fn test_bad_credentials_on_boot() {
        let mut h = harness("xoxp-1").await;
        h.api.fail("client_boot", "user_removed_from_team");

        let err = h.session.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidCredentials { ref code } if code == "user_removed_from_team"));

        let state = next_state(&mut h.consumer).await;
        assert_eq!(state.state_event, StateEvent::BadCredentials);
        assert_eq!(state.error.as_deref(), Some(status::ERR_USER_REMOVED));
        assert_eq!(h.session.state().await, SessionState::Invalid);
        assert!(matches!(h.session.connect().await, Err(BridgeError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_transient_boot_failure_stays_disconnected() {
        let mut h = harness("xoxp-1").await;
        h.api.fail("client_boot", "ratelimited");

        let err = h.session.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::RemoteApi(_)));

        let state = next_state(&mut h.consumer).await;
        assert_eq!(state.state_event, StateEvent::UnknownError);
        assert_eq!(state.error.as_deref(), Some(status::ERR_UNKNOWN_FETCH));
        assert_eq!(h.session.state().await, SessionState::Disconnected);
        assert!(h.session.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_invalid_auth_from_stream() {
        let mut h = harness("xoxp-1").await;
        h.session.connect().await.unwrap();
        h.api.rtm_sender().send(SlackEvent::InvalidAuth).await.unwrap();

        let state = next_state(&mut h.consumer).await;
        assert_eq!(state.state_event, StateEvent::BadCredentials);
        assert_eq!(state.error.as_deref(), Some(status::ERR_INVALID_AUTH));
        h.session.disconnect().await;
        assert_eq!(h.session.state().await, SessionState::Invalid);
    }

    #[tokio::test]
    async fn test_chat_events_are_queued() {
        let mut h = harness("xoxp-1").await;
        h.portals
            .get_or_create_portal(&PortalKey::shared(make_portal_id("T1", "C1")))
            .await
            .unwrap();
        h.session.connect().await.unwrap();

        let rtm = h.api.rtm_sender();
        rtm.send(SlackEvent::UserTyping {
            channel: "C404".into(),
            user: "U2".into(),
        })
        .await
        .unwrap();
        rtm.send(SlackEvent::UserTyping {
            channel: "C1".into(),
            user: "U2".into(),
        })
        .await
        .unwrap();

        let queued = tokio::time::timeout(Duration::from_secs(1), h.consumer.event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.login_id, *h.session.login_id());
        assert_eq!(queued.event.kind(), RemoteEventKind::Typing);
        assert_eq!(queued.event.sender().sender, Some(make_user_id("T1", "U2")));

        h.session.disconnect().await;
    }

    #[tokio::test]
    async fn test_logout_signs_out_and_clears() {
        let mut h = harness("xoxp-1").await;
        h.session.connect().await.unwrap();
        h.session.logout().await;

        assert_eq!(h.api.calls_to("auth_signout"), 1);
        assert!(!h.session.is_logged_in().await);
        assert!(h.credentials.get(h.session.login_id()).await.is_none());
        assert_eq!(next_state(&mut h.consumer).await.state_event, StateEvent::LoggedOut);
    }

    #[tokio::test]
    async fn test_disconnect_waits_for_stream_manager() {
        let h = harness("xoxp-1").await;
        h.session.connect().await.unwrap();
        assert!(!h.api.rtm_stopped());

        h.session.disconnect().await;
        assert!(h.api.rtm_stopped());
    }

    #[tokio::test]
    async fn test_disconnect_during_boot_aborts_connect() {
        let h = harness("xoxp-1").await;
        let gate = Arc::new(tokio::sync::Notify::new());
        h.api.set_boot_gate(gate.clone());

        let session = h.session.clone();
        let connecting = tokio::spawn(async move { session.connect().await });
        while h.api.calls_to("client_boot") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(1), h.session.disconnect())
            .await
            .expect("disconnect blocked by the pending connect");
        gate.notify_one();

        let result = connecting.await.unwrap();
        assert!(matches!(result, Err(BridgeError::ConnectAborted)));
        assert_eq!(h.session.state().await, SessionState::Disconnected);
        assert!(h.session.boot().await.is_none());
        assert_eq!(h.api.calls_to("start_rtm"), 0);

        // nothing was left running behind the disconnect
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.api.calls_to("emoji_list"), 0);
        assert_eq!(h.api.calls_to("conversations_for_user"), 0);
    }

    #[tokio::test]
    async fn test_bot_token_is_not_real_user() {
        let h = harness("xoxb-1").await;
        assert!(!h.session.is_real_user().await);
        assert!(h.session.is_this_user(&make_user_id("T1", "U1")));
        assert!(!h.session.is_this_user(&make_user_id("T1", "U2")));

        let dm = Channel {
            id: "D1".into(),
            is_im: true,
            ..Channel::default()
        };
        assert_eq!(
            h.session.identity().make_portal_key(&dm).receiver.as_ref(),
            Some(h.session.login_id())
        );
    }
}
