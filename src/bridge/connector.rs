//! Process-wide connector: configuration plus the collaborators every session
//! shares.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::common::error::BridgeResult;
use crate::config::types::{AccountConfig, BridgeConfig};
use crate::msgconv::MessageConverter;
use crate::slack::api::{ApiFactory, SlackApi};
use crate::slackid::make_user_login_id;

use super::channels::SessionChannels;
use super::directory::{CredentialStore, EmojiDirectory, PortalDirectory};
use super::session::SlackSession;
use super::status;
use super::types::{Credentials, UserLogin};

/// Shared state handed to every session.
pub struct ConnectorContext {
    pub config: BridgeConfig,
    pub portals: Arc<dyn PortalDirectory>,
    pub emojis: Arc<dyn EmojiDirectory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub converter: Arc<dyn MessageConverter>,
    pub api_factory: Arc<dyn ApiFactory>,
    pub channels: SessionChannels,
}

pub struct BridgeConnector {
    ctx: Arc<ConnectorContext>,
}

impl BridgeConnector {
    /// Registers the adapter's error messages before any session exists.
    pub fn new(ctx: ConnectorContext) -> Self {
        status::register_human_errors();
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &Arc<ConnectorContext> {
        &self.ctx
    }

    /// Restore a stored login into a session.
    ///
    /// A login without credentials yields a logged-out session; connecting it
    /// fails with `NotLoggedIn`.
    pub async fn load_user_login(&self, login: &UserLogin) -> BridgeResult<Arc<SlackSession>> {
        let client: Option<Arc<dyn SlackApi>> = match &login.credentials {
            Some(credentials) => {
                let client = self
                    .ctx
                    .api_factory
                    .create(&credentials.token, credentials.cookie_token.as_deref())?;
                if let Err(e) = self.ctx.credentials.save(&login.id, credentials).await {
                    warn!("Failed to store credentials for {}: {}", login.id, e);
                }
                Some(client)
            }
            None => {
                info!("Login {} has no credentials, loading logged out", login.id);
                None
            }
        };

        let session = Arc::new(SlackSession::new(Arc::clone(&self.ctx), login, client));

        let team_portal = self
            .ctx
            .portals
            .get_existing_portal(&session.identity().team_portal_key())
            .await?;
        debug!(login_id = %login.id, cached = team_portal.is_some(), "Loaded team portal");
        session.set_team_portal(team_portal).await;

        Ok(session)
    }
}

/// Build a login from a configured account.
pub fn login_from_account(account: &AccountConfig) -> UserLogin {
    UserLogin {
        id: make_user_login_id(&account.team_id, &account.user_id),
        team_id: account.team_id.clone(),
        user_id: account.user_id.clone(),
        email: account.email.clone(),
        credentials: (!account.token.is_empty()).then(|| Credentials {
            token: account.token.clone(),
            cookie_token: account.cookie_token.clone().filter(|cookie| !cookie.is_empty()),
        }),
    }
}
