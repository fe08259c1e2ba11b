//! One session per bridged login.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::common::error::BridgeResult;
use crate::slackid::UserLoginId;

use super::connector::BridgeConnector;
use super::session::SlackSession;
use super::types::UserLogin;

pub struct SessionPool {
    connector: BridgeConnector,
    sessions: RwLock<HashMap<UserLoginId, Arc<SlackSession>>>,
}

impl SessionPool {
    pub fn new(connector: BridgeConnector) -> Self {
        Self {
            connector,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> &BridgeConnector {
        &self.connector
    }

    /// Session of `login`, restoring it first if the pool has none.
    pub async fn load(&self, login: &UserLogin) -> BridgeResult<Arc<SlackSession>> {
        if let Some(session) = self.get(&login.id).await {
            return Ok(session);
        }

        let session = self.connector.load_user_login(login).await?;
        let mut sessions = self.sessions.write().await;
        // another caller may have restored it meanwhile
        let session = sessions.entry(login.id.clone()).or_insert(session);
        Ok(Arc::clone(session))
    }

    pub async fn get(&self, login_id: &UserLoginId) -> Option<Arc<SlackSession>> {
        self.sessions.read().await.get(login_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Log the login out of Slack and drop its session.
    pub async fn logout(&self, login_id: &UserLoginId) {
        let session = self.sessions.write().await.remove(login_id);
        if let Some(session) = session {
            session.logout().await;
            info!("Logged out {}", login_id);
        }
    }

    /// Drop a session without signing out remotely.
    pub async fn remove(&self, login_id: &UserLoginId) {
        let session = self.sessions.write().await.remove(login_id);
        if let Some(session) = session {
            session.disconnect().await;
            info!("Removed {}", login_id);
        }
    }

    pub async fn disconnect_all(&self) {
        let sessions: Vec<Arc<SlackSession>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channels::ChannelBundle;
    use crate::bridge::connector::{login_from_account, ConnectorContext};
    use crate::bridge::memory::{MemoryCredentialStore, MemoryEmojiDirectory, MemoryPortalDirectory};
    use crate::bridge::testutil::{MockApiFactory, MockSlackApi};
    use crate::config::types::{AccountConfig, BridgeConfig};
    use crate::msgconv::PlainTextConverter;
    use tokio_test::assert_ok;

    fn pool(api: Arc<MockSlackApi>) -> SessionPool {
        SessionPool::new(BridgeConnector::new(ConnectorContext {
            config: BridgeConfig::default(),
            portals: Arc::new(MemoryPortalDirectory::new()),
            emojis: Arc::new(MemoryEmojiDirectory::new()),
            credentials: Arc::new(MemoryCredentialStore::new()),
            converter: Arc::new(PlainTextConverter),
            api_factory: Arc::new(MockApiFactory { api }),
            channels: ChannelBundle::new().sessions,
        }))
    }

    fn login(user_id: &str) -> UserLogin {
        login_from_account(&AccountConfig {
            team_id: "T1".into(),
            user_id: user_id.into(),
            email: String::new(),
            token: "xoxp-1".into(),
            cookie_token: None,
        })
    }

    #[tokio::test]
    async fn test_one_session_per_login() {
        let pool = pool(Arc::new(MockSlackApi::new()));
        let first = pool.load(&login("U1")).await.unwrap();
        let again = pool.load(&login("U1")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        assert_ok!(pool.load(&login("U2")).await);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_logout_removes_session() {
        let api = Arc::new(MockSlackApi::new());
        let pool = pool(api.clone());
        let session = pool.load(&login("U1")).await.unwrap();

        pool.logout(session.login_id()).await;
        assert!(pool.is_empty().await);
        assert!(!session.is_logged_in().await);
        assert_eq!(api.calls_to("auth_signout"), 1);
    }

    #[tokio::test]
    async fn test_remove_keeps_remote_session() {
        let api = Arc::new(MockSlackApi::new());
        let pool = pool(api.clone());
        let session = pool.load(&login("U1")).await.unwrap();

        pool.remove(session.login_id()).await;
        assert!(pool.get(session.login_id()).await.is_none());
        assert_eq!(api.calls_to("auth_signout"), 0);
        assert!(session.is_logged_in().await);
    }
}
