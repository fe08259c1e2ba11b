//! In-memory collaborators.
//!
//! Used by the daemon, which keeps no database, and by the adapter tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::common::error::{BridgeError, BridgeResult};
use crate::slackid::{MessageId, PortalId, UserLoginId};

use super::directory::{CredentialStore, CustomEmoji, EmojiDirectory, PortalDirectory};
use super::types::{ChatInfo, Credentials, Portal, PortalKey};

fn merge_info(target: &mut ChatInfo, update: &ChatInfo) {
    if update.name.is_some() {
        target.name = update.name.clone();
    }
    if update.topic.is_some() {
        target.topic = update.topic.clone();
    }
    if update.avatar.is_some() {
        target.avatar = update.avatar.clone();
    }
    if update.members.is_some() {
        target.members = update.members.clone();
    }
    if update.room_type.is_some() {
        target.room_type = update.room_type;
    }
    if update.parent.is_some() {
        target.parent = update.parent.clone();
    }
}

// ============================================================================
// Portals
// ============================================================================

#[derive(Default)]
struct PortalState {
    portals: HashMap<PortalKey, Portal>,
    user_portals: HashMap<UserLoginId, HashSet<PortalKey>>,
    messages: HashMap<PortalKey, Vec<(DateTime<Utc>, MessageId)>>,
    created_rooms: Vec<PortalKey>,
}

#[derive(Default)]
pub struct MemoryPortalDirectory {
    state: RwLock<PortalState>,
}

impl MemoryPortalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a portal and link it to `login`.
    pub async fn insert_portal(&self, login: &UserLoginId, portal: Portal) {
        let mut state = self.state.write().await;
        state
            .user_portals
            .entry(login.clone())
            .or_default()
            .insert(portal.key.clone());
        state.portals.insert(portal.key.clone(), portal);
    }

    /// Remember a bridged message for read-receipt lookups.
    pub async fn record_message(&self, key: &PortalKey, id: MessageId, time: DateTime<Utc>) {
        let mut state = self.state.write().await;
        let messages = state.messages.entry(key.clone()).or_default();
        messages.push((time, id));
        messages.sort_by_key(|(time, _)| *time);
    }

    /// Keys of rooms created through [`PortalDirectory::create_room`], in order.
    pub async fn created_rooms(&self) -> Vec<PortalKey> {
        self.state.read().await.created_rooms.clone()
    }

    pub async fn portal(&self, key: &PortalKey) -> Option<Portal> {
        self.state.read().await.portals.get(key).cloned()
    }
}

#[async_trait]
impl PortalDirectory for MemoryPortalDirectory {
    async fn find_portal_receiver(
        &self,
        id: &PortalId,
        login: &UserLoginId,
    ) -> BridgeResult<Option<PortalKey>> {
        let state = self.state.read().await;
        let scoped = PortalKey::with_receiver(id.clone(), login.clone());
        if state.portals.contains_key(&scoped) {
            return Ok(Some(scoped));
        }
        let shared = PortalKey::shared(id.clone());
        Ok(state.portals.contains_key(&shared).then_some(shared))
    }

    async fn get_existing_portal(&self, key: &PortalKey) -> BridgeResult<Option<Portal>> {
        Ok(self.state.read().await.portals.get(key).cloned())
    }

    async fn get_or_create_portal(&self, key: &PortalKey) -> BridgeResult<Portal> {
        let mut state = self.state.write().await;
        let portal = state.portals.entry(key.clone()).or_insert_with(|| Portal {
            key: key.clone(),
            room_id: None,
            info: ChatInfo::default(),
        });
        Ok(portal.clone())
    }

    async fn create_room(&self, login: &UserLoginId, key: &PortalKey, info: &ChatInfo) -> BridgeResult<()> {
        let mut state = self.state.write().await;
        let room_number = state.created_rooms.len() + 1;
        let portal = state.portals.entry(key.clone()).or_insert_with(|| Portal {
            key: key.clone(),
            room_id: None,
            info: ChatInfo::default(),
        });
        if portal.room_id.is_some() {
            merge_info(&mut portal.info, info);
            return Ok(());
        }
        portal.room_id = Some(format!("!room{}:local", room_number));
        merge_info(&mut portal.info, info);

        state.created_rooms.push(key.clone());
        state
            .user_portals
            .entry(login.clone())
            .or_default()
            .insert(key.clone());
        Ok(())
    }

    async fn update_info(&self, login: &UserLoginId, key: &PortalKey, info: &ChatInfo) -> BridgeResult<()> {
        let mut state = self.state.write().await;
        let portal = state
            .portals
            .get_mut(key)
            .ok_or_else(|| BridgeError::Storage(format!("no portal {}", key.id)))?;
        merge_info(&mut portal.info, info);
        state
            .user_portals
            .entry(login.clone())
            .or_default()
            .insert(key.clone());
        Ok(())
    }

    async fn portals_for_login(&self, login: &UserLoginId) -> BridgeResult<Vec<Portal>> {
        let state = self.state.read().await;
        let Some(keys) = state.user_portals.get(login) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| state.portals.get(key).cloned())
            .collect())
    }

    async fn last_message_at_or_before(
        &self,
        key: &PortalKey,
        time: DateTime<Utc>,
    ) -> BridgeResult<Option<MessageId>> {
        let state = self.state.read().await;
        Ok(state.messages.get(key).and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|(at, _)| *at <= time)
                .map(|(_, id)| id.clone())
        }))
    }
}

// ============================================================================
// Emoji
// ============================================================================

#[derive(Default)]
pub struct MemoryEmojiDirectory {
    teams: RwLock<HashMap<String, HashMap<String, CustomEmoji>>>,
}

impl MemoryEmojiDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn catalog_size(&self, team_id: &str) -> usize {
        self.teams.read().await.get(team_id).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl EmojiDirectory for MemoryEmojiDirectory {
    async fn get_by_id(&self, team_id: &str, name: &str) -> BridgeResult<Option<CustomEmoji>> {
        Ok(self
            .teams
            .read()
            .await
            .get(team_id)
            .and_then(|catalog| catalog.get(name))
            .cloned())
    }

    async fn get_by_media(&self, media_ref: &str) -> BridgeResult<Option<CustomEmoji>> {
        Ok(self
            .teams
            .read()
            .await
            .values()
            .flat_map(HashMap::values)
            .find(|emoji| emoji.image_ref() == Some(media_ref))
            .cloned())
    }

    async fn replace_catalog(&self, team_id: &str, entries: Vec<CustomEmoji>) -> BridgeResult<()> {
        let catalog = entries
            .into_iter()
            .map(|emoji| (emoji.name.clone(), emoji))
            .collect();
        self.teams.write().await.insert(team_id.to_string(), catalog);
        Ok(())
    }
}

// ============================================================================
// Credentials
// ============================================================================

#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<UserLoginId, Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, login: &UserLoginId) -> Option<Credentials> {
        self.secrets.read().await.get(login).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save(&self, login: &UserLoginId, credentials: &Credentials) -> BridgeResult<()> {
        self.secrets
            .write()
            .await
            .insert(login.clone(), credentials.clone());
        Ok(())
    }

    async fn clear(&self, login: &UserLoginId) -> BridgeResult<()> {
        self.secrets.write().await.remove(login);
        Ok(())
    }
}
