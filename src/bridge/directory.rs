//! Storage and room-API collaborators consumed by the adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::error::BridgeResult;
use crate::slack::types::EmojiValue;
use crate::slackid::{MessageId, PortalId, UserLoginId};

use super::types::{ChatInfo, Credentials, Portal, PortalKey};

/// Rooms known to the local side.
#[async_trait]
pub trait PortalDirectory: Send + Sync {
    /// Key under which `id` is stored for `login`: the per-login key if one
    /// exists, else the shared key. `None` when no portal exists at all.
    async fn find_portal_receiver(
        &self,
        id: &PortalId,
        login: &UserLoginId,
    ) -> BridgeResult<Option<PortalKey>>;

    async fn get_existing_portal(&self, key: &PortalKey) -> BridgeResult<Option<Portal>>;

    async fn get_or_create_portal(&self, key: &PortalKey) -> BridgeResult<Portal>;

    /// Materialize the local room for a portal on behalf of `login`.
    async fn create_room(&self, login: &UserLoginId, key: &PortalKey, info: &ChatInfo) -> BridgeResult<()>;

    /// Apply metadata to an existing portal.
    async fn update_info(&self, login: &UserLoginId, key: &PortalKey, info: &ChatInfo) -> BridgeResult<()>;

    /// Portals `login` participates in.
    async fn portals_for_login(&self, login: &UserLoginId) -> BridgeResult<Vec<Portal>>;

    /// Latest bridged message in the room at or before `time`.
    async fn last_message_at_or_before(
        &self,
        key: &PortalKey,
        time: DateTime<Utc>,
    ) -> BridgeResult<Option<MessageId>>;
}

/// A workspace custom emoji.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomEmoji {
    pub team_id: String,
    pub name: String,
    pub value: EmojiValue,
}

impl CustomEmoji {
    /// Media reference of the image, for non-alias entries.
    pub fn image_ref(&self) -> Option<&str> {
        match &self.value {
            EmojiValue::Image(url) => Some(url),
            EmojiValue::Alias(_) => None,
        }
    }
}

/// Custom emoji catalog, per team.
#[async_trait]
pub trait EmojiDirectory: Send + Sync {
    async fn get_by_id(&self, team_id: &str, name: &str) -> BridgeResult<Option<CustomEmoji>>;

    async fn get_by_media(&self, media_ref: &str) -> BridgeResult<Option<CustomEmoji>>;

    /// Replace everything known for `team_id` with `entries`.
    async fn replace_catalog(&self, team_id: &str, entries: Vec<CustomEmoji>) -> BridgeResult<()>;
}

/// Persistence of login secrets.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, login: &UserLoginId, credentials: &Credentials) -> BridgeResult<()>;

    /// Forget the secrets of a login; the login itself stays.
    async fn clear(&self, login: &UserLoginId) -> BridgeResult<()>;
}
