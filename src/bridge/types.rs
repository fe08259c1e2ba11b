//! Room, sender and login types shared by the adapter.

use crate::slackid::{PortalId, UserId, UserLoginId};

/// Addresses a bridged room.
///
/// DMs and group DMs are per-login: the same Slack channel seen by two
/// logins maps to two rooms, told apart by `receiver`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortalKey {
    pub id: PortalId,
    pub receiver: Option<UserLoginId>,
}

impl PortalKey {
    pub fn shared(id: PortalId) -> Self {
        Self { id, receiver: None }
    }

    pub fn with_receiver(id: PortalId, receiver: UserLoginId) -> Self {
        Self {
            id,
            receiver: Some(receiver),
        }
    }
}

/// A room as known to the local side.
#[derive(Debug, Clone, PartialEq)]
pub struct Portal {
    pub key: PortalKey,
    /// Local room id; `None` until the room has been created.
    pub room_id: Option<String>,
    pub info: ChatInfo,
}

impl Portal {
    pub fn is_materialized(&self) -> bool {
        self.room_id.is_some()
    }
}

/// Who sent a remote event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSender {
    pub sender: Option<UserId>,
    /// Sent by the account this session belongs to.
    pub is_from_me: bool,
    pub sender_login: Option<UserLoginId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Join,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMember {
    pub sender: EventSender,
    pub membership: Membership,
    pub prev_membership: Option<Membership>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomType {
    Default,
    Dm,
    GroupDm,
    /// The team's parent room.
    Space,
}

/// Room metadata. `None` fields are left untouched when applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatInfo {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub avatar: Option<String>,
    pub members: Option<Vec<ChatMember>>,
    pub room_type: Option<RoomType>,
    pub parent: Option<PortalId>,
}

/// A change to apply to a room: new metadata, membership changes, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatInfoChange {
    pub chat_info: Option<ChatInfo>,
    pub member_changes: Vec<ChatMember>,
}

/// Profile of a remote user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub avatar: Option<String>,
    pub is_bot: bool,
}

/// Secrets of a bridged account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub cookie_token: Option<String>,
}

/// A bridged account as restored from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLogin {
    pub id: UserLoginId,
    pub team_id: String,
    pub user_id: String,
    pub email: String,
    /// `None` for a login whose credentials were invalidated.
    pub credentials: Option<Credentials>,
}
