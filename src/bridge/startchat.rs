//! Resolving user identifiers and opening DMs.

use tracing::debug;

use crate::common::error::{BridgeError, BridgeResult};
use crate::slackid::{make_user_id, parse_user_id, UserId};

use super::chatinfo::{channel_chat_info, wrap_user_info};
use super::session::SlackSession;
use super::types::{ChatInfo, PortalKey, UserInfo};

/// A resolved user, plus the DM when one was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentifier {
    pub user_id: UserId,
    pub user_info: UserInfo,
    pub chat: Option<CreatedChat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedChat {
    pub portal_key: PortalKey,
    pub portal_info: ChatInfo,
}

impl SlackSession {
    /// Resolve a bare Slack user id (`U…`) or an encoded ghost id, and
    /// optionally open a DM with the user.
    pub async fn resolve_identifier(&self, identifier: &str, create_chat: bool) -> BridgeResult<ResolvedIdentifier> {
        let client = self.client().await?;
        let team_id = &self.identity().team_id;

        let slack_user_id = if identifier.contains(':') {
            let (user_team, user_id) = parse_user_id(&UserId::new(identifier))?;
            if user_team != *team_id {
                return Err(BridgeError::InvalidAddressing(format!(
                    "user {} is not in team {}",
                    identifier, team_id
                )));
            }
            user_id
        } else {
            identifier.trim().to_uppercase()
        };

        let user = client.user_info(&slack_user_id).await?;
        let user_id = make_user_id(team_id, &user.id);

        let chat = if create_chat {
            let channel = client.open_conversation(&user.id).await?;
            debug!(channel_id = %channel.id, "Opened DM");
            Some(CreatedChat {
                portal_key: self.identity().make_portal_key(&channel),
                portal_info: channel_chat_info(self.identity(), &channel),
            })
        } else {
            None
        };

        Ok(ResolvedIdentifier {
            user_id,
            user_info: wrap_user_info(&user),
            chat,
        })
    }

    /// Users of the team whose name matches `query`.
    pub async fn search_users(&self, query: &str) -> BridgeResult<Vec<(UserId, UserInfo)>> {
        let client = self.client().await?;
        let users = client.search_users(query).await?;
        Ok(users
            .iter()
            .map(|user| (make_user_id(&self.identity().team_id, &user.id), wrap_user_info(user)))
            .collect())
    }
}
