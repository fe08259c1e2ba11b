//! Reconciliation syncs run after a session connects.

use std::collections::HashMap;

use tracing::{debug, info, trace, warn};

use crate::common::error::BridgeResult;
use crate::slack::api::SlackApi;
use crate::slack::types::{Channel, ConversationsParams, EmojiValue};
use crate::slackid::{parse_portal_id, timestamp_sort_key};

use super::chatinfo::{channel_chat_info, fetch_chat_info};
use super::directory::{CustomEmoji, EmojiDirectory, PortalDirectory};
use super::meta::Identity;
use super::types::{ChatInfo, Portal};

const CONVERSATION_TYPES: [&str; 4] = ["public_channel", "private_channel", "mpim", "im"];

/// Page size used once more than this many conversations remain.
const LARGE_REMAINDER: usize = 200;
const LARGE_PAGE_SIZE: usize = 100;

/// Outcome of a channel sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Existing rooms whose metadata was refreshed.
    pub refreshed: usize,
    /// Rooms created for channels that had none.
    pub created: usize,
}

/// Create the team room or refresh its metadata.
pub async fn sync_team_portal(
    portals: &dyn PortalDirectory,
    identity: &Identity,
    info: &ChatInfo,
) -> BridgeResult<Portal> {
    let key = identity.team_portal_key();
    let portal = portals.get_or_create_portal(&key).await?;
    if portal.is_materialized() {
        portals.update_info(&identity.login_id, &key, info).await?;
    } else {
        portals.create_room(&identity.login_id, &key, info).await?;
    }
    Ok(portals.get_existing_portal(&key).await?.unwrap_or(portal))
}

async fn list_conversations(client: &dyn SlackApi, conversation_count: usize) -> BridgeResult<HashMap<String, Channel>> {
    let mut server_info = HashMap::new();
    let mut remaining = conversation_count;
    let mut cursor = String::new();

    debug!(total_limit = conversation_count, "Fetching conversation list for sync");
    while remaining > 0 {
        let limit = if remaining > LARGE_REMAINDER {
            LARGE_PAGE_SIZE
        } else {
            remaining
        };
        let params = ConversationsParams {
            types: CONVERSATION_TYPES.iter().map(|t| t.to_string()).collect(),
            limit,
            cursor: cursor.clone(),
        };
        let (chunk, next_cursor) = client.conversations_for_user(&params).await?;
        debug!(chunk_size = chunk.len(), "Fetched chunk of conversations");

        let chunk_len = chunk.len();
        for channel in chunk {
            // DMs nobody has written in yet
            if channel.is_im && channel.latest.is_none() {
                trace!(channel_id = %channel.id, "Skipping unopened DM");
                continue;
            }
            server_info.insert(channel.id.clone(), channel);
        }

        if next_cursor.is_empty() || chunk_len == 0 {
            break;
        }
        remaining = remaining.saturating_sub(chunk_len);
        cursor = next_cursor;
    }

    Ok(server_info)
}

/// Bring the login's rooms in line with the conversations it is in.
///
/// Rooms that already exist get fresh metadata; conversations without a room
/// get one, least recently read first. Listing is skipped for `xoxs` tokens,
/// which cannot call it.
pub async fn sync_channels(
    client: &dyn SlackApi,
    identity: &Identity,
    portals: &dyn PortalDirectory,
    token: &str,
    conversation_count: usize,
) -> BridgeResult<SyncReport> {
    let mut server_info = if token.starts_with("xoxs") {
        debug!("Skipping conversation listing for workspace token");
        HashMap::new()
    } else {
        list_conversations(client, conversation_count).await?
    };

    let mut report = SyncReport::default();

    for portal in portals.portals_for_login(&identity.login_id).await? {
        let Ok((_, channel_id)) = parse_portal_id(&portal.key.id) else {
            continue;
        };
        if !portal.is_materialized() {
            continue;
        }
        match fetch_chat_info(client, identity, &channel_id).await {
            Ok(info) => match portals.update_info(&identity.login_id, &portal.key, &info).await {
                Ok(()) => report.refreshed += 1,
                Err(e) => warn!(channel_id = %channel_id, "Failed to update existing portal: {}", e),
            },
            Err(e) => warn!(channel_id = %channel_id, "Failed to fetch chat info for existing portal: {}", e),
        }
        server_info.remove(&channel_id);
    }

    let mut remaining: Vec<Channel> = server_info.into_values().collect();
    remaining.sort_by_key(|channel| timestamp_sort_key(channel.last_read.as_deref().unwrap_or_default()));

    for channel in &remaining {
        let key = identity.make_portal_key(channel);
        if let Err(e) = portals.get_or_create_portal(&key).await {
            warn!(channel_id = %channel.id, "Failed to get portal for channel: {}", e);
            continue;
        }
        match portals
            .create_room(&identity.login_id, &key, &channel_chat_info(identity, channel))
            .await
        {
            Ok(()) => report.created += 1,
            Err(e) => warn!(channel_id = %channel.id, "Failed to create room for channel: {}", e),
        }
    }

    info!(
        refreshed = report.refreshed,
        created = report.created,
        "Channel sync finished"
    );
    Ok(report)
}

/// Replace the team's custom emoji catalog with the server's list.
pub async fn sync_emojis(client: &dyn SlackApi, team_id: &str, emojis: &dyn EmojiDirectory) -> BridgeResult<usize> {
    let list = client.emoji_list().await?;
    let entries: Vec<CustomEmoji> = list
        .into_iter()
        .map(|(name, raw)| CustomEmoji {
            team_id: team_id.to_string(),
            value: EmojiValue::parse(&raw),
            name,
        })
        .collect();
    let count = entries.len();

    emojis.replace_catalog(team_id, entries).await?;
    debug!(count, "Synced custom emoji");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::memory::{MemoryEmojiDirectory, MemoryPortalDirectory};
    use crate::bridge::testutil::MockSlackApi;
    use crate::bridge::types::PortalKey;
    use crate::slack::types::Message;
    use crate::slackid::{make_portal_id, make_user_login_id};

    fn identity() -> Identity {
        Identity {
            team_id: "T1".into(),
            user_id: "U1".into(),
            login_id: make_user_login_id("T1", "U1"),
        }
    }

    fn channel(id: &str, last_read: &str) -> Channel {
        Channel {
            id: id.into(),
            name: id.to_lowercase(),
            is_channel: true,
            last_read: Some(last_read.to_string()).filter(|ts| !ts.is_empty()),
            ..Channel::default()
        }
    }

    #[tokio::test]
    async fn test_only_absent_channels_created_oldest_first() {
        let me = identity();
        let portals = MemoryPortalDirectory::new();
        let client = MockSlackApi::new();

        // C2 already has a room
        let existing = PortalKey::shared(make_portal_id("T1", "C2"));
        portals.get_or_create_portal(&existing).await.unwrap();
        portals.create_room(&me.login_id, &existing, &ChatInfo::default()).await.unwrap();
        client.set_channel(channel("C2", "1.0"));

        client.set_conversation_pages(vec![
            (
                vec![channel("C1", "1700000300.000000"), channel("C2", "1700000000.000000")],
                "next".into(),
            ),
            (
                vec![
                    channel("C3", "1700000100.000000"),
                    channel("C4", "999999999.000000"),
                    Channel {
                        id: "D1".into(),
                        is_im: true,
                        user: Some("U2".into()),
                        ..Channel::default()
                    },
                ],
                String::new(),
            ),
        ]);

        let report = sync_channels(&client, &me, &portals, "xoxc-token", 50).await.unwrap();
        assert_eq!(report, SyncReport { refreshed: 1, created: 3 });

        let created: Vec<PortalKey> = portals.created_rooms().await;
        let ids: Vec<&str> = created.iter().map(|key| key.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                make_portal_id("T1", "C2").as_str(),
                make_portal_id("T1", "C4").as_str(),
                make_portal_id("T1", "C3").as_str(),
                make_portal_id("T1", "C1").as_str(),
            ]
        );
        assert!(client.calls().contains(&"conversations_for_user:50:".to_string()));
        assert!(client.calls().contains(&"conversations_for_user:48:next".to_string()));
    }

    #[tokio::test]
    async fn test_open_dm_is_kept() {
        let me = identity();
        let portals = MemoryPortalDirectory::new();
        let client = MockSlackApi::new();
        client.set_conversation_pages(vec![(
            vec![Channel {
                id: "D1".into(),
                is_im: true,
                user: Some("U2".into()),
                latest: Some(Message {
                    ts: "1.000000".into(),
                    ..Message::default()
                }),
                ..Channel::default()
            }],
            String::new(),
        )]);

        sync_channels(&client, &me, &portals, "xoxc-token", 10).await.unwrap();

        let created = portals.created_rooms().await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].receiver, Some(me.login_id.clone()));
    }

    #[tokio::test]
    async fn test_large_count_uses_fixed_page_size() {
        let client = MockSlackApi::new();
        client.set_conversation_pages(vec![(vec![channel("C1", "")], "more".into())]);

        sync_channels(&client, &identity(), &MemoryPortalDirectory::new(), "xoxc-token", 500)
            .await
            .unwrap();

        let calls = client.calls();
        assert_eq!(calls[0], "conversations_for_user:100:");
        // second page is empty, which ends the listing
        assert_eq!(calls[1], "conversations_for_user:100:more");
        assert_eq!(client.calls_to("conversations_for_user"), 2);
    }

    #[tokio::test]
    async fn test_workspace_token_skips_listing() {
        let client = MockSlackApi::new();
        let report = sync_channels(&client, &identity(), &MemoryPortalDirectory::new(), "xoxs-token", 100)
            .await
            .unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(client.calls_to("conversations_for_user"), 0);
    }

    #[tokio::test]
    async fn test_team_portal_created_then_refreshed() {
        let me = identity();
        let portals = MemoryPortalDirectory::new();
        let info = ChatInfo {
            name: Some("Acme".into()),
            ..ChatInfo::default()
        };

        let first = sync_team_portal(&portals, &me, &info).await.unwrap();
        assert!(first.is_materialized());

        let renamed = ChatInfo {
            name: Some("Acme Corp".into()),
            ..ChatInfo::default()
        };
        let second = sync_team_portal(&portals, &me, &renamed).await.unwrap();
        assert_eq!(second.room_id, first.room_id);
        assert_eq!(second.info.name.as_deref(), Some("Acme Corp"));
        assert_eq!(portals.created_rooms().await.len(), 1);
    }

    #[tokio::test]
    async fn test_emoji_sync_keeps_aliases() {
        let client = MockSlackApi::new();
        let emojis = MemoryEmojiDirectory::new();
        client.set_emoji(HashMap::from([
            ("parrot".to_string(), "https://emoji.example/parrot.gif".to_string()),
            ("party".to_string(), "alias:parrot".to_string()),
        ]));

        assert_eq!(sync_emojis(&client, "T1", &emojis).await.unwrap(), 2);
        let party = emojis.get_by_id("T1", "party").await.unwrap().unwrap();
        assert_eq!(party.value, EmojiValue::Alias("parrot".into()));
        assert_eq!(emojis.catalog_size("T1").await, 2);
    }
}
