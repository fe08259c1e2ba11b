//! Room metadata built from Slack channel and team descriptors.

use crate::common::error::BridgeResult;
use crate::slack::api::SlackApi;
use crate::slack::types::{Channel, Team, User};

use super::meta::Identity;
use super::types::{ChatInfo, ChatMember, Membership, RoomType, UserInfo};

/// Metadata of the team's parent room.
pub fn team_chat_info(team: &Team) -> ChatInfo {
    let avatar = (!team.icon.image_default && !team.icon.image_230.is_empty())
        .then(|| team.icon.image_230.clone());

    ChatInfo {
        name: Some(team.name.clone()).filter(|name| !name.is_empty()),
        avatar,
        room_type: Some(RoomType::Space),
        ..ChatInfo::default()
    }
}

fn joined(identity: &Identity, user_id: &str) -> ChatMember {
    ChatMember {
        sender: identity.make_event_sender(user_id),
        membership: Membership::Join,
        prev_membership: None,
    }
}

/// Metadata of a channel, DM or group DM.
///
/// DMs get no name (clients name them after the other member) and no parent;
/// channels hang off the team room.
pub fn channel_chat_info(identity: &Identity, channel: &Channel) -> ChatInfo {
    let room_type = if channel.is_im {
        RoomType::Dm
    } else if channel.is_mpim {
        RoomType::GroupDm
    } else {
        RoomType::Default
    };

    let topic = [channel.topic.as_ref(), channel.purpose.as_ref()]
        .into_iter()
        .flatten()
        .map(|topic| topic.value.as_str())
        .find(|value| !value.is_empty())
        .map(str::to_string);

    let members = match &channel.user {
        Some(counterpart) if channel.is_im => Some(vec![
            joined(identity, &identity.user_id),
            joined(identity, counterpart),
        ]),
        _ if !channel.members.is_empty() => Some(
            channel
                .members
                .iter()
                .map(|member| joined(identity, member))
                .collect(),
        ),
        _ => None,
    };

    let direct = channel.is_direct();
    ChatInfo {
        name: (!direct && !channel.name.is_empty()).then(|| channel.name.clone()),
        topic,
        avatar: None,
        members,
        room_type: Some(room_type),
        parent: (!direct).then(|| identity.team_portal_key().id),
    }
}

/// Fetch a channel from the API and build its metadata.
pub async fn fetch_chat_info(client: &dyn SlackApi, identity: &Identity, channel_id: &str) -> BridgeResult<ChatInfo> {
    let channel = client.conversation_info(channel_id).await?;
    Ok(channel_chat_info(identity, &channel))
}

pub fn wrap_user_info(user: &User) -> UserInfo {
    UserInfo {
        name: user.display_name().to_string(),
        avatar: Some(user.profile.image_192.clone()).filter(|url| !url.is_empty()),
        is_bot: user.is_bot,
    }
}
