//! Event envelopes: target room and sender of a remote event.

use tracing::trace;

use crate::common::error::{BridgeError, BridgeResult};
use crate::slack::types::Channel;
use crate::slackid::{
    make_message_id, make_portal_id, make_team_portal_id, make_user_id, parse_slack_timestamp,
    PortalId, UserLoginId,
};

use super::directory::PortalDirectory;
use super::event::{EventMeta, LogContext, RemoteEventKind};
use super::types::{EventSender, PortalKey};

/// The account a session acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub team_id: String,
    pub user_id: String,
    pub login_id: UserLoginId,
}

impl Identity {
    pub fn portal_id(&self, channel_id: &str) -> PortalId {
        make_portal_id(&self.team_id, channel_id)
    }

    pub fn team_portal_key(&self) -> PortalKey {
        PortalKey::shared(make_team_portal_id(&self.team_id))
    }

    /// DMs and group DMs belong to this login; other channels are shared.
    pub fn make_portal_key(&self, channel: &Channel) -> PortalKey {
        let id = self.portal_id(&channel.id);
        if channel.is_direct() {
            PortalKey::with_receiver(id, self.login_id.clone())
        } else {
            PortalKey::shared(id)
        }
    }

    pub fn make_event_sender(&self, sender_id: &str) -> EventSender {
        let is_from_me = sender_id == self.user_id;
        EventSender {
            sender: Some(make_user_id(&self.team_id, sender_id)),
            is_from_me,
            sender_login: is_from_me.then(|| self.login_id.clone()),
        }
    }

    /// Build the envelope of an event in `channel_id`.
    ///
    /// With an inline descriptor the key is derived directly. Otherwise the
    /// portal must already be known to `portals`; nothing is invented for an
    /// unknown channel.
    pub async fn make_event_meta(
        &self,
        portals: &dyn PortalDirectory,
        kind: RemoteEventKind,
        channel_id: &str,
        channel: Option<&Channel>,
        sender_id: Option<&str>,
        timestamp: Option<&str>,
    ) -> BridgeResult<EventMeta> {
        let portal_key = match channel {
            Some(channel) => self.make_portal_key(channel),
            None => portals
                .find_portal_receiver(&self.portal_id(channel_id), &self.login_id)
                .await?
                .ok_or_else(|| BridgeError::UnknownChannel {
                    channel_id: channel_id.to_string(),
                })?,
        };

        let sender = sender_id
            .filter(|id| !id.is_empty())
            .map(|id| self.make_event_sender(id))
            .unwrap_or_default();

        let timestamp = timestamp.filter(|ts| !ts.is_empty());
        let id = timestamp.map(|ts| make_message_id(&self.team_id, channel_id, ts));
        let parsed = timestamp.and_then(parse_slack_timestamp);
        if timestamp.is_some() && parsed.is_none() {
            trace!(channel_id, "Event timestamp did not parse");
        }

        Ok(EventMeta {
            kind,
            portal_key,
            sender,
            timestamp: parsed,
            id,
            create_portal: false,
            log_context: LogContext::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::memory::MemoryPortalDirectory;
    use crate::slackid::make_user_login_id;

    fn identity() -> Identity {
        Identity {
            team_id: "T1".into(),
            user_id: "U1".into(),
            login_id: make_user_login_id("T1", "U1"),
        }
    }

    #[test]
    fn test_dm_portal_key_has_receiver() {
        let me = identity();
        let dm = Channel {
            id: "D1".into(),
            is_im: true,
            ..Channel::default()
        };
        let public = Channel {
            id: "C1".into(),
            is_channel: true,
            ..Channel::default()
        };

        assert_eq!(me.make_portal_key(&dm).receiver, Some(me.login_id.clone()));
        assert_eq!(me.make_portal_key(&public).receiver, None);
        assert_eq!(me.make_portal_key(&public).id, make_portal_id("T1", "C1"));
    }

    #[test]
    fn test_sender_from_me() {
        let me = identity();
        let own = me.make_event_sender("U1");
        assert!(own.is_from_me);
        assert_eq!(own.sender_login, Some(me.login_id.clone()));

        let other = me.make_event_sender("U2");
        assert!(!other.is_from_me);
        assert_eq!(other.sender, Some(make_user_id("T1", "U2")));
        assert!(other.sender_login.is_none());
    }

    #[tokio::test]
    async fn test_unknown_channel_is_an_error() {
        let portals = MemoryPortalDirectory::new();
        let err = identity()
            .make_event_meta(&portals, RemoteEventKind::Typing, "C404", None, Some("U2"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownChannel { channel_id } if channel_id == "C404"));
    }

    #[tokio::test]
    async fn test_meta_from_known_portal() {
        let portals = MemoryPortalDirectory::new();
        let me = identity();
        portals
            .get_or_create_portal(&PortalKey::shared(make_portal_id("T1", "C1")))
            .await
            .unwrap();

        let meta = me
            .make_event_meta(
                &portals,
                RemoteEventKind::Message,
                "C1",
                None,
                Some("U2"),
                Some("1700000000.000100"),
            )
            .await
            .unwrap();

        assert_eq!(meta.portal_key, PortalKey::shared(make_portal_id("T1", "C1")));
        assert_eq!(meta.id, Some(make_message_id("T1", "C1", "1700000000.000100")));
        assert_eq!(meta.timestamp.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(meta.sender.sender, Some(make_user_id("T1", "U2")));
    }

    #[tokio::test]
    async fn test_meta_without_sender_or_timestamp() {
        let portals = MemoryPortalDirectory::new();
        let channel = Channel {
            id: "C2".into(),
            ..Channel::default()
        };
        let meta = identity()
            .make_event_meta(&portals, RemoteEventKind::ChatInfoChange, "C2", Some(&channel), None, None)
            .await
            .unwrap();
        assert_eq!(meta.sender, EventSender::default());
        assert!(meta.id.is_none());
        assert!(meta.timestamp.is_none());
    }
}
