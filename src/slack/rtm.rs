//! RTM websocket connection manager.
//!
//! One task per session: it calls `rtm.connect`, opens the websocket, decodes
//! frames into [`SlackEvent`]s and reconnects with backoff when the socket
//! drops. Rejected credentials end the task after an
//! [`SlackEvent::InvalidAuth`]; so does cancellation. The task runs on the
//! caller's [`TaskTracker`] so a disconnect can wait for the socket to close.

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, Duration, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::common::reconnect::ReconnectConfig;

use super::api::{RtmCommand, RtmConnection};
use super::client::SlackClient;
use super::events::{decode_frame, SlackEvent};

/// Capacity of the event queue between the socket and the consume loop.
const EVENT_BUFFER: usize = 256;

const PING_INTERVAL: Duration = Duration::from_secs(30);

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a socket session ended.
#[derive(Debug)]
enum SocketExit {
    Cancelled,
    /// Nobody is reading events anymore.
    ReceiverGone,
    Dropped(String),
}

/// Outgoing side shared across reconnects.
struct Outgoing {
    commands: mpsc::UnboundedReceiver<RtmCommand>,
    open: bool,
    next_id: u64,
}

impl Outgoing {
    fn frame(&mut self, command: RtmCommand) -> String {
        let id = self.next_id;
        self.next_id += 1;
        match command {
            RtmCommand::Typing { channel } => {
                json!({ "id": id, "type": "typing", "channel": channel }).to_string()
            }
        }
    }

    fn ping(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        json!({ "id": id, "type": "ping" }).to_string()
    }
}

/// Start the connection manager for `client` on `tracker`.
pub(crate) fn spawn(client: SlackClient, cancel: CancellationToken, tracker: &TaskTracker) -> RtmConnection {
    let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
    let (outgoing, commands) = mpsc::unbounded_channel();

    tracker.spawn(run_manager(
        client,
        cancel,
        event_tx,
        Outgoing {
            commands,
            open: true,
            next_id: 1,
        },
    ));

    RtmConnection { events, outgoing }
}

async fn run_manager(
    client: SlackClient,
    cancel: CancellationToken,
    events: mpsc::Sender<SlackEvent>,
    mut outgoing: Outgoing,
) {
    let schedule = ReconnectConfig::rtm();
    let mut backoff = schedule.backoff();
    let mut attempt: u32 = 0;
    let mut connection_count: u32 = 0;

    loop {
        attempt += 1;
        let connecting = SlackEvent::Connecting {
            attempt,
            connection_count,
        };
        if events.send(connecting).await.is_err() {
            break;
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.rtm_connect() => result,
        };

        match connected {
            Err(e) if e.is_credential_error() => {
                warn!("RTM connect rejected credentials: {}", e);
                let _ = events.send(SlackEvent::InvalidAuth).await;
                break;
            }
            Err(e) => warn!(attempt, "RTM connect failed: {}", e),
            Ok(info) => {
                let handshake = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = timeout(HANDSHAKE_TIMEOUT, connect_async(info.url.as_str())) => result,
                };
                match handshake {
                    Ok(Ok((socket, _))) => {
                        connection_count += 1;
                        attempt = 0;
                        backoff = schedule.backoff();
                        info!(connection_count, "RTM websocket connected");

                        let connected = SlackEvent::Connected {
                            team_id: info.team.id,
                            user_id: info.self_user.id,
                        };
                        if events.send(connected).await.is_err() {
                            break;
                        }

                        match run_socket(socket, &cancel, &events, &mut outgoing).await {
                            SocketExit::Cancelled | SocketExit::ReceiverGone => break,
                            SocketExit::Dropped(reason) => warn!("RTM websocket dropped: {}", reason),
                        }
                    }
                    Ok(Err(e)) => warn!(attempt, "RTM websocket handshake failed: {}", e),
                    Err(_) => warn!(attempt, "RTM websocket handshake timed out after {:?}", HANDSHAKE_TIMEOUT),
                }
            }
        }

        let delay = backoff.next().unwrap_or(schedule.max_delay);
        debug!("Reconnecting RTM in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    debug!("RTM connection manager stopped");
}

async fn run_socket<S>(
    socket: WebSocketStream<S>,
    cancel: &CancellationToken,
    events: &mpsc::Sender<SlackEvent>,
    outgoing: &mut Outgoing,
) -> SocketExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return SocketExit::Cancelled;
            }

            command = outgoing.commands.recv(), if outgoing.open => {
                let Some(command) = command else {
                    outgoing.open = false;
                    continue;
                };
                let frame = outgoing.frame(command);
                if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                    return SocketExit::Dropped(e.to_string());
                }
            }

            _ = ping.tick() => {
                let frame = outgoing.ping();
                if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                    return SocketExit::Dropped(e.to_string());
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match decode_frame(text.as_str()) {
                    Ok(Some(event)) => {
                        if events.send(event).await.is_err() {
                            return SocketExit::ReceiverGone;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to decode RTM frame: {}", e),
                },
                Some(Ok(WsMessage::Ping(payload))) => {
                    if let Err(e) = sink.send(WsMessage::Pong(payload)).await {
                        return SocketExit::Dropped(e.to_string());
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    return SocketExit::Dropped(format!("closed by server: {:?}", frame));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SocketExit::Dropped(e.to_string()),
                None => return SocketExit::Dropped("stream ended".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlackConfig;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SlackClient {
        let config = SlackConfig {
            api_url: format!("{}/api", server.uri()),
            request_timeout_secs: 5,
        };
        SlackClient::new(&config, "xoxp-test", None).unwrap()
    }

    async fn next_event(connection: &mut RtmConnection) -> SlackEvent {
        timeout(Duration::from_secs(5), connection.events.recv())
            .await
            .expect("timed out waiting for RTM event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_invalid_auth_stops_manager() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rtm.connect"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "invalid_auth"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut connection = spawn(client_for(&server), CancellationToken::new(), &TaskTracker::new());

        assert!(matches!(
            next_event(&mut connection).await,
            SlackEvent::Connecting { attempt: 1, connection_count: 0 }
        ));
        assert_eq!(next_event(&mut connection).await, SlackEvent::InvalidAuth);
        let closed = timeout(Duration::from_secs(5), connection.events.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_connects_and_forwards_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}/", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            socket
                .send(WsMessage::Text(r#"{"type":"hello"}"#.into()))
                .await
                .unwrap();
            socket
                .send(WsMessage::Text(
                    r#"{"type":"user_typing","channel":"C1","user":"U2"}"#.into(),
                ))
                .await
                .unwrap();
            // Keep the socket open until the client goes away
            while let Some(Ok(_)) = socket.next().await {}
        });

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rtm.connect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "url": ws_url,
                "self": {"id": "U1"},
                "team": {"id": "T1"}
            })))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let mut connection = spawn(client_for(&server), cancel.clone(), &TaskTracker::new());

        assert!(matches!(next_event(&mut connection).await, SlackEvent::Connecting { .. }));
        assert_eq!(
            next_event(&mut connection).await,
            SlackEvent::Connected {
                team_id: "T1".into(),
                user_id: "U1".into()
            }
        );
        assert_eq!(next_event(&mut connection).await, SlackEvent::Hello {});
        assert_eq!(
            next_event(&mut connection).await,
            SlackEvent::UserTyping {
                channel: "C1".into(),
                user: "U2".into()
            }
        );

        cancel.cancel();
        let closed = timeout(Duration::from_secs(5), async {
            while connection.events.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_handshake() {
        // Accepts TCP but never answers the websocket upgrade
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (_tcp, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rtm.connect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "url": ws_url,
                "self": {"id": "U1"},
                "team": {"id": "T1"}
            })))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut connection = spawn(client_for(&server), cancel.clone(), &tracker);
        assert!(matches!(next_event(&mut connection).await, SlackEvent::Connecting { .. }));

        // let the manager reach the handshake
        sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        tracker.close();

        assert!(timeout(Duration::from_secs(3), tracker.wait()).await.is_ok());
        assert!(connection.events.recv().await.is_none());
    }

    #[test]
    fn test_outgoing_frames_have_increasing_ids() {
        let (_tx, commands) = mpsc::unbounded_channel();
        let mut outgoing = Outgoing {
            commands,
            open: true,
            next_id: 1,
        };

        let typing: serde_json::Value = serde_json::from_str(&outgoing.frame(RtmCommand::Typing {
            channel: "C1".into(),
        }))
        .unwrap();
        let ping: serde_json::Value = serde_json::from_str(&outgoing.ping()).unwrap();

        assert_eq!(typing["type"], "typing");
        assert_eq!(typing["channel"], "C1");
        assert_eq!(typing["id"], 1);
        assert_eq!(ping["type"], "ping");
        assert_eq!(ping["id"], 2);
    }
}
