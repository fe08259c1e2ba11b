//! Slackbridge daemon.
//!
//! Restores the configured Slack accounts into sessions, keeps them connected
//! and logs the normalized event stream until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use slackbridge::bridge::memory::{MemoryCredentialStore, MemoryEmojiDirectory, MemoryPortalDirectory};
use slackbridge::bridge::{
    login_from_account, BridgeConnector, ChannelBundle, ConnectorContext, ConsumerChannels,
    RemoteEventMeta, SessionPool, SessionState, SlackSession,
};
use slackbridge::common::{BridgeError, ReconnectConfig};
use slackbridge::config::{env, load_and_validate};
use slackbridge::msgconv::PlainTextConverter;
use slackbridge::slack::SlackClientFactory;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = env::get_config_path();
    let loaded = load_and_validate(&config_path);

    // Logging needs the configured level, so it starts after the load
    let level = loaded
        .as_ref()
        .map(|config| config.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .init();

    info!("Slackbridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from {}...", config_path);

    let config = loaded.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;
    for var in env::check_empty_env_vars() {
        warn!("Environment variable {} is set but empty", var);
    }

    info!("Configuration loaded successfully");
    info!("  Slack API: {}", config.slack.api_url);
    info!("  Accounts: {}", config.accounts.len());
    info!("  Backfill conversations: {}", config.bridge.backfill.conversation_count);

    // ============================================================
    // Connector and sessions
    // ============================================================

    let channels = ChannelBundle::new();
    let connector = BridgeConnector::new(ConnectorContext {
        config: config.bridge.clone(),
        portals: Arc::new(MemoryPortalDirectory::new()),
        emojis: Arc::new(MemoryEmojiDirectory::new()),
        credentials: Arc::new(MemoryCredentialStore::new()),
        converter: Arc::new(PlainTextConverter),
        api_factory: Arc::new(SlackClientFactory::new(config.slack.clone())),
        channels: channels.sessions,
    });
    let pool = Arc::new(SessionPool::new(connector));
    let shutdown = CancellationToken::new();
    let output_done = CancellationToken::new();

    let consumer = tokio::spawn(log_bridge_output(channels.consumer, output_done.clone()));

    let mut supervisors = Vec::new();
    for account in &config.accounts {
        let login = login_from_account(account);
        match pool.load(&login).await {
            Ok(session) => supervisors.push(tokio::spawn(supervise_connect(session, shutdown.clone()))),
            Err(e) => error!("Failed to restore login {}: {}", login.id, e),
        }
    }

    // ============================================================
    // Run until shutdown
    // ============================================================

    shutdown_signal().await;
    info!("Shutdown signal received - disconnecting sessions...");
    shutdown.cancel();

    for supervisor in supervisors {
        if let Err(e) = supervisor.await {
            warn!("Connect supervisor panicked: {}", e);
        }
    }

    match tokio::time::timeout(Duration::from_secs(10), pool.disconnect_all()).await {
        Ok(()) => info!("All sessions disconnected"),
        Err(_) => warn!("Timed out waiting for sessions to disconnect"),
    }
    output_done.cancel();

    if let Err(e) = consumer.await {
        warn!("Output logger panicked: {}", e);
    }

    info!("Exiting...");
    Ok(())
}

/// Connect a session, retrying transient failures with backoff.
///
/// Credential failures are final: the session is invalid and only a new
/// login can bring it back.
async fn supervise_connect(session: Arc<SlackSession>, shutdown: CancellationToken) {
    let mut backoff = ReconnectConfig::session_connect().backoff();

    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = session.connect() => result,
        };

        match result {
            Ok(()) => {
                info!("Session {} connected", session.login_id());
                return;
            }
            Err(e @ (BridgeError::InvalidCredentials { .. } | BridgeError::NotLoggedIn)) => {
                error!("Session {} cannot connect: {}", session.login_id(), e);
                return;
            }
            Err(BridgeError::ConnectAborted) => {
                debug!("Connect of {} aborted by disconnect", session.login_id());
                return;
            }
            Err(e) => {
                if session.state().await == SessionState::Invalid {
                    error!("Session {} was invalidated: {}", session.login_id(), e);
                    return;
                }
                let Some(delay) = backoff.next() else {
                    error!("Giving up on session {}: {}", session.login_id(), e);
                    return;
                };
                warn!(
                    "Failed to connect {}: {}. Retrying in {:.1} seconds...",
                    session.login_id(),
                    e,
                    delay.as_secs_f64()
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
}

/// Log everything the sessions publish. Without a local network attached the
/// daemon only reports what it would apply.
async fn log_bridge_output(mut consumer: ConsumerChannels, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(queued) = consumer.event_rx.recv() => {
                let event = &queued.event;
                event.meta().log_context.span().in_scope(|| {
                    info!(
                        login_id = %queued.login_id,
                        portal = %event.portal_key().id,
                        create_portal = event.should_create_portal(),
                        "Remote {}",
                        event.kind()
                    );
                });
                debug!(?event, "Remote event payload");
            }
            Some(update) = consumer.state_rx.recv() => {
                let state = &update.state;
                match state.display_message() {
                    Some(message) => warn!(
                        login_id = %update.login_id,
                        error = ?state.error,
                        "Bridge state {}: {}",
                        state.state_event,
                        message
                    ),
                    None => info!(login_id = %update.login_id, "Bridge state {}", state.state_event),
                }
            }
            else => break,
        }
    }
    debug!("Output logger ended");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
