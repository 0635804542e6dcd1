//! Bot service: HTTP server (health + Telegram webhook) and the inbound dispatch loop.
//!
//! Inbound messages from all channels land on one mpsc queue and are processed by a
//! single task, so events from the same contact are handled in arrival order. The
//! resulting sends run in spawned tasks with logged outcomes; a slow or failing send
//! for one contact never blocks dispatch for another.

use crate::catalog::MenuCatalog;
use crate::channels::{
    ChannelHandle, ChannelRegistry, InboundMessage, TelegramChannel, TelegramUpdate,
};
use crate::config::{self, Config};
use crate::dispatch::{normalize, DispatchEngine, MenuRouting, OutboundAction};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shared state for the bot service (config, engine, channels).
#[derive(Clone)]
pub struct ServiceState {
    pub config: Arc<Config>,
    pub catalog: Arc<MenuCatalog>,
    pub engine: Arc<DispatchEngine>,
    pub channel_registry: Arc<ChannelRegistry>,
    /// Sender for inbound channel messages (e.g. Telegram webhook POSTs). Processor task receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    /// In-process channel connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    /// Telegram connector when configured; used by the webhook handler to ack
    /// callback queries and by shutdown to remove the webhook.
    pub telegram: Option<Arc<TelegramChannel>>,
    /// RFC 3339 timestamp of service start, reported by the health endpoint.
    pub started_at: String,
}

/// Execute one batch of outbound actions. Each action runs in its own task:
/// actions are independent siblings, so a failed admin notification never
/// suppresses the user-facing reply (and vice versa). Failures are logged, not retried.
fn spawn_actions(state: &ServiceState, channel_id: &str, actions: Vec<OutboundAction>) {
    for action in actions {
        let state = state.clone();
        let channel_id = channel_id.to_string();
        tokio::spawn(async move {
            let Some(handle) = state.channel_registry.get(&channel_id).await else {
                log::warn!("dispatch: no channel registered with id {}", channel_id);
                return;
            };
            match action {
                OutboundAction::SendText { to, text } => {
                    if let Err(e) = handle.send_message(&to, &text).await {
                        log::warn!("dispatch: send_message to {} failed: {}", to, e);
                    }
                }
                OutboundAction::SendMenu { to, menu_id } => {
                    let Some(menu) = state.catalog.get_menu(&menu_id) else {
                        log::warn!("dispatch: menu {} not in catalog", menu_id);
                        return;
                    };
                    if let Err(e) = handle.send_menu(&to, menu).await {
                        log::warn!("dispatch: send_menu to {} failed: {}", to, e);
                    }
                }
            }
        });
    }
}

/// Process one inbound channel message: normalize, run the dispatch engine, execute
/// the resulting actions.
async fn process_inbound_message(state: ServiceState, msg: InboundMessage) {
    let event = normalize(&msg);
    log::debug!("inbound from {}: {:?}", msg.conversation_id, event);
    let actions = state.engine.on_event(event).await;
    spawn_actions(&state, &msg.channel_id, actions);
}

/// Run the bot service; binds to config.server.bind:config.server.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_server(config: Config) -> Result<()> {
    let admin_address = config::resolve_admin_address(&config);
    if admin_address.is_none() {
        log::warn!("no admin address configured; admin notifications are disabled");
    }

    let catalog = Arc::new(MenuCatalog::default_catalog());
    let routing = MenuRouting {
        default_menu: config.bot.default_menu.clone(),
        admin_menu: config.bot.admin_menu.clone().filter(|s| !s.trim().is_empty()),
        admin_address,
    };
    if catalog.get_menu(&routing.default_menu).is_none() {
        anyhow::bail!("bot.defaultMenu {:?} is not a known menu", routing.default_menu);
    }
    let engine = Arc::new(DispatchEngine::new(catalog.clone(), routing));

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let channel_registry = Arc::new(ChannelRegistry::new());
    let channel_tasks = Arc::new(tokio::sync::RwLock::new(Vec::new()));

    let telegram_token = config::resolve_telegram_token(&config);
    let webhook_url = config.channels.telegram.webhook_url.clone();
    let telegram: Option<Arc<TelegramChannel>> = if let Some(token) = telegram_token {
        let telegram = Arc::new(TelegramChannel::new(Some(token)));
        if let Some(ref url) = webhook_url {
            let secret = config.channels.telegram.webhook_secret.as_deref();
            if let Err(e) = telegram.set_webhook(url, secret).await {
                log::warn!("telegram set_webhook failed: {}", e);
            } else {
                log::info!("telegram channel registered (webhook mode): {}", url);
            }
        } else {
            let handle = telegram.clone().start_inbound(inbound_tx.clone());
            channel_tasks.write().await.push(handle);
            log::info!("telegram channel registered and getUpdates loop started");
        }
        channel_registry
            .register(telegram.id().to_string(), telegram.clone())
            .await;
        Some(telegram)
    } else {
        log::warn!("no telegram bot token configured; telegram channel disabled");
        None
    };

    let state = ServiceState {
        config: Arc::new(config),
        catalog,
        engine,
        channel_registry: channel_registry.clone(),
        inbound_tx,
        channel_tasks: channel_tasks.clone(),
        telegram: telegram.clone(),
        started_at: chrono::Utc::now().to_rfc3339(),
    };

    {
        let state_inbound = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                process_inbound_message(state_inbound.clone(), msg).await;
            }
        });
    }

    // Explicit bootstrap: once the transport is up, send the admin their menu.
    if telegram.is_some() {
        let startup = state.engine.startup_actions().await;
        if !startup.is_empty() {
            log::info!("sending admin startup notice");
            spawn_actions(&state, "telegram", startup);
        }
    }

    let app = Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state.clone());

    let bind = state.config.server.bind.trim();
    let bind_addr = format!("{}:{}", bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("bot service listening on {}", bind_addr);

    let webhook_for_shutdown = if webhook_url.is_some() { telegram } else { None };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            channel_registry,
            channel_tasks,
            webhook_for_shutdown,
        ))
        .await
        .context("bot service exited")?;
    log::info!("bot service stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, removes the Telegram webhook if used, then awaits
/// in-process channel tasks.
async fn shutdown_signal(
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");

    for id in channel_registry.ids().await {
        if let Some(handle) = channel_registry.get(&id).await {
            handle.stop();
        }
    }

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// POST /telegram/webhook — receives Telegram update JSON; verifies optional secret,
/// acks callback queries, pushes the inbound message for dispatch.
async fn telegram_webhook(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    if let (Some(cq), Some(telegram)) = (update.callback_query.as_ref(), state.telegram.as_ref()) {
        if let Err(e) = telegram.answer_callback_query(&cq.id).await {
            log::debug!("telegram answerCallbackQuery failed: {}", e);
        }
    }
    let Some(inbound) = update.to_inbound("telegram") else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<ServiceState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.server.port,
        "startedAt": state.started_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MenuDefinition;
    use crate::channels::{ChannelError, ChannelHandle};
    use crate::dispatch::MenuRouting;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const ADMIN: &str = "admin-chat";

    /// Records every send attempt and fails those addressed to `fail_to`.
    struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
        fail_to: Option<String>,
    }

    #[async_trait]
    impl ChannelHandle for RecordingChannel {
        fn id(&self) -> &str {
            "test"
        }

        fn stop(&self) {}

        async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), text.to_string()));
            if self.fail_to.as_deref() == Some(conversation_id) {
                return Err(ChannelError::Api("simulated send failure".to_string()));
            }
            Ok(())
        }

        async fn send_menu(
            &self,
            conversation_id: &str,
            menu: &MenuDefinition,
        ) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), format!("menu:{}", menu.id)));
            Ok(())
        }
    }

    async fn test_state(fail_to: Option<&str>) -> (ServiceState, Arc<RecordingChannel>) {
        let catalog = Arc::new(MenuCatalog::default_catalog());
        let engine = Arc::new(DispatchEngine::new(
            catalog.clone(),
            MenuRouting {
                default_menu: "full".to_string(),
                admin_menu: None,
                admin_address: Some(ADMIN.to_string()),
            },
        ));
        let channel = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
            fail_to: fail_to.map(|s| s.to_string()),
        });
        let registry = Arc::new(ChannelRegistry::new());
        registry.register("test".to_string(), channel.clone()).await;
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let state = ServiceState {
            config: Arc::new(Config::default()),
            catalog,
            engine,
            channel_registry: registry,
            inbound_tx,
            channel_tasks: Arc::new(tokio::sync::RwLock::new(Vec::new())),
            telegram: None,
            started_at: chrono::Utc::now().to_rfc3339(),
        };
        (state, channel)
    }

    async fn wait_for_sends(channel: &RecordingChannel, n: usize) -> Vec<(String, String)> {
        for _ in 0..100 {
            {
                let sent = channel.sent.lock().unwrap();
                if sent.len() >= n {
                    return sent.clone();
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {} sends, got {:?}", n, channel.sent.lock().unwrap());
    }

    #[tokio::test]
    async fn failed_admin_send_leaves_user_send_intact() {
        let (state, channel) = test_state(Some(ADMIN)).await;
        let msg = InboundMessage {
            channel_id: "test".to_string(),
            conversation_id: "A".to_string(),
            text: String::new(),
            selected_option_id: Some("contact_admin".to_string()),
        };
        process_inbound_message(state, msg).await;
        let sent = wait_for_sends(&channel, 2).await;
        // Both sends were attempted; the admin failure did not suppress the user reply.
        assert!(sent.iter().any(|(to, _)| to == "A"));
        assert!(sent.iter().any(|(to, _)| to == ADMIN));
    }

    #[tokio::test]
    async fn inbound_free_text_sends_menu_via_channel() {
        let (state, channel) = test_state(None).await;
        let msg = InboundMessage {
            channel_id: "test".to_string(),
            conversation_id: "B".to_string(),
            text: "hello".to_string(),
            selected_option_id: None,
        };
        process_inbound_message(state, msg).await;
        let sent = wait_for_sends(&channel, 1).await;
        assert_eq!(sent[0], ("B".to_string(), "menu:full".to_string()));
    }
}
