//! Telegram channel: long-poll getUpdates and sendMessage via Bot API.
//!
//! Menus are rendered as inline keyboards: button menus as one row, list menus as
//! one button per row. A callback query carries the selected option id and is
//! acknowledged with answerCallbackQuery before being queued for dispatch.

use crate::catalog::{MenuDefinition, RenderMode};
use crate::channels::inbound::InboundMessage;
use crate::channels::registry::{ChannelError, ChannelHandle};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Inline-keyboard button press: `data` is the callback_data we set when rendering
/// the menu (the stable option id).
#[derive(Debug, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

impl TelegramUpdate {
    /// Map an update into the raw inbound shape the dispatch engine normalizes.
    /// Plain messages keep `selected_option_id` unset; callback queries carry the
    /// option id. Updates with no usable content map to None.
    pub fn to_inbound(&self, channel_id: &str) -> Option<InboundMessage> {
        if let Some(ref cq) = self.callback_query {
            let chat_id = cq.message.as_ref()?.chat.id.to_string();
            let data = cq.data.clone().unwrap_or_default();
            return Some(InboundMessage {
                channel_id: channel_id.to_string(),
                conversation_id: chat_id,
                text: data.clone(),
                selected_option_id: Some(data),
            });
        }
        let msg = self.message.as_ref()?;
        let text = msg.text.as_ref()?;
        Some(InboundMessage {
            channel_id: channel_id.to_string(),
            conversation_id: msg.chat.id.to_string(),
            text: text.clone(),
            selected_option_id: None,
        })
    }
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: Option<String>,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: Option<String>) -> Self {
        Self {
            id: "telegram".to_string(),
            token,
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn token(&self) -> Result<&str, ChannelError> {
        self.token
            .as_deref()
            .ok_or(ChannelError::NotConfigured("telegram bot token"))
    }

    /// Start the getUpdates long-poll loop and forward messages to the service. Returns a handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChannelError> {
        let token = self.token()?;
        let url = format!(
            "{}/bot{}/getUpdates?timeout={}",
            TELEGRAM_API_BASE, token, LONG_POLL_TIMEOUT
        );
        let url = if let Some(off) = offset {
            format!("{}&offset={}", url, off)
        } else {
            url
        };
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("getUpdates failed: {} {}", status, body)));
        }
        let data: GetUpdatesResponse = res.json().await?;
        if !data.ok {
            return Err(ChannelError::Api("getUpdates returned ok: false".to_string()));
        }
        let next_offset = data
            .result
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1);
        Ok((data.result, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), ChannelError> {
        let token = self.token()?;
        let api_url = format!("{}/bot{}/setWebhook", TELEGRAM_API_BASE, token);
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        self.post_expect_ok(&api_url, &body, "setWebhook").await
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        let token = self.token()?;
        let url = format!("{}/bot{}/deleteWebhook", TELEGRAM_API_BASE, token);
        self.post_expect_ok(&url, &serde_json::json!({}), "deleteWebhook")
            .await
    }

    /// Send a text message to a chat via sendMessage API.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let token = self.token()?;
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, token);
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        self.post_expect_ok(&url, &body, "sendMessage").await
    }

    /// Send a menu as prompt text plus inline keyboard. callback_data carries the
    /// stable option id so selections come back as callback queries.
    pub async fn send_menu(&self, chat_id: &str, menu: &MenuDefinition) -> Result<(), ChannelError> {
        let token = self.token()?;
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": menu.prompt,
            "reply_markup": { "inline_keyboard": inline_keyboard(menu) },
        });
        self.post_expect_ok(&url, &body, "sendMessage").await
    }

    /// Acknowledge a callback query so the client stops showing a spinner.
    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), ChannelError> {
        let token = self.token()?;
        let url = format!("{}/bot{}/answerCallbackQuery", TELEGRAM_API_BASE, token);
        let body = serde_json::json!({ "callback_query_id": callback_query_id });
        self.post_expect_ok(&url, &body, "answerCallbackQuery").await
    }

    async fn post_expect_ok(
        &self,
        url: &str,
        body: &serde_json::Value,
        what: &str,
    ) -> Result<(), ChannelError> {
        let res = self.client.post(url).json(body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("{} failed: {} {}", what, status, body)));
        }
        Ok(())
    }
}

/// Inline keyboard layout: button menus render as a single row, list menus as one
/// button per row (the closest Telegram has to a scrollable list).
fn inline_keyboard(menu: &MenuDefinition) -> Vec<Vec<serde_json::Value>> {
    let buttons: Vec<serde_json::Value> = menu
        .options
        .iter()
        .map(|o| serde_json::json!({ "text": o.label, "callback_data": o.option_id }))
        .collect();
    match menu.render {
        RenderMode::Buttons => vec![buttons],
        RenderMode::List => buttons.into_iter().map(|b| vec![b]).collect(),
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundMessage>) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next;
                for u in updates {
                    if let Some(ref cq) = u.callback_query {
                        if let Err(e) = channel.answer_callback_query(&cq.id).await {
                            log::debug!("telegram answerCallbackQuery failed: {}", e);
                        }
                    }
                    let Some(inbound) = u.to_inbound(&channel.id) else {
                        continue;
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        TelegramChannel::send_message(self, conversation_id, text).await
    }

    async fn send_menu(
        &self,
        conversation_id: &str,
        menu: &MenuDefinition,
    ) -> Result<(), ChannelError> {
        TelegramChannel::send_menu(self, conversation_id, menu).await
    }
}
