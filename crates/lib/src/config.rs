//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.propbot/config.json`) and environment.
//! Read once at startup; the only runtime-configurable surface is the server bind,
//! the Telegram channel, and the bot's admin address and menu routing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings (health endpoint and Telegram webhook).
    #[serde(default)]
    pub server: ServerConfig,

    /// Channel settings (e.g. Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Bot behavior: admin address and menu routing.
    #[serde(default)]
    pub bot: BotConfig,
}

/// Server bind and port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for the HTTP server (default 15180).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    15180
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

/// Per-channel config (e.g. Telegram bot token).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
}

/// Bot behavior: who the admin is and which menu each side of the conversation gets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Chat address of the administrator (e.g. Telegram chat id). Overridden by
    /// PROPBOT_ADMIN_CHAT env when set. When absent, admin notifications and the
    /// startup notice are skipped.
    pub admin_address: Option<String>,

    /// Menu greeted to regular contacts (default "main").
    #[serde(default = "default_default_menu")]
    pub default_menu: String,

    /// Menu greeted to the admin instead of the default flow (default "admin").
    /// Set to null to give the admin the standard flow.
    #[serde(default = "default_admin_menu")]
    pub admin_menu: Option<String>,
}

fn default_default_menu() -> String {
    "main".to_string()
}

fn default_admin_menu() -> Option<String> {
    Some("admin".to_string())
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            admin_address: None,
            default_menu: default_default_menu(),
            admin_menu: default_admin_menu(),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_nonempty("TELEGRAM_BOT_TOKEN").or_else(|| {
        config
            .channels
            .telegram
            .bot_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the admin chat address: env PROPBOT_ADMIN_CHAT overrides config.
pub fn resolve_admin_address(config: &Config) -> Option<String> {
    env_nonempty("PROPBOT_ADMIN_CHAT").or_else(|| {
        config
            .bot
            .admin_address
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PROPBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".propbot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or PROPBOT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
