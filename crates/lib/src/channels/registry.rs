//! Channel registry: register and lookup channels by id.

use crate::catalog::MenuDefinition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Failure from a channel connector. Send failures are logged and never retried;
/// a failed send must not affect sibling sends from the same dispatch batch.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("channel api error: {0}")]
    Api(String),
    #[error("channel not configured: {0}")]
    NotConfigured(&'static str),
}

/// Handle to a running channel (stop, send text, send menu).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Send a text message to a conversation (e.g. Telegram chat_id).
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError>;
    /// Render and send a menu. The channel owns the native rendering (inline
    /// buttons vs list); the caller only supplies the menu definition.
    async fn send_menu(
        &self,
        conversation_id: &str,
        menu: &MenuDefinition,
    ) -> Result<(), ChannelError>;
}

/// Registry of channel ids to handles. Shared across the bot service.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, id: String, handle: Arc<dyn ChannelHandle>) {
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id.clone(), handle) {
            old.stop();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        let g = self.inner.read().await;
        g.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        g.keys().cloned().collect()
    }
}
