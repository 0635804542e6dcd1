//! Communication channels (e.g. Telegram).
//!
//! Channel trait and registry so the bot service can start/stop channel connectors
//! and route messages. Inbound messages are queued for the dispatch engine; outbound
//! menus are rendered by the channel, never by the engine.

mod inbound;
mod registry;
mod telegram;

pub use inbound::InboundMessage;
pub use registry::{ChannelError, ChannelHandle, ChannelRegistry};
pub use telegram::{TelegramChannel, TelegramUpdate};
