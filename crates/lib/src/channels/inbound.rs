//! Inbound message from a channel: delivered to the dispatch engine after normalization.

/// A message-like event from a channel, in the raw shape the transport gives us.
/// `selected_option_id` is set only when the transport natively supports structured
/// replies (e.g. a Telegram callback query); transports without them leave it `None`
/// and the engine falls back to label matching on `text`.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub conversation_id: String,
    pub text: String,
    pub selected_option_id: Option<String>,
}
