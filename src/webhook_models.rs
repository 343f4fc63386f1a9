use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name the gateway uses for a new message.
pub const NEW_MESSAGE_EVENT: &str = "messages.upsert";

/// Placeholder stored when an inbound message carries only media.
pub const MEDIA_PLACEHOLDER: &str = "[mídia]";

/// Gateway webhook envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayEvent {
    /// Event type (e.g. "messages.upsert", "MESSAGES_UPSERT", "connection.update")
    #[serde(default)]
    pub event: String,

    /// Gateway instance that produced the event
    #[serde(default)]
    pub instance: Option<String>,

    /// Event payload; shape depends on `event`
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayMessageData {
    pub key: MessageKey,

    #[serde(rename = "pushName", default)]
    pub push_name: Option<String>,

    #[serde(default)]
    pub message: Option<MessageContent>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageKey {
    /// Sender address, e.g. "5511987654321@s.whatsapp.net"
    #[serde(rename = "remoteJid")]
    pub remote_jid: String,

    /// True when the event echoes a message this system sent
    #[serde(rename = "fromMe", default)]
    pub from_me: bool,

    /// Gateway message id
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,

    #[serde(rename = "extendedTextMessage", default)]
    pub extended_text_message: Option<ExtendedText>,

    #[serde(rename = "imageMessage", default)]
    pub image_message: Option<MediaContent>,

    #[serde(rename = "videoMessage", default)]
    pub video_message: Option<MediaContent>,

    #[serde(rename = "documentMessage", default)]
    pub document_message: Option<MediaContent>,

    /// Anything else the gateway sends (audio, stickers, reactions...)
    #[serde(flatten)]
    pub raw: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaContent {
    #[serde(default)]
    pub caption: Option<String>,
}

impl GatewayEvent {
    /// True for "messages.upsert" in any of the spellings the gateway uses.
    pub fn is_new_message(&self) -> bool {
        self.event.trim().to_lowercase().replace('_', ".") == NEW_MESSAGE_EVENT
    }

    /// Payload as a message, when it has the message shape.
    pub fn message_data(&self) -> Option<GatewayMessageData> {
        self.data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }
}

impl MessageKey {
    /// Group chats are addressed as "<id>@g.us".
    pub fn is_group(&self) -> bool {
        self.remote_jid.ends_with("@g.us")
    }

    /// Digits of the address before the gateway suffix.
    pub fn sender_digits(&self) -> String {
        let local = self
            .remote_jid
            .split('@')
            .next()
            .unwrap_or_default();
        // Multi-device addresses look like "5511987654321:12@s.whatsapp.net"
        let local = local.split(':').next().unwrap_or_default();
        local.chars().filter(|c| c.is_ascii_digit()).collect()
    }
}

impl MessageContent {
    /// Plain text of the message, media caption, or the media placeholder.
    pub fn text(&self) -> String {
        let text = self
            .conversation
            .as_deref()
            .or_else(|| {
                self.extended_text_message
                    .as_ref()
                    .and_then(|e| e.text.as_deref())
            })
            .or_else(|| {
                [
                    &self.image_message,
                    &self.video_message,
                    &self.document_message,
                ]
                .into_iter()
                .flatten()
                .find_map(|m| m.caption.as_deref())
            })
            .map(str::trim)
            .filter(|t| !t.is_empty());

        text.map(str::to_string)
            .unwrap_or_else(|| MEDIA_PLACEHOLDER.to_string())
    }
}

/// Response sent back to the gateway. Always HTTP 200.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
}
