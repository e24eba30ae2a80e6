use centurion_core::types::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound media reference, as carried on a `message.received` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMedia {
    #[serde(rename = "type")]
    pub media_type: ContentType,
    pub url: String,
    pub mime_type: String,
    pub sha256: Option<String>,
}

/// Output of per-channel normalization (C5): a channel-agnostic view
/// of one inbound webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedInbound {
    pub from_id: String,
    pub lead_external_id: String,
    pub body: Option<String>,
    pub media: Option<InboundMedia>,
    pub raw: Value,
}

/// One piece of an outbound send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Image {
        asset_id: Option<String>,
        url: Option<String>,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    Video {
        asset_id: Option<String>,
        url: Option<String>,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    Audio {
        asset_id: Option<String>,
        url: Option<String>,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    Document {
        asset_id: Option<String>,
        url: Option<String>,
        mime_type: Option<String>,
        caption: Option<String>,
        filename: Option<String>,
    },
}

impl OutboundMessage {
    pub fn content_type(&self) -> ContentType {
        match self {
            OutboundMessage::Text { .. } => ContentType::Text,
            OutboundMessage::Image { .. } => ContentType::Image,
            OutboundMessage::Video { .. } => ContentType::Video,
            OutboundMessage::Audio { .. } => ContentType::Audio,
            OutboundMessage::Document { .. } => ContentType::Document,
        }
    }
}
