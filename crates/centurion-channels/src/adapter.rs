use crate::types::{InboundMedia, NormalizedInbound, OutboundMessage};
use centurion_core::error::{CenturionError, Result};
use centurion_core::types::ContentType;
use serde_json::Value;
use std::collections::HashSet;

/// Per-channel inbound normalization and outbound capability filter (C5).
/// Unlike a full bot-framework `Channel` adapter, this trait does not
/// own a live connection: real delivery happens through the bus and an
/// out-of-scope channel-specific HTTP sender.
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Content types this channel can carry outbound.
    fn capabilities(&self) -> HashSet<ContentType>;

    /// Turns a channel-specific webhook payload into a normalized shape.
    fn normalize_inbound(&self, payload: &Value) -> Result<NormalizedInbound>;

    /// Drops outbound messages whose type this channel cannot carry.
    fn filter_outbound(&self, messages: Vec<OutboundMessage>) -> Vec<OutboundMessage> {
        let caps = self.capabilities();
        messages
            .into_iter()
            .filter(|m| caps.contains(&m.content_type()))
            .collect()
    }
}

fn all_types() -> HashSet<ContentType> {
    [
        ContentType::Text,
        ContentType::Image,
        ContentType::Video,
        ContentType::Audio,
        ContentType::Document,
    ]
    .into_iter()
    .collect()
}

/// WhatsApp Cloud-API-shaped webhook: full media support.
pub struct WhatsappAdapter;

impl ChannelAdapter for WhatsappAdapter {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    fn capabilities(&self) -> HashSet<ContentType> {
        all_types()
    }

    fn normalize_inbound(&self, payload: &Value) -> Result<NormalizedInbound> {
        let from_id = payload
            .get("from")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CenturionError::InvalidInput("whatsapp payload missing 'from'".into()))?
            .to_string();
        let body = payload.get("body").and_then(|v| v.as_str()).map(String::from);
        let media = parse_media(payload.get("media"));
        Ok(NormalizedInbound {
            lead_external_id: from_id.clone(),
            from_id,
            body,
            media,
            raw: payload.clone(),
        })
    }
}

/// Instagram adapter. Story replies and mentions have no plain `body`; they
/// are turned into a synthetic descriptive body so the pipeline downstream
/// always has text to debounce/prompt with.
pub struct InstagramAdapter;

impl ChannelAdapter for InstagramAdapter {
    fn name(&self) -> &'static str {
        "instagram"
    }

    fn capabilities(&self) -> HashSet<ContentType> {
        // Instagram DMs do not support arbitrary document attachments.
        [ContentType::Text, ContentType::Image, ContentType::Video, ContentType::Audio]
            .into_iter()
            .collect()
    }

    fn normalize_inbound(&self, payload: &Value) -> Result<NormalizedInbound> {
        let from_id = payload
            .get("from")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CenturionError::InvalidInput("instagram payload missing 'from'".into()))?
            .to_string();

        let body = if let Some(text) = payload.get("body").and_then(|v| v.as_str()) {
            Some(text.to_string())
        } else if let Some(story) = payload.get("story_reply").and_then(|v| v.as_str()) {
            Some(format!("[respondeu ao story]: {story}"))
        } else if payload.get("mention").is_some() {
            Some("[mencionou o perfil em um story]".to_string())
        } else {
            None
        };

        let media = parse_media(payload.get("media"));
        Ok(NormalizedInbound {
            lead_external_id: from_id.clone(),
            from_id,
            body,
            media,
            raw: payload.clone(),
        })
    }
}

/// Telegram adapter. Lifts text out of nested `message.text` /
/// `edited_message.text` update shapes (falling back to `caption`) and, when
/// the body starts with `/`, records the leading `/command` token under
/// `raw.telegram.command` — the body itself keeps the full text.
pub struct TelegramAdapter;

impl ChannelAdapter for TelegramAdapter {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn capabilities(&self) -> HashSet<ContentType> {
        all_types()
    }

    fn normalize_inbound(&self, payload: &Value) -> Result<NormalizedInbound> {
        let message = payload
            .get("message")
            .or_else(|| payload.get("edited_message"))
            .unwrap_or(payload);

        let from_id = message
            .get("from")
            .and_then(|f| f.get("id"))
            .and_then(|v| v.as_i64().map(|n| n.to_string()).or_else(|| v.as_str().map(String::from)))
            .ok_or_else(|| CenturionError::InvalidInput("telegram payload missing from.id".into()))?;

        let body = message
            .get("text")
            .and_then(|v| v.as_str())
            .or_else(|| message.get("caption").and_then(|v| v.as_str()))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let media = parse_media(message.get("media"));

        let mut raw = payload.clone();
        if let Some(command) = body.as_deref().and_then(extract_command_prefix) {
            raw["telegram"] = serde_json::json!({"command": command});
        }

        Ok(NormalizedInbound {
            lead_external_id: from_id.clone(),
            from_id,
            body,
            media,
            raw,
        })
    }
}

/// Pulls the leading `/command` token out of a Telegram message body, if
/// any, without altering the body itself.
fn extract_command_prefix(text: &str) -> Option<&str> {
    text.starts_with('/').then(|| text.split_whitespace().next()).flatten()
}

fn parse_media(value: Option<&Value>) -> Option<InboundMedia> {
    let v = value?;
    serde_json::from_value(v.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn instagram_story_reply_becomes_synthetic_body() {
        let adapter = InstagramAdapter;
        let payload = json!({"from": "u1", "story_reply": "amei!"});
        let normalized = adapter.normalize_inbound(&payload).unwrap();
        assert!(normalized.body.unwrap().contains("amei!"));
    }

    #[test]
    fn telegram_extracts_nested_text() {
        let adapter = TelegramAdapter;
        let payload = json!({"message": {"from": {"id": 42}, "text": "/start ola"}});
        let normalized = adapter.normalize_inbound(&payload).unwrap();
        assert_eq!(normalized.from_id, "42");
        assert_eq!(normalized.body.unwrap(), "/start ola");
        assert_eq!(normalized.raw["telegram"]["command"], "/start");
    }

    #[test]
    fn telegram_plain_text_has_no_command() {
        let adapter = TelegramAdapter;
        let payload = json!({"message": {"from": {"id": 42}, "text": "oi tudo bem?"}});
        let normalized = adapter.normalize_inbound(&payload).unwrap();
        assert_eq!(normalized.body.unwrap(), "oi tudo bem?");
        assert!(normalized.raw.get("telegram").is_none());
    }

    #[test]
    fn filter_outbound_drops_unsupported_types() {
        let adapter = InstagramAdapter;
        let msgs = vec![
            OutboundMessage::Text { text: "oi".into() },
            OutboundMessage::Document {
                asset_id: Some("a1".into()),
                url: None,
                mime_type: None,
                caption: None,
                filename: Some("f.pdf".into()),
            },
        ];
        let filtered = adapter.filter_outbound(msgs);
        assert_eq!(filtered.len(), 1);
    }
}
