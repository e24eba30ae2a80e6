//! Media enrichment: download the attached media through the
//! egress gate with a streaming byte cap, then transcribe (audio) or
//! describe (image/video/document) via the LLM integration. Any failure at
//! any step falls back silently to the raw body — enrichment is best
//! effort, never a reason to drop the message.

use base64::{engine::general_purpose::STANDARD, Engine};
use centurion_agent::{ChatRequest, LlmProvider, Message as LlmMessage, Role};
use centurion_channels::InboundMedia;
use centurion_core::config::{DEFAULT_STT_AUDIO_MAX_BYTES, DEFAULT_VISION_IMAGE_MAX_BYTES};
use centurion_core::types::ContentType;
use centurion_egress::{download_capped, EgressPolicy, PayloadLimits};
use std::time::Duration;
use tracing::debug;

const DOWNLOAD_TIMEOUT_SECS: u64 = 20;
const ENRICHMENT_MODEL: &str = "gpt-4o-mini";
const ENRICHMENT_MAX_TOKENS: u32 = 400;

#[derive(Debug, Default)]
pub struct MediaEnrichment {
    pub transcription: Option<String>,
    pub description: Option<String>,
}

/// Runs best-effort enrichment for one inbound media attachment. Never
/// returns an error: every failure path collapses to an empty
/// `MediaEnrichment`, and the caller falls back to the raw body/placeholder.
pub async fn enrich_media(
    llm: &dyn LlmProvider,
    egress: &EgressPolicy,
    limits: &PayloadLimits,
    media: &InboundMedia,
) -> MediaEnrichment {
    let max_bytes = match media.media_type {
        ContentType::Audio => limits.stt_audio_max_bytes.min(DEFAULT_STT_AUDIO_MAX_BYTES),
        _ => limits.vision_image_max_bytes.min(DEFAULT_VISION_IMAGE_MAX_BYTES),
    };

    let client = reqwest::Client::new();
    let bytes = match download_capped(
        egress,
        &client,
        &media.url,
        max_bytes,
        Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
    )
    .await
    {
        Ok(b) => b,
        Err(e) => {
            debug!(url = %media.url, error = %e, "media download failed, falling back to raw body");
            return MediaEnrichment::default();
        }
    };

    match media.media_type {
        ContentType::Audio => {
            let transcription = transcribe(llm, &bytes, &media.mime_type).await;
            MediaEnrichment { transcription, description: None }
        }
        ContentType::Image => {
            let description = describe(llm, &bytes, &media.mime_type).await;
            MediaEnrichment { transcription: None, description }
        }
        _ => MediaEnrichment::default(),
    }
}

async fn transcribe(llm: &dyn LlmProvider, bytes: &[u8], mime_type: &str) -> Option<String> {
    let encoded = STANDARD.encode(bytes);
    let req = ChatRequest {
        model: ENRICHMENT_MODEL.to_string(),
        system: "You transcribe spoken audio to plain text. Reply with the transcription only, \
                 no commentary."
            .to_string(),
        messages: vec![LlmMessage {
            role: Role::User,
            content: format!("data:{mime_type};base64,{encoded}"),
        }],
        max_tokens: ENRICHMENT_MAX_TOKENS,
        tools: Vec::new(),
    };
    match llm.send(&req).await {
        Ok(resp) if !resp.content.trim().is_empty() => Some(resp.content),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "audio transcription failed");
            None
        }
    }
}

async fn describe(llm: &dyn LlmProvider, bytes: &[u8], mime_type: &str) -> Option<String> {
    let encoded = STANDARD.encode(bytes);
    let req = ChatRequest {
        model: ENRICHMENT_MODEL.to_string(),
        system: "You describe images for a sales conversation assistant. Describe what is shown \
                 and transcribe (OCR) any visible text. Reply with the description only."
            .to_string(),
        messages: vec![LlmMessage {
            role: Role::User,
            content: format!("data:{mime_type};base64,{encoded}"),
        }],
        max_tokens: ENRICHMENT_MAX_TOKENS,
        tools: Vec::new(),
    };
    match llm.send(&req).await {
        Ok(resp) if !resp.content.trim().is_empty() => Some(resp.content),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "image description failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use centurion_agent::{ChatResponse, ProviderError};
    use centurion_core::config::{EgressConfig, PayloadLimitsConfig};

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: "a person waving hello".to_string(),
                model: ENRICHMENT_MODEL.to_string(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn unreachable_media_url_falls_back_to_empty_enrichment() {
        let media = InboundMedia {
            media_type: ContentType::Image,
            url: "http://127.0.0.1:1/img.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            sha256: None,
        };
        let enrichment = enrich_media(
            &EchoProvider,
            &EgressPolicy::from_config(&EgressConfig::default()),
            &PayloadLimits::from_config(&PayloadLimitsConfig::default()),
            &media,
        )
        .await;
        assert!(enrichment.description.is_none());
        assert!(enrichment.transcription.is_none());
    }
}
