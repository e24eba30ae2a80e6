use centurion_core::types::{ChannelType, ContentType, DebounceState, Direction, LifecycleStage};
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Lead {
    pub id: String,
    pub company_id: String,
    pub phone: String,
    pub name: Option<String>,
    pub lifecycle_stage: LifecycleStage,
    pub is_qualified: bool,
    pub qualification_score: Option<f64>,
    pub qualification_data: Value,
    pub centurion_id: Option<String>,
    pub last_contact_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub company_id: String,
    pub lead_id: String,
    pub centurion_id: String,
    pub channel_type: ChannelType,
    pub channel_instance_id: Option<String>,
    pub debounce_state: DebounceState,
    pub debounce_until: Option<DateTime<Utc>>,
    pub pending_messages: Vec<String>,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub lead_state: String,
    pub metadata: Value,
}

impl Conversation {
    pub fn session_summary(&self) -> Option<String> {
        self.metadata
            .get("session_summary")
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub company_id: String,
    pub lead_id: String,
    pub direction: Direction,
    pub content_type: ContentType,
    pub content: Option<String>,
    pub audio_transcription: Option<String>,
    pub image_description: Option<String>,
    pub channel_message_id: Option<String>,
    pub archived: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Text representation used to build prompt history / qualification
    /// input: prefers a transcription/description over the raw placeholder.
    pub fn effective_text(&self) -> String {
        self.audio_transcription
            .clone()
            .or_else(|| self.image_description.clone())
            .or_else(|| self.content.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct CenturionConfigRow {
    pub id: String,
    pub company_id: String,
    pub persona_prompt: String,
    pub debounce_wait_ms: u64,
    pub chunk_max_chars: usize,
    pub chunk_delay_ms: u64,
    pub chunking_enabled: bool,
    pub media_enrichment_enabled: bool,
    pub qualification_rules: Option<Value>,
}
