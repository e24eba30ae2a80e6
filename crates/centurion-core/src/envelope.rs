use crate::config::ENVELOPE_VERSION;
use crate::error::{CenturionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Canonical event wrapper (C1). `payload` is left as `Value` since each
/// bus channel (`message.received`, `lead.qualified`, …) defines its own shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: u32,
    pub occurred_at: DateTime<Utc>,
    pub company_id: String,
    pub source: String,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub payload: Value,
}

/// Fields the caller must supply; `id`/`occurred_at`/`version` are filled in.
pub struct EnvelopeBuilder {
    pub event_type: String,
    pub company_id: String,
    pub source: String,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn build(b: EnvelopeBuilder) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            event_type: b.event_type,
            version: ENVELOPE_VERSION,
            occurred_at: Utc::now(),
            company_id: b.company_id,
            source: b.source,
            correlation_id: b.correlation_id,
            causation_id: b.causation_id,
            payload: b.payload,
        }
    }

    /// Parses an envelope from bytes/string. Validates required fields are
    /// present and non-empty; normalizes nothing further (UTC is enforced by
    /// `DateTime<Utc>`'s own deserialization).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| CenturionError::InvalidInput(format!("invalid json: {e}")))?;
        Self::parse_value(value)
    }

    pub fn parse_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(CenturionError::InvalidInput("envelope is not a JSON object".into()));
        }
        let env: EventEnvelope = serde_json::from_value(value)
            .map_err(|e| CenturionError::InvalidInput(format!("validation error: {e}")))?;
        if env.id.is_empty() {
            return Err(CenturionError::InvalidInput("missing id".into()));
        }
        if env.event_type.is_empty() {
            return Err(CenturionError::InvalidInput("missing type".into()));
        }
        if env.correlation_id.is_empty() {
            return Err(CenturionError::InvalidInput("missing correlation_id".into()));
        }
        if env.version == 0 {
            return Err(CenturionError::InvalidInput("version must be >= 1".into()));
        }
        Ok(env)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips_up_to_normalization() {
        let env = EventEnvelope::build(EnvelopeBuilder {
            event_type: "message.received".into(),
            company_id: "c1".into(),
            source: "whatsapp".into(),
            correlation_id: "corr-1".into(),
            causation_id: None,
            payload: serde_json::json!({"from": "555"}),
        });
        let bytes = env.to_bytes().unwrap();
        let parsed = EventEnvelope::parse(&bytes).unwrap();
        assert_eq!(parsed.id, env.id);
        assert_eq!(parsed.correlation_id, "corr-1");
        assert_eq!(parsed.version, ENVELOPE_VERSION);
    }

    #[test]
    fn rejects_missing_correlation_id() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "id": "x", "type": "message.received", "version": 1,
            "occurred_at": Utc::now(), "company_id": "c1", "source": "whatsapp",
            "correlation_id": "", "payload": {}
        }))
        .unwrap();
        let err = EventEnvelope::parse(&bytes).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn rejects_non_object() {
        let err = EventEnvelope::parse(b"42").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
