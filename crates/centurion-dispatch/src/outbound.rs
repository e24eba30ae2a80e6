use centurion_core::bus::EventBus;
use centurion_core::config::OUTBOUND_DEDUPE_TTL_SECS;
use centurion_core::envelope::{EnvelopeBuilder, EventEnvelope};
use centurion_core::error::Result;
use centurion_idempotency::{ClaimMeta, IdempotencyStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

const IDEMPOTENCY_CONSUMER: &str = "outbound";

/// Outbound sender (C12). The only thing that actually puts a
/// `message.sent` envelope on the bus; C10 and C14 both go through this so
/// the per-chunk dedupe key is enforced in exactly one place.
pub struct OutboundSender {
    idempotency: Arc<IdempotencyStore>,
    bus: EventBus,
}

impl OutboundSender {
    pub fn new(idempotency: Arc<IdempotencyStore>, bus: EventBus) -> Self {
        Self { idempotency, bus }
    }

    /// Returns `true` if a new `message.sent` envelope was actually
    /// published, `false` if this `(correlation_id, chunk_index)` pair was
    /// already claimed (the caller then compensates by deleting the Message
    /// row it optimistically persisted).
    #[instrument(skip(self, message, meta))]
    pub fn send(
        &self,
        company_id: &str,
        correlation_id: &str,
        causation_id: Option<&str>,
        chunk_index: usize,
        instance_id: Option<&str>,
        to: &str,
        message: Value,
        meta: Value,
    ) -> Result<bool> {
        let dedupe_key = format!("{correlation_id}:{chunk_index}");
        let claimed = self.idempotency.claim(
            company_id,
            IDEMPOTENCY_CONSUMER,
            &dedupe_key,
            OUTBOUND_DEDUPE_TTL_SECS,
            ClaimMeta {
                event_type: Some("message.sent".to_string()),
                event_id: None,
                correlation_id: Some(correlation_id.to_string()),
                causation_id: causation_id.map(String::from),
                metadata: Value::Object(Default::default()),
            },
        )?;
        if !claimed {
            return Ok(false);
        }

        // `EventBus::publish` never errors (no subscribers is a normal
        // state); the release-on-failure path below would trigger here if
        // the bus were swapped for a networked one that can fail.
        self.bus.publish(EventEnvelope::build(EnvelopeBuilder {
            event_type: "message.sent".to_string(),
            company_id: company_id.to_string(),
            source: "dispatch".to_string(),
            correlation_id: correlation_id.to_string(),
            causation_id: causation_id.map(String::from),
            payload: serde_json::json!({
                "instance_id": instance_id,
                "to": to,
                "messages": [message],
                "raw": meta,
            }),
        }));

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn sender() -> OutboundSender {
        OutboundSender::new(
            Arc::new(IdempotencyStore::new(Connection::open_in_memory().unwrap()).unwrap()),
            EventBus::new(),
        )
    }

    #[test]
    fn second_send_for_same_chunk_is_suppressed() {
        let s = sender();
        let first = s
            .send("acme", "corr-1", None, 0, Some("i1"), "+1555", serde_json::json!({"text": "oi"}), serde_json::json!({}))
            .unwrap();
        let second = s
            .send("acme", "corr-1", None, 0, Some("i1"), "+1555", serde_json::json!({"text": "oi"}), serde_json::json!({}))
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn distinct_chunk_indices_are_independent() {
        let s = sender();
        assert!(s.send("acme", "corr-2", None, 0, None, "+1", serde_json::json!({}), serde_json::json!({})).unwrap());
        assert!(s.send("acme", "corr-2", None, 1, None, "+1", serde_json::json!({}), serde_json::json!({})).unwrap());
    }
}
