//! Inbound handler (C7): consumes `message.received`, deduplicates,
//! normalizes, enriches media, appends to the conversation's pending
//! queue, arms the debounce timer, and emits `lead.created` /
//! `debounce.timer`.

pub mod enrichment;

use centurion_agent::LlmProvider;
use centurion_channels::ChannelRouter;
use centurion_core::bus::EventBus;
use centurion_core::config::{
    DEFAULT_DEBOUNCE_WAIT_MS, INBOUND_DEDUPE_TTL_SECS,
};
use centurion_core::envelope::{EnvelopeBuilder, EventEnvelope};
use centurion_core::error::{CenturionError, Result};
use centurion_core::types::{ChannelType, ContentType, Direction};
use centurion_egress::{EgressPolicy, PayloadLimits};
use centurion_idempotency::{ClaimMeta, IdempotencyStore};
use centurion_store::repository::{load_centurion_config, ConversationRepository, LeadRepository, MessageRepository};
use chrono::{Duration as ChronoDuration, Utc};
use enrichment::enrich_media;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const IDEMPOTENCY_CONSUMER: &str = "inbound";

/// Decouples C7 from the not-yet-built follow-up scheduler (C14): cancelling
/// a lead's pending follow-ups on fresh inbound activity is that crate's
/// concern, not this one's. Mirrors the `SecretResolver` seam in
/// `centurion-tools::registry`.
pub trait FollowUpCanceller: Send + Sync {
    fn cancel_pending(&self, lead_id: &str) -> Result<()>;
}

/// No-op default for deployments/tests that don't wire a follow-up worker.
pub struct NoopFollowUpCanceller;

impl FollowUpCanceller for NoopFollowUpCanceller {
    fn cancel_pending(&self, _lead_id: &str) -> Result<()> {
        Ok(())
    }
}

pub struct InboundHandler {
    leads: LeadRepository,
    conversations: ConversationRepository,
    messages: MessageRepository,
    conn: centurion_store::repository::SharedConn,
    idempotency: Arc<IdempotencyStore>,
    channels: Arc<ChannelRouter>,
    bus: EventBus,
    egress: Arc<EgressPolicy>,
    limits: Arc<PayloadLimits>,
    llm: Arc<dyn LlmProvider>,
    followups: Arc<dyn FollowUpCanceller>,
}

impl InboundHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: centurion_store::repository::SharedConn,
        idempotency: Arc<IdempotencyStore>,
        channels: Arc<ChannelRouter>,
        bus: EventBus,
        egress: Arc<EgressPolicy>,
        limits: Arc<PayloadLimits>,
        llm: Arc<dyn LlmProvider>,
        followups: Arc<dyn FollowUpCanceller>,
    ) -> Self {
        Self {
            leads: LeadRepository::new(conn.clone()),
            conversations: ConversationRepository::new(conn.clone()),
            messages: MessageRepository::new(conn.clone()),
            conn,
            idempotency,
            channels,
            bus,
            egress,
            limits,
            llm,
            followups,
        }
    }

    /// Runs the full inbound order of operations for one envelope. Returns
    /// `Ok(())` on success, drop, or any handled duplicate; errors after the
    /// idempotency claim are compensated by releasing the claim so the bus
    /// can redeliver (step 10).
    #[instrument(skip(self, raw), fields(correlation_id))]
    pub async fn handle(&self, raw: &[u8]) -> Result<()> {
        // Step 1: parse envelope; drop if invalid.
        let envelope = match EventEnvelope::parse(raw) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "dropping malformed message.received envelope");
                return Ok(());
            }
        };
        tracing::Span::current().record("correlation_id", &envelope.correlation_id.as_str());

        // Step 2: primary idempotency claim.
        let dedupe_key = format!("message.received:{}", envelope.correlation_id);
        let claimed = self.idempotency.claim(
            &envelope.company_id,
            IDEMPOTENCY_CONSUMER,
            &dedupe_key,
            INBOUND_DEDUPE_TTL_SECS,
            ClaimMeta {
                event_type: Some(envelope.event_type.clone()),
                event_id: Some(envelope.id.clone()),
                correlation_id: Some(envelope.correlation_id.clone()),
                causation_id: envelope.causation_id.clone(),
                metadata: Value::Object(Default::default()),
            },
        )?;
        if !claimed {
            info!("dropping duplicate message.received");
            return Ok(());
        }

        match self.process_claimed(&envelope).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Step 10: release the claim on any failure so redelivery can retry.
                warn!(error = %e, "inbound processing failed, releasing idempotency claim");
                self.idempotency
                    .release(&envelope.company_id, IDEMPOTENCY_CONSUMER, &dedupe_key)?;
                Err(e)
            }
        }
    }

    async fn process_claimed(&self, envelope: &EventEnvelope) -> Result<()> {
        let payload = &envelope.payload;

        // Step 3: resolve channel type and normalize.
        let channel_type: ChannelType = payload
            .get("channel_type")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CenturionError::InvalidInput("message.received missing channel_type".into()))?;
        let channel_instance_id = payload.get("channel_instance_id").and_then(|v| v.as_str());
        let adapter = self.channels.get(channel_type)?;
        let normalized = adapter.normalize_inbound(payload)?;

        // Step 4: get-or-create Lead; cancel pending follow-ups.
        let lead_name = payload.get("lead_name").and_then(|v| v.as_str());
        let (lead, lead_created) = self.leads.get_or_create(&envelope.company_id, &normalized.lead_external_id, lead_name)?;
        self.followups.cancel_pending(&lead.id)?;

        // Step 5: resolve centurion config; get-or-create Conversation.
        let centurion_id = payload
            .get("centurion_id")
            .and_then(|v| v.as_str())
            .or(lead.centurion_id.as_deref())
            .ok_or_else(|| CenturionError::InvalidInput("no centurion_id resolvable for inbound message".into()))?;
        let config = load_centurion_config(&self.conn, centurion_id)?
            .ok_or_else(|| CenturionError::Config(format!("unknown centurion_id '{centurion_id}'")))?;
        let conversation = self
            .conversations
            .get_or_create(&envelope.company_id, &lead.id, centurion_id, channel_type, channel_instance_id)?;

        // Step 6: secondary channel_message_id dedupe.
        let channel_message_id = payload.get("channel_message_id").and_then(|v| v.as_str());
        if let Some(cmid) = channel_message_id {
            if self.messages.channel_message_exists(&envelope.company_id, cmid)? {
                info!(channel_message_id = cmid, "dropping duplicate channel_message_id");
                return Ok(());
            }
        }

        // Step 7: append the inbound Message row; enrich media.
        let content_type = normalized.media.as_ref().map(|m| m.media_type).unwrap_or(ContentType::Text);
        let message = self.messages.insert(
            &conversation.id,
            &envelope.company_id,
            &lead.id,
            Direction::Inbound,
            content_type,
            normalized.body.as_deref(),
            channel_message_id,
            &Value::Object(Default::default()),
        )?;

        let mut effective_text = normalized.body.clone().unwrap_or_default();
        if let Some(media) = &normalized.media {
            if config.media_enrichment_enabled {
                let enriched = enrich_media(self.llm.as_ref(), &self.egress, &self.limits, media).await;
                self.messages.set_media_enrichment(
                    &message.id,
                    enriched.transcription.as_deref(),
                    enriched.description.as_deref(),
                )?;
                if let Some(text) = enriched.transcription.or(enriched.description) {
                    effective_text = text;
                } else if effective_text.is_empty() {
                    effective_text = format!("[{}]", media.media_type);
                }
            } else if effective_text.is_empty() {
                effective_text = format!("[{}]", media.media_type);
            }
        }

        // Step 8: publish lead.created if the lead was newly created.
        if lead_created {
            self.bus.publish(EventEnvelope::build(EnvelopeBuilder {
                event_type: "lead.created".to_string(),
                company_id: envelope.company_id.clone(),
                source: "inbound".to_string(),
                correlation_id: envelope.correlation_id.clone(),
                causation_id: Some(envelope.id.clone()),
                payload: serde_json::json!({"lead_id": lead.id, "phone": lead.phone}),
            }));
        }

        // Step 9: arm the debounce timer and publish debounce.timer.
        let debounce_wait_ms = if config.debounce_wait_ms > 0 {
            config.debounce_wait_ms
        } else {
            DEFAULT_DEBOUNCE_WAIT_MS
        };
        let now = Utc::now();
        let debounce_until = now + ChronoDuration::milliseconds(debounce_wait_ms as i64);
        let metadata_patch = channel_message_id
            .map(|id| serde_json::json!({"last_channel_message_id": id}))
            .unwrap_or(Value::Object(Default::default()));
        self.conversations
            .append_pending_message(&conversation.id, &effective_text, debounce_until, now, &metadata_patch)?;

        self.bus.publish(EventEnvelope::build(EnvelopeBuilder {
            event_type: "debounce.timer".to_string(),
            company_id: envelope.company_id.clone(),
            source: "inbound".to_string(),
            correlation_id: envelope.correlation_id.clone(),
            causation_id: Some(envelope.id.clone()),
            payload: serde_json::json!({"conversation_id": conversation.id, "debounce_until": debounce_until}),
        }));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use centurion_agent::{deterministic_fallback_response, ChatRequest, ChatResponse, ProviderError};
    use centurion_core::config::{EgressConfig, PayloadLimitsConfig};
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct FallbackProvider;

    #[async_trait::async_trait]
    impl LlmProvider for FallbackProvider {
        fn name(&self) -> &str {
            "fallback"
        }

        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(deterministic_fallback_response("test"))
        }
    }

    fn handler() -> InboundHandler {
        let conn = Connection::open_in_memory().unwrap();
        centurion_store::db::init_db(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        conn.lock().unwrap().execute(
            "INSERT INTO centurion_configs (id, company_id, debounce_wait_ms, created_at, updated_at) \
             VALUES ('cent-1', 'acme', 50, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        ).unwrap();

        let idem_conn = Connection::open_in_memory().unwrap();
        let idempotency = Arc::new(IdempotencyStore::new(idem_conn).unwrap());

        InboundHandler::new(
            conn,
            idempotency,
            Arc::new(ChannelRouter::new()),
            EventBus::new(),
            Arc::new(EgressPolicy::from_config(&EgressConfig::default())),
            Arc::new(PayloadLimits::from_config(&PayloadLimitsConfig::default())),
            Arc::new(FallbackProvider),
            Arc::new(NoopFollowUpCanceller),
        )
    }

    fn envelope_bytes(company_id: &str, correlation_id: &str, from: &str) -> Vec<u8> {
        let env = EventEnvelope::build(EnvelopeBuilder {
            event_type: "message.received".to_string(),
            company_id: company_id.to_string(),
            source: "whatsapp".to_string(),
            correlation_id: correlation_id.to_string(),
            causation_id: None,
            payload: serde_json::json!({
                "channel_type": "whatsapp",
                "channel_instance_id": "inst-1",
                "centurion_id": "cent-1",
                "from": from,
                "body": "ola, quero saber mais",
                "channel_message_id": format!("wamid.{correlation_id}"),
            }),
        });
        env.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn appends_pending_and_arms_debounce() {
        let h = handler();
        let bytes = envelope_bytes("acme", "corr-1", "+15550001");
        h.handle(&bytes).await.unwrap();

        let (lead, _) = h.leads.get_or_create("acme", "+15550001", None).unwrap();
        let conv = h
            .conversations
            .get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, Some("inst-1"))
            .unwrap();
        assert_eq!(conv.pending_messages, vec!["ola, quero saber mais".to_string()]);
        assert_eq!(conv.debounce_state, centurion_core::types::DebounceState::Waiting);
    }

    #[tokio::test]
    async fn duplicate_correlation_id_is_dropped() {
        let h = handler();
        let bytes = envelope_bytes("acme", "corr-dup", "+15550002");
        h.handle(&bytes).await.unwrap();
        h.handle(&bytes).await.unwrap();

        let (lead, _) = h.leads.get_or_create("acme", "+15550002", None).unwrap();
        let conv = h
            .conversations
            .get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, Some("inst-1"))
            .unwrap();
        assert_eq!(conv.pending_messages.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_channel_message_id_is_dropped_on_new_correlation() {
        let h = handler();
        let b1 = envelope_bytes("acme", "corr-a", "+15550003");
        h.handle(&b1).await.unwrap();

        // Different correlation_id (passes primary dedupe) but same channel_message_id.
        let env = EventEnvelope::build(EnvelopeBuilder {
            event_type: "message.received".to_string(),
            company_id: "acme".to_string(),
            source: "whatsapp".to_string(),
            correlation_id: "corr-b".to_string(),
            causation_id: None,
            payload: serde_json::json!({
                "channel_type": "whatsapp",
                "channel_instance_id": "inst-1",
                "centurion_id": "cent-1",
                "from": "+15550003",
                "body": "de novo",
                "channel_message_id": "wamid.corr-a",
            }),
        });
        h.handle(&env.to_bytes().unwrap()).await.unwrap();

        let (lead, _) = h.leads.get_or_create("acme", "+15550003", None).unwrap();
        let conv = h
            .conversations
            .get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, Some("inst-1"))
            .unwrap();
        assert_eq!(conv.pending_messages.len(), 1);
    }

    #[tokio::test]
    async fn malformed_envelope_is_dropped_not_errored() {
        let h = handler();
        assert!(h.handle(b"not json").await.is_ok());
    }
}
