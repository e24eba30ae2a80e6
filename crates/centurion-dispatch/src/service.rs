use crate::embed::embed_text;
use crate::events::QualificationEventLog;
use crate::outbound::OutboundSender;
use crate::prompt::{build_system_prompt, chunk_text, parse_response, trim_pending};
use async_trait::async_trait;
use centurion_agent::{deterministic_fallback_response, ChatRequest, LlmProvider, Message as LlmMessage, Role};
use centurion_channels::{ChannelRouter, OutboundMessage};
use centurion_core::config::{DEFAULT_CHUNK_MAX_CHARS, LONG_TERM_FACT_TOP_K};
use centurion_core::envelope::{EnvelopeBuilder, EventEnvelope};
use centurion_core::error::{CenturionError, Result};
use centurion_core::types::{ChannelType, LifecycleStage};
use centurion_core::bus::EventBus;
use centurion_debounce::ConversationProcessor;
use centurion_followup::worker::FollowUpSender;
use centurion_followup::repository::FollowupRepository;
use centurion_handoff::HandoffService;
use centurion_memory::{FactSource, FactStore, HistoryCache, KnowledgeStore};
use centurion_qualification::{evaluate, extract_known_fields, parse_rules, rules_hash, LlmQualifier, QualificationRules};
use centurion_store::repository::{load_centurion_config, ConversationRepository, LeadRepository, MessageRepository};
use centurion_store::{Lead, SharedConn};
use centurion_tools::registry::tool_definitions;
use centurion_tools::types::Tool;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};
use uuid::Uuid;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const MAX_TOOL_ROUNDS: u32 = 3;

/// Fallback used only when the dispatch turn produces no usable assistant
/// text — distinct from `centurion_agent`'s generic
/// no-provider fallback, which is phrased for the inbound ack path instead.
const EMPTY_RESPONSE_FALLBACK: &str = "Me conte um pouco mais sobre o que você precisa?";

const CLOSING_MESSAGE: &str =
    "Perfeito! Te encaminhei para um de nossos especialistas, em breve alguém continua por aqui. Obrigado!";

/// Seam between dispatch and whatever owns tenant tool configuration
/// (HTTP tool rows, MCP bridge) — kept out of this crate the same way
/// `FollowUpCanceller` and `SecretResolver` keep their owners out of the
/// crates that only need to call them.
#[async_trait]
pub trait ToolSetProvider: Send + Sync {
    async fn tools_for(&self, company_id: &str, centurion_id: &str, channel: ChannelType) -> Vec<Box<dyn Tool>>;
}

/// Default used wherever no tool integration is wired up.
pub struct NoopToolSetProvider;

#[async_trait]
impl ToolSetProvider for NoopToolSetProvider {
    async fn tools_for(&self, _company_id: &str, _centurion_id: &str, _channel: ChannelType) -> Vec<Box<dyn Tool>> {
        Vec::new()
    }
}

/// Dispatch service (C10): assembles the prompt, calls the LLM, sends the
/// response, runs follow-up scheduling and qualification, all under the
/// per-conversation lock the debounce scheduler already holds.
pub struct DispatchService {
    leads: LeadRepository,
    conversations: ConversationRepository,
    messages: MessageRepository,
    channels: Arc<ChannelRouter>,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolSetProvider>,
    qualifier: Option<Arc<dyn LlmQualifier>>,
    facts: FactStore,
    knowledge: KnowledgeStore,
    history: HistoryCache,
    outbound: Arc<OutboundSender>,
    handoff: Arc<HandoffService>,
    followups: FollowupRepository,
    qualification_events: QualificationEventLog,
    bus: EventBus,
    conn: SharedConn,
}

impl DispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: SharedConn,
        channels: Arc<ChannelRouter>,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolSetProvider>,
        qualifier: Option<Arc<dyn LlmQualifier>>,
        outbound: Arc<OutboundSender>,
        handoff: Arc<HandoffService>,
        bus: EventBus,
    ) -> Self {
        let leads = LeadRepository::new(conn.clone());
        let conversations = ConversationRepository::new(conn.clone());
        let messages = MessageRepository::new(conn.clone());
        let history = HistoryCache::new(messages.clone(), conversations.clone());
        Self {
            facts: FactStore::new(conn.clone()),
            knowledge: KnowledgeStore::new(conn.clone()),
            followups: FollowupRepository::new(conn.clone()),
            qualification_events: QualificationEventLog::new(conn.clone()),
            leads,
            conversations,
            messages,
            channels,
            llm,
            tools,
            qualifier,
            history,
            outbound,
            handoff,
            bus,
            conn,
        }
    }

    #[instrument(skip(self))]
    async fn run_turn(&self, conversation_id: &str) -> Result<()> {
        let Some(conversation) = self.conversations.get(conversation_id)? else {
            return Ok(());
        };
        let Some(lead) = self.leads.get(&conversation.lead_id)? else {
            return Ok(());
        };
        let Some(config) = load_centurion_config(&self.conn, &conversation.centurion_id)? else {
            return Err(CenturionError::Config(format!("no centurion config for {}", conversation.centurion_id)));
        };

        // Step 1: nothing to do, or nowhere to send it.
        if conversation.pending_messages.is_empty() || lead.phone.is_empty() || conversation.channel_instance_id.is_none() {
            self.conversations.clear_pending(conversation_id)?;
            return Ok(());
        }

        // Step 2.
        self.conversations.mark_processing(conversation_id)?;

        // Step 3.
        let limit = self.history.effective_limit(conversation_id)?;
        let history_msgs = self.history.get_history(conversation_id, limit)?;

        // Step 4.
        let consolidated = conversation.pending_messages.join("\n");

        // Step 5: long-term memory and knowledge-base retrieval, using a
        // deterministic bag-of-words embedding in place of a trained model.
        let query_embedding = embed_text(&consolidated);
        let memory_bullets: Vec<String> = self
            .facts
            .search_similar(&lead.id, &query_embedding, Some(LONG_TERM_FACT_TOP_K))?
            .into_iter()
            .map(|(fact, _distance)| fact.text)
            .collect();
        let knowledge_snippets: Vec<(String, String)> = self
            .knowledge
            .search_similar(&conversation.company_id, &query_embedding, None)?
            .into_iter()
            .map(|(chunk, _distance)| (chunk.id, chunk.text))
            .collect();

        // The correlation id is minted once per turn and threaded through
        // tool-call audit logs (step 6) and every outbound publish (step 9),
        // matching C1's "stable across the chain triggered by one inbound
        // message" invariant.
        let correlation_id = Uuid::now_v7().to_string();

        // Step 6: prompt assembly and the (bounded) tool-calling loop.
        let system_prompt = build_system_prompt(&config.persona_prompt, &memory_bullets, &knowledge_snippets);
        let mut chat_messages = trim_pending(&history_msgs, conversation.pending_messages.len());
        chat_messages.push(LlmMessage { role: Role::User, content: consolidated.clone() });
        let active_tools = self.tools.tools_for(&conversation.company_id, &conversation.centurion_id, conversation.channel_type).await;
        let tool_defs = tool_definitions(&active_tools);
        let response_text = self
            .run_agent_loop(&conversation.company_id, &correlation_id, &system_prompt, chat_messages, &tool_defs, &active_tools)
            .await;

        // Step 7: never send an empty turn.
        let response_text = if response_text.trim().is_empty() { EMPTY_RESPONSE_FALLBACK.to_string() } else { response_text };

        // Step 8: split the response into text chunks plus media items, then
        // drop whatever the channel adapter can't carry.
        let parsed = parse_response(&response_text);
        let chunk_max_chars = if config.chunk_max_chars > 0 { config.chunk_max_chars } else { DEFAULT_CHUNK_MAX_CHARS };
        let text_chunks = chunk_text(&parsed.text, chunk_max_chars, config.chunking_enabled);
        let adapter = self.channels.get(conversation.channel_type)?;

        let mut outbound_sequence: Vec<OutboundMessage> = text_chunks.into_iter().map(|text| OutboundMessage::Text { text }).collect();
        for item in &parsed.media {
            outbound_sequence.push(media_item_to_outbound(item));
        }
        let outbound_sequence = adapter.filter_outbound(outbound_sequence);

        // Step 9: persist-then-publish with a compensating delete, chunk by
        // chunk, sleeping `chunk_delay_ms` between consecutive text chunks.
        let mut previous_was_text = false;
        for (idx, outbound_msg) in outbound_sequence.iter().enumerate() {
            if previous_was_text && matches!(outbound_msg, OutboundMessage::Text { .. }) {
                tokio::time::sleep(Duration::from_millis(config.chunk_delay_ms.max(1))).await;
            }
            previous_was_text = matches!(outbound_msg, OutboundMessage::Text { .. });
            self.persist_and_send(&conversation.id, &conversation.company_id, &lead.id, conversation.channel_instance_id.as_deref(), &lead.phone, &correlation_id, idx, outbound_msg)?;
        }

        // Step 10.
        self.conversations.touch_last_outbound(conversation_id)?;
        self.conversations.clear_pending(conversation_id)?;
        self.leads.touch_last_contact(&lead.id)?;
        self.history.invalidate(conversation_id);
        if !lead.lifecycle_stage.is_terminal() && lead.lifecycle_stage == LifecycleStage::New {
            self.leads.set_lifecycle(&lead.id, LifecycleStage::Contacted)?;
        }

        // Step 11: follow-up scheduling only applies to whatsapp.
        if conversation.channel_type == ChannelType::Whatsapp {
            self.schedule_followups(&conversation.company_id, &lead, conversation_id, &conversation.centurion_id)?;
        }

        // Step 12: qualification, gated so a crash-recovered re-run of this
        // turn doesn't re-publish `lead.qualified` a second time.
        self.run_qualification(&config, &conversation.company_id, &conversation.id, &lead, &correlation_id).await?;

        // Step 13: best-effort long-term fact extraction from this turn.
        self.extract_facts(&conversation.company_id, &lead.id, &consolidated);

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_agent_loop(
        &self,
        company_id: &str,
        correlation_id: &str,
        system: &str,
        mut messages: Vec<LlmMessage>,
        tool_defs: &[centurion_agent::ToolDefinition],
        tools: &[Box<dyn Tool>],
    ) -> String {
        let mut rounds = 0;
        loop {
            let request = ChatRequest {
                model: DEFAULT_MODEL.to_string(),
                system: system.to_string(),
                messages: messages.clone(),
                max_tokens: DEFAULT_MAX_TOKENS,
                tools: tool_defs.to_vec(),
            };
            let response = match self.llm.send(&request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "llm call failed, using deterministic fallback");
                    deterministic_fallback_response(&e.to_string())
                }
            };

            if response.tool_calls.is_empty() || rounds >= MAX_TOOL_ROUNDS {
                return response.content;
            }
            rounds += 1;
            messages.push(LlmMessage { role: Role::Assistant, content: response.content.clone() });
            for call in &response.tool_calls {
                let started = std::time::Instant::now();
                let outcome = match tools.iter().find(|t| t.name() == call.name) {
                    Some(tool) => tool.execute(call.input.clone()).await,
                    None => centurion_tools::types::ToolResult::failure(format!("unknown tool '{}'", call.name)),
                };
                self.audit_tool_call(company_id, correlation_id, &call.name, &call.input, &outcome, started.elapsed());
                let rendered = serde_json::to_string(&outcome).unwrap_or_else(|_| "{\"ok\":false}".to_string());
                messages.push(LlmMessage { role: Role::User, content: format!("[tool_result:{}] {}", call.name, rendered) });
            }
        }
    }

    /// Wraps every tool call with redaction + a persisted `audit_logs` entry
    ///. Best-effort: a failed audit write is logged but never
    /// interrupts the turn.
    fn audit_tool_call(
        &self,
        company_id: &str,
        correlation_id: &str,
        tool_name: &str,
        args: &Value,
        outcome: &centurion_tools::types::ToolResult,
        duration: Duration,
    ) {
        let args_redacted = centurion_tools::redact::redact(args);
        let result_redacted = centurion_tools::redact::redact(&json!({"ok": outcome.ok, "content": outcome.content, "error": outcome.error}));
        let conn = self.conn.lock().unwrap();
        if let Err(e) = centurion_tools::db::record_audit_log(
            &conn,
            company_id,
            Some(correlation_id),
            tool_name,
            &args_redacted,
            &result_redacted,
            outcome.ok,
            duration.as_millis() as u64,
        ) {
            warn!(error = %e, tool = %tool_name, "failed to persist tool audit log");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_and_send(
        &self,
        conversation_id: &str,
        company_id: &str,
        lead_id: &str,
        instance_id: Option<&str>,
        to: &str,
        correlation_id: &str,
        chunk_index: usize,
        outbound_msg: &OutboundMessage,
    ) -> Result<()> {
        let content = match outbound_msg {
            OutboundMessage::Text { text } => Some(text.as_str()),
            OutboundMessage::Image { caption, .. }
            | OutboundMessage::Video { caption, .. }
            | OutboundMessage::Audio { caption, .. }
            | OutboundMessage::Document { caption, .. } => caption.as_deref(),
        };
        let message_payload = serde_json::to_value(outbound_msg)?;
        let row = self.messages.insert(
            conversation_id,
            company_id,
            lead_id,
            centurion_core::types::Direction::Outbound,
            outbound_msg.content_type(),
            content,
            None,
            &json!({}),
        )?;

        let sent = self.outbound.send(
            company_id,
            correlation_id,
            None,
            chunk_index,
            instance_id,
            to,
            message_payload,
            json!({"message_id": row.id}),
        )?;
        if !sent {
            self.messages.delete(&row.id)?;
        }
        Ok(())
    }

    /// Mirrors `centurion_followup::worker::FollowupWorker::schedule_for_lead`
    /// inline: dispatch doesn't need the full periodic worker, just the
    /// schedule-then-arm-lifecycle step it runs after every outbound turn.
    fn schedule_followups(&self, company_id: &str, lead: &Lead, conversation_id: &str, centurion_id: &str) -> Result<()> {
        let last_contact_at = lead.last_contact_at.unwrap_or_else(Utc::now);
        let scheduled = self.followups.schedule_for_lead(company_id, &lead.id, conversation_id, centurion_id, last_contact_at)?;
        if scheduled > 0 && !lead.lifecycle_stage.is_terminal() {
            self.leads.set_lifecycle(&lead.id, LifecycleStage::FollowUpPending)?;
        }
        Ok(())
    }

    async fn run_qualification(&self, config: &centurion_store::CenturionConfigRow, company_id: &str, conversation_id: &str, lead: &Lead, correlation_id: &str) -> Result<()> {
        let rules = match &config.qualification_rules {
            Some(value) => parse_rules(value)?,
            None => QualificationRules { threshold: 1.0, criteria: Vec::new() },
        };
        if rules.criteria.is_empty() {
            return Ok(());
        }

        let full_text = self.messages.full_conversation_text(conversation_id)?;
        let hash = rules_hash(&rules);
        let first_pass = self.qualification_events.record_if_new(&lead.id, correlation_id, &hash)?;
        if !first_pass {
            return Ok(());
        }

        let result = evaluate(&rules, &full_text, self.qualifier.as_deref()).await;
        if !result.is_qualified || lead.is_qualified {
            return Ok(());
        }

        let qualification_data = json!({
            "score": result.score,
            "extracted": result.extracted,
            "criteria": result.criteria,
            "summary": result.summary,
        });
        self.leads.set_qualified(&lead.id, result.score, &qualification_data)?;
        self.bus.publish(EventEnvelope::build(EnvelopeBuilder {
            event_type: "lead.qualified".to_string(),
            company_id: company_id.to_string(),
            source: "dispatch".to_string(),
            correlation_id: correlation_id.to_string(),
            causation_id: None,
            payload: qualification_data.clone(),
        }));
        self.followups.cancel_pending(&lead.id)?;
        self.handoff.handoff(company_id, &lead.id, &qualification_data)?;

        let closing_row = self.messages.insert(
            conversation_id,
            company_id,
            &lead.id,
            centurion_core::types::Direction::Outbound,
            centurion_core::types::ContentType::Text,
            Some(CLOSING_MESSAGE),
            None,
            &json!({"kind": "closing"}),
        )?;
        let conversation = self.conversations.get(conversation_id)?;
        if let Some(conversation) = conversation {
            let sent = self.outbound.send(
                company_id,
                correlation_id,
                None,
                usize::MAX - 1,
                conversation.channel_instance_id.as_deref(),
                &lead.phone,
                json!({"type": "text", "text": CLOSING_MESSAGE}),
                json!({"message_id": closing_row.id}),
            )?;
            if !sent {
                self.messages.delete(&closing_row.id)?;
            }
        }
        self.conversations.set_lead_state(conversation_id, "inactive")?;
        Ok(())
    }

    /// Step 13 is documented as asynchronous; this runtime runs it inline,
    /// best-effort, immediately after the reply is sent rather than on a
    /// separate task queue.
    fn extract_facts(&self, company_id: &str, lead_id: &str, consolidated: &str) {
        let extracted = extract_known_fields(consolidated);
        for (category, value) in extracted {
            let Some(text) = value.as_str() else { continue };
            if text.is_empty() {
                continue;
            }
            let embedding = embed_text(text);
            if let Err(e) = self.facts.learn(company_id, lead_id, &category, text, &embedding, FactSource::Inferred) {
                warn!(error = %e, lead_id, category = %category, "failed to persist inferred fact");
            }
        }
    }

    /// One-shot agent run behind the admin `POST /centurions/{id}/test`
    /// endpoint: the same persona/knowledge prompt assembly as a real
    /// turn, minus persistence, debounce, and tool execution.
    pub async fn test_run(&self, centurion_id: &str, company_id: &str, message: &str) -> Result<TestRunOutcome> {
        let config = load_centurion_config(&self.conn, centurion_id)?
            .ok_or_else(|| CenturionError::Config(format!("unknown centurion_id '{centurion_id}'")))?;
        let query_embedding = embed_text(message);
        let knowledge_snippets: Vec<(String, String)> = self
            .knowledge
            .search_similar(company_id, &query_embedding, None)?
            .into_iter()
            .map(|(chunk, _distance)| (chunk.id, chunk.text))
            .collect();
        let system_prompt = build_system_prompt(&config.persona_prompt, &[], &knowledge_snippets);
        let request = ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            system: system_prompt,
            messages: vec![LlmMessage { role: Role::User, content: message.to_string() }],
            max_tokens: DEFAULT_MAX_TOKENS,
            tools: Vec::new(),
        };
        let response = self
            .llm
            .send(&request)
            .await
            .map_err(|e| CenturionError::LlmUnavailable(e.to_string()))?;
        Ok(TestRunOutcome {
            model: response.model,
            response: response.content,
            usage: TestUsage {
                tokens_in: response.tokens_in,
                tokens_out: response.tokens_out,
            },
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TestUsage {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TestRunOutcome {
    pub model: String,
    pub response: String,
    pub usage: TestUsage,
}

fn media_item_to_outbound(item: &crate::prompt::MediaPlanItem) -> OutboundMessage {
    let asset_id = Some(item.asset_id.clone());
    match item.media_type.as_str() {
        "image" => OutboundMessage::Image { asset_id, url: None, mime_type: None, caption: item.caption.clone() },
        "video" => OutboundMessage::Video { asset_id, url: None, mime_type: None, caption: item.caption.clone() },
        "audio" => OutboundMessage::Audio { asset_id, url: None, mime_type: None, caption: item.caption.clone() },
        _ => OutboundMessage::Document { asset_id, url: None, mime_type: None, caption: item.caption.clone(), filename: None },
    }
}

#[async_trait]
impl ConversationProcessor for DispatchService {
    async fn process(&self, conversation_id: &str) {
        if let Err(e) = self.run_turn(conversation_id).await {
            tracing::error!(conversation_id, error = %e, "dispatch turn failed");
        }
    }
}

#[async_trait]
impl FollowUpSender for DispatchService {
    async fn send(&self, company_id: &str, conversation_id: &str, lead_id: &str, text: &str, correlation_id: &str) -> Result<bool> {
        let Some(conversation) = self.conversations.get(conversation_id)? else {
            return Err(CenturionError::InvalidInput(format!("conversation {conversation_id} not found")));
        };
        let Some(lead) = self.leads.get(lead_id)? else {
            return Err(CenturionError::InvalidInput(format!("lead {lead_id} not found")));
        };
        let row = self.messages.insert(
            conversation_id,
            company_id,
            lead_id,
            centurion_core::types::Direction::Outbound,
            centurion_core::types::ContentType::Text,
            Some(text),
            None,
            &json!({"kind": "followup"}),
        )?;
        let sent = self.outbound.send(
            company_id,
            correlation_id,
            None,
            0,
            conversation.channel_instance_id.as_deref(),
            &lead.phone,
            json!({"type": "text", "text": text}),
            json!({"message_id": row.id}),
        )?;
        if !sent {
            self.messages.delete(&row.id)?;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use centurion_agent::{ChatResponse, ProviderError};
    use centurion_core::types::{ChannelType, ContentType, Direction};
    use centurion_idempotency::IdempotencyStore;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct CannedProvider(String);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: self.0.clone(),
                model: "canned".to_string(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            })
        }
    }

    fn fresh_conn() -> SharedConn {
        let conn = Connection::open_in_memory().unwrap();
        centurion_store::db::init_db(&conn).unwrap();
        centurion_idempotency::init_db(&conn).unwrap();
        centurion_followup::db::init_db(&conn).unwrap();
        crate::db::init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn service(conn: SharedConn, provider_text: &str) -> DispatchService {
        let idempotency = Arc::new(IdempotencyStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let bus = EventBus::new();
        let outbound = Arc::new(OutboundSender::new(idempotency, bus.clone()));
        let handoff = Arc::new(HandoffService::new(conn.clone(), std::env::temp_dir().to_string_lossy().to_string()));
        DispatchService::new(
            conn,
            Arc::new(ChannelRouter::new()),
            Arc::new(CannedProvider(provider_text.to_string())),
            Arc::new(NoopToolSetProvider),
            None,
            outbound,
            handoff,
            bus,
        )
    }

    fn seed_centurion_config(conn: &SharedConn, centurion_id: &str, company_id: &str) {
        let c = conn.lock().unwrap();
        c.execute(
            "INSERT INTO centurion_configs (id, company_id, persona_prompt, debounce_wait_ms, chunk_max_chars, \
             chunk_delay_ms, chunking_enabled, media_enrichment_enabled, qualification_rules, created_at, updated_at) \
             VALUES (?1, ?2, 'Voce e um assistente de vendas.', 3000, 1200, 0, 0, 0, NULL, 'n', 'n')",
            rusqlite::params![centurion_id, company_id],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn run_turn_sends_reply_and_clears_pending() {
        let conn = fresh_conn();
        seed_centurion_config(&conn, "cent-1", "acme");
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+15550000", None).unwrap();
        let conv = convs.get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, Some("inst-1")).unwrap();
        let now = Utc::now();
        convs.append_pending_message(&conv.id, "ola, quero saber mais", now, now, &serde_json::json!({})).unwrap();

        let svc = service(conn.clone(), "Claro, posso ajudar!");
        svc.run_turn(&conv.id).await.unwrap();

        let reloaded = convs.get(&conv.id).unwrap().unwrap();
        assert!(reloaded.pending_messages.is_empty());

        let messages = MessageRepository::new(conn);
        let history = messages.list_recent(&conv.id, 10, true).unwrap();
        assert!(history.iter().any(|m| m.direction == Direction::Outbound && m.content_type == ContentType::Text));
    }

    #[tokio::test]
    async fn run_turn_with_no_phone_just_clears_pending() {
        let conn = fresh_conn();
        seed_centurion_config(&conn, "cent-1", "acme");
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "", None).unwrap();
        let conv = convs.get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, Some("inst-1")).unwrap();
        let now = Utc::now();
        convs.append_pending_message(&conv.id, "oi", now, now, &serde_json::json!({})).unwrap();

        let svc = service(conn.clone(), "resposta");
        svc.run_turn(&conv.id).await.unwrap();

        let reloaded = convs.get(&conv.id).unwrap().unwrap();
        assert!(reloaded.pending_messages.is_empty());
        let messages = MessageRepository::new(conn);
        assert!(messages.list_recent(&conv.id, 10, true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_turn_falls_back_when_llm_returns_empty_text() {
        let conn = fresh_conn();
        seed_centurion_config(&conn, "cent-1", "acme");
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+15550001", None).unwrap();
        let conv = convs.get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, Some("inst-1")).unwrap();
        let now = Utc::now();
        convs.append_pending_message(&conv.id, "oi", now, now, &serde_json::json!({})).unwrap();

        let svc = service(conn.clone(), "");
        svc.run_turn(&conv.id).await.unwrap();

        let messages = MessageRepository::new(conn);
        let history = messages.list_recent(&conv.id, 10, true).unwrap();
        let sent = history.iter().find(|m| m.direction == Direction::Outbound).unwrap();
        assert_eq!(sent.content.as_deref(), Some(EMPTY_RESPONSE_FALLBACK));
    }
}
