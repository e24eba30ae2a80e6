//! OpenAI-backed `LlmQualifier`: every call is pinned to a strict JSON
//! schema via `response_format: json_schema`, so a malformed model reply surfaces as a
//! parse failure rather than a partial result. Any failure here — HTTP,
//! non-2xx, schema mismatch — returns `None` and `evaluate` falls back to
//! the deterministic path; this adapter never itself decides "unqualified".

use crate::engine::{CriterionOutcome, LlmQualifier};
use crate::rules::Criterion;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

const DEFAULT_MAX_TOKENS: u32 = 800;

/// Concrete adapter for the qualification engine's LLM-assisted path. Only
/// one provider ships here, matching `centurion_agent::OpenAiProvider`'s
/// "seam, not an SDK" scope.
pub struct OpenAiQualifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiQualifier {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    async fn structured_completion(&self, system: &str, user: &str, schema_name: &str, schema: Value) -> Option<Value> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": DEFAULT_MAX_TOKENS,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": schema,
                }
            },
        });

        let resp = match self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "qualification LLM call failed");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "qualification LLM returned an error status");
            return None;
        }

        let parsed: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "qualification LLM response not valid JSON");
                return None;
            }
        };

        let content = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())?;

        serde_json::from_str::<Value>(content).ok()
    }
}

#[async_trait]
impl LlmQualifier for OpenAiQualifier {
    async fn extract_fields(&self, conversation_text: &str, missing_fields: &[String]) -> Option<Map<String, Value>> {
        if missing_fields.is_empty() {
            return None;
        }
        let mut properties = Map::new();
        for field in missing_fields {
            properties.insert(field.clone(), json!({"type": ["string", "null"]}));
        }
        let schema = json!({
            "type": "object",
            "properties": properties,
            "required": missing_fields,
            "additionalProperties": false,
        });
        let system = "Extraia os campos solicitados da conversa de vendas abaixo. \
             Responda apenas com os campos pedidos; use null quando não houver informação.";
        let user = format!("Conversa:\n{conversation_text}\n\nCampos: {}", missing_fields.join(", "));

        let value = self.structured_completion(system, &user, "extracted_fields", schema).await?;
        let obj = value.as_object()?;
        let filled: Map<String, Value> = obj
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if filled.is_empty() {
            None
        } else {
            Some(filled)
        }
    }

    async fn evaluate_criteria(&self, conversation_text: &str, criteria: &[Criterion]) -> Option<Vec<CriterionOutcome>> {
        if criteria.is_empty() {
            return None;
        }
        let items_schema = json!({
            "type": "object",
            "properties": {
                "key": {"type": "string"},
                "met": {"type": "boolean"},
                "evidence": {"type": ["string", "null"]},
                "confidence": {"type": ["number", "null"]},
            },
            "required": ["key", "met", "evidence", "confidence"],
            "additionalProperties": false,
        });
        let schema = json!({
            "type": "object",
            "properties": {"outcomes": {"type": "array", "items": items_schema}},
            "required": ["outcomes"],
            "additionalProperties": false,
        });

        let criteria_desc: Vec<String> = criteria
            .iter()
            .map(|c| format!("- key={} prompt={}", c.key, c.prompt.clone().unwrap_or_default()))
            .collect();
        let system = "Avalie cada critério abaixo contra a conversa e responda se foi atendido (met), \
             com uma evidência curta e confiança de 0 a 1.";
        let user = format!("Conversa:\n{conversation_text}\n\nCritérios:\n{}", criteria_desc.join("\n"));

        let value = self.structured_completion(system, &user, "criteria_outcomes", schema).await?;
        let outcomes: Vec<CriterionOutcome> = serde_json::from_value(value.get("outcomes")?.clone()).ok()?;
        if outcomes.is_empty() {
            None
        } else {
            Some(outcomes)
        }
    }

    async fn summarize(&self, conversation_text: &str, outcomes: &[CriterionOutcome]) -> Option<String> {
        let outcomes_text = outcomes
            .iter()
            .map(|o| format!("{}: {}", o.key, if o.met { "atendido" } else { "pendente" }))
            .collect::<Vec<_>>()
            .join(", ");
        let schema = json!({
            "type": "object",
            "properties": {"summary": {"type": "string"}},
            "required": ["summary"],
            "additionalProperties": false,
        });
        let system = "Resuma em uma frase curta o estado de qualificação deste lead.";
        let user = format!("Conversa:\n{conversation_text}\n\nCritérios: {outcomes_text}");

        let value = self.structured_completion(system, &user, "qualification_summary", schema).await?;
        value.get("summary")?.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }
}
