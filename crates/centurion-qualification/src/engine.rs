use crate::extract::extract_known_fields;
use crate::rules::{Criterion, CriterionType, QualificationRules};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// One criterion's evaluation outcome, surfaced for explainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionOutcome {
    pub key: String,
    pub met: bool,
    pub evidence: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationResult {
    pub score: f64,
    pub required_met: bool,
    pub is_qualified: bool,
    pub extracted: Map<String, Value>,
    pub criteria: Vec<CriterionOutcome>,
    pub summary: String,
}

/// LLM-assisted extraction/evaluation seam. Decoupled
/// from any concrete provider the same way the dispatch pipeline decouples
/// from `centurion-agent::LlmProvider` — a parse failure or absent
/// integration always falls back to the deterministic path, never to a
/// partial result.
#[async_trait]
pub trait LlmQualifier: Send + Sync {
    /// Structured extraction for missing `field_present` values. Returns the
    /// subset of fields it could confidently fill.
    async fn extract_fields(&self, conversation_text: &str, missing_fields: &[String]) -> Option<Map<String, Value>>;

    /// Evaluates `llm`-typed criteria, one outcome per criterion.
    async fn evaluate_criteria(&self, conversation_text: &str, criteria: &[Criterion]) -> Option<Vec<CriterionOutcome>>;

    /// Optional natural-language summary of the conversation's qualification state.
    async fn summarize(&self, conversation_text: &str, outcomes: &[CriterionOutcome]) -> Option<String>;
}

/// Runs the full qualification pass: deterministic `field_present` scoring
/// merged with heuristic extraction, optionally topped up by an
/// LLM-assisted pass for missing fields and `llm`-typed criteria.
pub async fn evaluate(
    rules: &QualificationRules,
    conversation_text: &str,
    llm: Option<&dyn LlmQualifier>,
) -> QualificationResult {
    let mut extracted = extract_known_fields(conversation_text);

    let field_criteria: Vec<&Criterion> = rules
        .criteria
        .iter()
        .filter(|c| c.criterion_type == CriterionType::FieldPresent)
        .collect();
    let missing: Vec<String> = field_criteria
        .iter()
        .filter_map(|c| c.field.clone())
        .filter(|f| !extracted.contains_key(f))
        .collect();

    if let (Some(llm), false) = (llm, missing.is_empty()) {
        if let Some(filled) = llm.extract_fields(conversation_text, &missing).await {
            for (k, v) in filled {
                extracted.insert(k, v);
            }
        }
    }

    let mut outcomes: Vec<CriterionOutcome> = field_criteria
        .iter()
        .map(|c| {
            let field = c.field.clone().unwrap_or_else(|| c.key.clone());
            let met = extracted.get(&field).map(|v| !v.is_null() && v.as_str().map(|s| !s.is_empty()).unwrap_or(true)).unwrap_or(false);
            CriterionOutcome {
                key: c.key.clone(),
                met,
                evidence: extracted.get(&field).and_then(|v| v.as_str()).map(String::from),
                confidence: None,
            }
        })
        .collect();

    let llm_criteria: Vec<Criterion> = rules
        .criteria
        .iter()
        .filter(|c| c.criterion_type == CriterionType::Llm)
        .cloned()
        .collect();

    if !llm_criteria.is_empty() {
        let llm_outcomes = match llm {
            Some(llm) => llm.evaluate_criteria(conversation_text, &llm_criteria).await,
            None => None,
        };
        match llm_outcomes {
            Some(results) => outcomes.extend(results),
            None => {
                debug!("no LLM integration for llm-typed criteria, treating as unmet");
                outcomes.extend(llm_criteria.iter().map(|c| CriterionOutcome {
                    key: c.key.clone(),
                    met: false,
                    evidence: None,
                    confidence: None,
                }));
            }
        }
    }

    let score = score(rules, &outcomes);
    let required_met = rules
        .criteria
        .iter()
        .filter(|c| c.required)
        .all(|c| outcomes.iter().find(|o| o.key == c.key).map(|o| o.met).unwrap_or(false));
    // Required-gate comes strictly before the threshold comparison.
    let is_qualified = !rules.criteria.is_empty() && required_met && score >= rules.threshold;

    let summary = match llm {
        Some(llm) => llm.summarize(conversation_text, &outcomes).await.unwrap_or_else(|| deterministic_summary(&outcomes)),
        None => deterministic_summary(&outcomes),
    };

    QualificationResult { score, required_met, is_qualified, extracted, criteria: outcomes, summary }
}

fn score(rules: &QualificationRules, outcomes: &[CriterionOutcome]) -> f64 {
    let total_weight: f64 = rules.criteria.iter().map(|c| c.weight).sum();
    if total_weight > 0.0 {
        let met_weight: f64 = rules
            .criteria
            .iter()
            .filter(|c| outcomes.iter().find(|o| o.key == c.key).map(|o| o.met).unwrap_or(false))
            .map(|c| c.weight)
            .sum();
        met_weight / total_weight
    } else if !rules.criteria.is_empty() {
        let met_count = outcomes.iter().filter(|o| o.met).count();
        met_count as f64 / rules.criteria.len() as f64
    } else {
        0.0
    }
}

fn deterministic_summary(outcomes: &[CriterionOutcome]) -> String {
    let missing: Vec<&str> = outcomes.iter().filter(|o| !o.met).map(|o| o.key.as_str()).collect();
    if missing.is_empty() {
        "Todos os critérios foram atendidos.".to_string()
    } else {
        format!("Faltam: {}", missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parse_rules;
    use serde_json::json;

    #[tokio::test]
    async fn deterministic_path_qualifies_when_threshold_met() {
        let rules = parse_rules(&json!({
            "threshold": 0.2,
            "criteria": [{"key": "budget", "type": "field_present", "field": "budget", "weight": 1.0, "required": true}]
        }))
        .unwrap();
        let result = evaluate(&rules, "Orçamento R$ 1.500,00. Quero fechar hoje.", None).await;
        assert!(result.is_qualified);
        assert_eq!(result.score, 1.0);
    }

    #[tokio::test]
    async fn required_gate_blocks_qualification_even_at_full_score() {
        let rules = parse_rules(&json!({
            "threshold": 0.1,
            "criteria": [{"key": "cpf", "type": "field_present", "field": "cpf", "weight": 1.0, "required": true}]
        }))
        .unwrap();
        let result = evaluate(&rules, "sem cpf mencionado aqui", None).await;
        assert!(!result.required_met);
        assert!(!result.is_qualified);
    }

    #[tokio::test]
    async fn empty_criteria_never_qualifies() {
        let rules = parse_rules(&json!({"threshold": 0.0, "criteria": []})).unwrap();
        let result = evaluate(&rules, "qualquer coisa", None).await;
        assert!(!result.is_qualified);
    }

    struct FakeLlm;

    #[async_trait]
    impl LlmQualifier for FakeLlm {
        async fn extract_fields(&self, _text: &str, _missing: &[String]) -> Option<Map<String, Value>> {
            None
        }

        async fn evaluate_criteria(&self, _text: &str, criteria: &[Criterion]) -> Option<Vec<CriterionOutcome>> {
            Some(criteria.iter().map(|c| CriterionOutcome { key: c.key.clone(), met: true, evidence: None, confidence: Some(0.9) }).collect())
        }

        async fn summarize(&self, _text: &str, _outcomes: &[CriterionOutcome]) -> Option<String> {
            Some("resumo llm".to_string())
        }
    }

    #[tokio::test]
    async fn llm_criteria_use_llm_outcome_when_available() {
        let rules = parse_rules(&json!({
            "threshold": 1.0,
            "criteria": [{"key": "intent", "type": "llm", "prompt": "quer comprar?", "weight": 1.0, "required": false}]
        }))
        .unwrap();
        let result = evaluate(&rules, "quero fechar hoje", Some(&FakeLlm)).await;
        assert!(result.is_qualified);
        assert_eq!(result.summary, "resumo llm");
    }
}
