use centurion_core::error::{CenturionError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One scoring criterion of a `QualificationRules` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub key: String,
    #[serde(rename = "type")]
    pub criterion_type: CriterionType,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionType {
    FieldPresent,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationRules {
    pub threshold: f64,
    pub criteria: Vec<Criterion>,
}

/// Parses a rules document, deterministically and order-preserving.
/// Accepts the current shape (`{threshold, criteria}`) and auto-lifts the
/// legacy shape (`{required_fields, threshold}`) into equal-weight
/// `field_present` criteria. Weights and threshold are clamped to `[0,1]`.
pub fn parse_rules(value: &Value) -> Result<QualificationRules> {
    let threshold = value
        .get("threshold")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);

    if let Some(criteria) = value.get("criteria").and_then(|v| v.as_array()) {
        let parsed = criteria
            .iter()
            .map(|c| {
                let mut criterion: Criterion = serde_json::from_value(c.clone())
                    .map_err(|e| CenturionError::InvalidInput(format!("invalid criterion: {e}")))?;
                criterion.weight = criterion.weight.clamp(0.0, 1.0);
                Ok(criterion)
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(QualificationRules { threshold, criteria: parsed });
    }

    if let Some(fields) = value.get("required_fields").and_then(|v| v.as_array()) {
        let criteria = fields
            .iter()
            .filter_map(|f| f.as_str())
            .map(|field| Criterion {
                key: field.to_string(),
                criterion_type: CriterionType::FieldPresent,
                weight: 1.0,
                required: true,
                field: Some(field.to_string()),
                prompt: None,
            })
            .collect();
        return Ok(QualificationRules { threshold, criteria });
    }

    Ok(QualificationRules { threshold, criteria: Vec::new() })
}

/// SHA-256 of the canonical (key-sorted) JSON form of the rules — stable
/// across key-order permutations of an equivalent document.
pub fn rules_hash(rules: &QualificationRules) -> String {
    let canonical = canonicalize(&serde_json::to_value(rules).unwrap_or(Value::Null));
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_required_fields_lift_to_equal_weight_criteria() {
        let rules = parse_rules(&json!({"required_fields": ["budget", "date"], "threshold": 1.0})).unwrap();
        assert_eq!(rules.criteria.len(), 2);
        assert!(rules.criteria.iter().all(|c| c.weight == 1.0 && c.required));
    }

    #[test]
    fn weights_and_threshold_are_clamped() {
        let rules = parse_rules(&json!({
            "threshold": 5.0,
            "criteria": [{"key": "budget", "type": "field_present", "field": "budget", "weight": 3.0, "required": true}]
        }))
        .unwrap();
        assert_eq!(rules.threshold, 1.0);
        assert_eq!(rules.criteria[0].weight, 1.0);
    }

    #[test]
    fn rules_hash_is_stable_across_key_order() {
        let a = parse_rules(&json!({"threshold": 0.5, "criteria": [{"key":"budget","type":"field_present","field":"budget","weight":0.5,"required":true}]})).unwrap();
        let b = parse_rules(&json!({"criteria": [{"field":"budget","required":true,"weight":0.5,"type":"field_present","key":"budget"}], "threshold": 0.5})).unwrap();
        assert_eq!(rules_hash(&a), rules_hash(&b));
    }
}
