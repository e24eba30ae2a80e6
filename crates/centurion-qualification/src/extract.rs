use regex::Regex;
use serde_json::{Map, Value};

/// Heuristic extractors for a few well-known fields. Best effort:
/// a field missing from the text is simply absent from the result, letting
/// the caller fall back to an LLM-assisted extraction or mark it unmet.
pub fn extract_known_fields(text: &str) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(budget) = extract_budget(text) {
        out.insert("budget".to_string(), Value::String(budget));
    }
    if let Some(date) = extract_date(text) {
        out.insert("date".to_string(), Value::String(date));
    }
    if let Some(location) = extract_location(text) {
        out.insert("location".to_string(), Value::String(location));
    }
    out
}

fn extract_budget(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)R\$\s?[\d.,]+|\$\s?[\d.,]+|\b\d{3,}\s?(?:reais|mil)\b").ok()?;
    re.find(text).map(|m| m.as_str().trim().to_string())
}

fn extract_date(text: &str) -> Option<String> {
    let re = Regex::new(
        r"(?i)\b\d{1,2}[/-]\d{1,2}(?:[/-]\d{2,4})?\b|\bhoje\b|\bamanh[ãa]\b|\b(?:segunda|ter[cç]a|quarta|quinta|sexta|s[áa]bado|domingo)(?:-feira)?\b",
    )
    .ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}

fn extract_location(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)\bem\s+([A-ZÀ-Ý][\wÀ-ÿ]+(?:\s+[A-ZÀ-Ý][\wÀ-ÿ]+)*)").ok()?;
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_currency_budget() {
        let fields = extract_known_fields("Orçamento R$ 1.500,00. Quero fechar hoje.");
        assert_eq!(fields.get("budget").unwrap().as_str().unwrap(), "R$ 1.500,00");
        assert_eq!(fields.get("date").unwrap().as_str().unwrap(), "hoje");
    }

    #[test]
    fn extracts_location_after_em() {
        let fields = extract_known_fields("Moro em Sao Paulo e quero agendar.");
        assert_eq!(fields.get("location").unwrap().as_str().unwrap(), "Sao Paulo");
    }

    #[test]
    fn missing_fields_are_simply_absent() {
        let fields = extract_known_fields("oi, tudo bem?");
        assert!(fields.get("budget").is_none());
    }
}
