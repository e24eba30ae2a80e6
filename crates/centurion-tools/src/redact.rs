use serde_json::Value;
use std::collections::HashSet;

const SENSITIVE_KEYS: &[&str] = &[
    "password", "secret", "token", "api_key", "apikey", "authorization",
    "access_token", "refresh_token", "client_secret", "private_key",
];

/// Redacts sensitive keys from a JSON value before it's logged or
/// persisted to `audit_logs`. Cycle-safe: `serde_json::Value` is a
/// tree so true cycles can't occur, but deeply self-referential arrays
/// built by a misbehaving tool are still bounded by a visited-node budget.
pub fn redact(value: &Value) -> Value {
    let mut visited = HashSet::new();
    redact_inner(value, &mut visited, 0)
}

const MAX_NODES: usize = 10_000;

fn redact_inner(value: &Value, visited: &mut HashSet<usize>, nodes_seen: usize) -> Value {
    if nodes_seen > MAX_NODES {
        return Value::String("__redaction_depth_exceeded__".to_string());
    }
    match value {
        Value::Object(map) => {
            let ptr = map as *const _ as usize;
            if !visited.insert(ptr) {
                return Value::String("__cycle__".to_string());
            }
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let lower = k.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                    out.insert(k.clone(), Value::String("__redacted__".to_string()));
                } else {
                    out.insert(k.clone(), redact_inner(v, visited, nodes_seen + 1));
                }
            }
            visited.remove(&ptr);
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| redact_inner(v, visited, nodes_seen + 1))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_known_sensitive_keys_at_any_depth() {
        let input = json!({
            "user": "ana",
            "auth": { "api_key": "sk-live-123", "nested": { "password": "hunter2" } },
        });
        let out = redact(&input);
        assert_eq!(out["auth"]["api_key"], "__redacted__");
        assert_eq!(out["auth"]["nested"]["password"], "__redacted__");
        assert_eq!(out["user"], "ana");
    }

    #[test]
    fn leaves_unrelated_keys_untouched() {
        let input = json!({"lead_name": "Joao", "amount": 1200});
        assert_eq!(redact(&input), input);
    }
}
