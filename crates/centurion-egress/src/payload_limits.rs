use centurion_core::config::PayloadLimitsConfig;
use centurion_core::error::{CenturionError, Result};
use serde_json::Value;

/// Byte/depth/list/string caps applied to tool arguments, tool results and
/// media payloads (C4). Ported from the original `payload_limits.py`.
#[derive(Debug, Clone)]
pub struct PayloadLimits {
    pub tool_args_max_bytes: usize,
    pub tool_result_max_bytes: usize,
    pub media_download_max_bytes: u64,
    pub stt_audio_max_bytes: u64,
    pub vision_image_max_bytes: u64,
    pub max_depth: usize,
    pub max_list_len: usize,
    pub max_string_len: usize,
}

impl PayloadLimits {
    pub fn from_config(cfg: &PayloadLimitsConfig) -> Self {
        Self {
            tool_args_max_bytes: cfg.tool_args_max_bytes,
            tool_result_max_bytes: cfg.tool_result_max_bytes,
            media_download_max_bytes: cfg.media_download_max_bytes,
            stt_audio_max_bytes: cfg.stt_audio_max_bytes,
            vision_image_max_bytes: cfg.vision_image_max_bytes,
            max_depth: cfg.max_depth,
            max_list_len: cfg.max_list_len,
            max_string_len: cfg.max_string_len,
        }
    }

    /// Rejects oversized tool call arguments outright — arguments are an
    /// input the agent controls, so we fail closed rather than truncate.
    pub fn ensure_tool_args(&self, args: &Value) -> Result<()> {
        let size = json_size_bytes(args);
        if size > self.tool_args_max_bytes {
            return Err(CenturionError::PayloadTooLarge {
                size,
                max: self.tool_args_max_bytes,
            });
        }
        Ok(())
    }

    /// Truncates a tool result to fit the byte budget: first by recursive
    /// depth/list-length/string-length capping, then — if still oversized —
    /// by falling back to a compact truncated string representation.
    pub fn truncate_tool_result(&self, value: Value) -> Value {
        let truncated = truncate_json(&value, self.max_depth, self.max_list_len, self.max_string_len, 0);
        if json_size_bytes(&truncated) <= self.tool_result_max_bytes {
            return truncated;
        }
        let compact = serde_json::to_string(&truncated).unwrap_or_default();
        Value::String(truncate_str(&compact, self.tool_result_max_bytes))
    }
}

pub fn json_size_bytes(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(usize::MAX)
}

fn truncate_str(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    // Respect char boundaries when slicing.
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &s[..end])
}

fn truncate_json(value: &Value, max_depth: usize, max_list_len: usize, max_string_len: usize, depth: usize) -> Value {
    if depth >= max_depth {
        return Value::String("__truncated__".to_string());
    }
    match value {
        Value::String(s) => Value::String(truncate_str(s, max_string_len)),
        Value::Array(arr) => {
            let capped: Vec<Value> = arr
                .iter()
                .take(max_list_len)
                .map(|v| truncate_json(v, max_depth, max_list_len, max_string_len, depth + 1))
                .collect();
            Value::Array(capped)
        }
        Value::Object(map) => {
            let capped: serde_json::Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), truncate_json(v, max_depth, max_list_len, max_string_len, depth + 1)))
                .collect();
            Value::Object(capped)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> PayloadLimits {
        PayloadLimits::from_config(&PayloadLimitsConfig {
            tool_args_max_bytes: 64,
            tool_result_max_bytes: 64,
            media_download_max_bytes: 1000,
            stt_audio_max_bytes: 1000,
            vision_image_max_bytes: 1000,
            max_depth: 2,
            max_list_len: 3,
            max_string_len: 8,
        })
    }

    #[test]
    fn rejects_oversized_tool_args() {
        let l = limits();
        let args = json!({"text": "x".repeat(200)});
        let err = l.ensure_tool_args(&args).unwrap_err();
        assert_eq!(err.code(), "PAYLOAD_TOO_LARGE");
    }

    #[test]
    fn truncates_deep_and_long_results() {
        let l = limits();
        let value = json!({
            "a": {"b": {"c": "too deep"}},
            "list": [1,2,3,4,5,6],
            "s": "a very long string indeed"
        });
        let out = l.truncate_tool_result(value);
        // depth 2 caps the nested "c" value
        assert_eq!(out["a"]["b"], json!("__truncated__"));
        assert_eq!(out["list"].as_array().unwrap().len(), 3);
        assert!(out["s"].as_str().unwrap().len() <= 8 + "...[truncated]".len());
    }

    #[test]
    fn falls_back_to_compact_string_when_still_oversized() {
        let l = PayloadLimits::from_config(&PayloadLimitsConfig {
            tool_args_max_bytes: 10,
            tool_result_max_bytes: 10,
            media_download_max_bytes: 1000,
            stt_audio_max_bytes: 1000,
            vision_image_max_bytes: 1000,
            max_depth: 10,
            max_list_len: 100,
            max_string_len: 100,
        });
        let value = json!({"a": "x".repeat(50), "b": "y".repeat(50)});
        let out = l.truncate_tool_result(value);
        assert!(out.is_string());
    }
}
