use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of executing a tool — returned to the LLM, never thrown.
/// Failures return a structured `{ok:false, status_code, error, details}`
/// rather than throwing, mirroring `ToolExecutionError.details` in the
/// original tool executor: `details` carries whatever context the failure
/// site has (e.g. the blocked endpoint), defaulting to an empty object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub content: serde_json::Value,
    pub error: Option<String>,
    pub status_code: Option<u16>,
    #[serde(default = "empty_object")]
    pub details: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl ToolResult {
    pub fn success(content: serde_json::Value) -> Self {
        Self {
            ok: true,
            content,
            error: None,
            status_code: None,
            details: empty_object(),
        }
    }

    /// Generic failure with no further structure — schema/validation
    /// errors and the like.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: serde_json::Value::Null,
            error: Some(message.into()),
            status_code: None,
            details: empty_object(),
        }
    }

    /// Failure from an external call: an egress block, a non-2xx HTTP
    /// response, or a transport error, with whatever `status_code`/`details`
    /// the failure site has.
    pub fn external_failure(message: impl Into<String>, status_code: Option<u16>, details: serde_json::Value) -> Self {
        Self {
            ok: false,
            content: serde_json::Value::Null,
            error: Some(message.into()),
            status_code,
            details,
        }
    }
}

/// Trait all callable tools implement, whether backed by a custom HTTP
/// endpoint or an MCP server.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}
