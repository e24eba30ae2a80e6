use crate::types::{Tool, ToolResult};
use async_trait::async_trait;
use centurion_core::config::MCP_TOOL_LIST_FRESHNESS_SECS;
use centurion_core::error::{CenturionError, Result};
use centurion_egress::EgressPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub sse_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpServerStatus {
    Connected,
    Error,
}

#[derive(Debug, Clone)]
struct McpToolDescriptor {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

struct CachedList {
    tools: Vec<McpToolDescriptor>,
    status: McpServerStatus,
    last_error: Option<String>,
    fetched_at: Instant,
}

/// Bridges MCP servers into the tool set (C17). Tool lists are
/// cached for `MCP_TOOL_LIST_FRESHNESS_SECS` — within the freshness window
/// a cached `connected` list is reused rather than re-listing on every
/// dispatch turn.
pub struct McpBridge {
    client: reqwest::Client,
    egress: Arc<EgressPolicy>,
    cache: Mutex<HashMap<String, CachedList>>,
}

impl McpBridge {
    pub fn new(egress: Arc<EgressPolicy>) -> Self {
        Self {
            client: reqwest::Client::new(),
            egress,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Lists (and wraps) callable tools for one MCP server, using the cache
    /// when it is still fresh and was last synced successfully.
    pub async fn tools_for(&self, server: &McpServerConfig) -> Vec<Box<dyn Tool>> {
        let descriptors = self.list_tools_cached(server).await;
        descriptors
            .into_iter()
            .map(|d| -> Box<dyn Tool> {
                Box::new(McpTool {
                    namespaced_name: format!("mcp_{}__{}", server.name, d.name),
                    description: d.description,
                    input_schema: d.input_schema,
                    tool_name: d.name,
                    server: server.clone(),
                    client: self.client.clone(),
                    egress: Arc::clone(&self.egress),
                })
            })
            .collect()
    }

    pub fn status_of(&self, server_name: &str) -> Option<(McpServerStatus, Option<String>)> {
        self.cache
            .lock()
            .unwrap()
            .get(server_name)
            .map(|c| (c.status, c.last_error.clone()))
    }

    async fn list_tools_cached(&self, server: &McpServerConfig) -> Vec<McpToolDescriptor> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&server.name) {
                let fresh = entry.fetched_at.elapsed() < Duration::from_secs(MCP_TOOL_LIST_FRESHNESS_SECS);
                if fresh && entry.status == McpServerStatus::Connected {
                    return entry.tools.clone();
                }
            }
        }

        match self.list_tools_live(server).await {
            Ok(tools) => {
                self.cache.lock().unwrap().insert(
                    server.name.clone(),
                    CachedList {
                        tools: tools.clone(),
                        status: McpServerStatus::Connected,
                        last_error: None,
                        fetched_at: Instant::now(),
                    },
                );
                tools
            }
            Err(e) => {
                warn!(server = %server.name, error = %e, "mcp tool listing failed");
                let mut cache = self.cache.lock().unwrap();
                let stale = cache.get(&server.name).map(|c| c.tools.clone()).unwrap_or_default();
                cache.insert(
                    server.name.clone(),
                    CachedList {
                        tools: stale.clone(),
                        status: McpServerStatus::Error,
                        last_error: Some(e.to_string()),
                        fetched_at: Instant::now(),
                    },
                );
                stale
            }
        }
    }

    async fn list_tools_live(&self, server: &McpServerConfig) -> Result<Vec<McpToolDescriptor>> {
        self.egress.assert_allowed(&server.sse_url).await?;

        let resp = self
            .client
            .post(&server.sse_url)
            .timeout(Duration::from_millis(server.timeout_ms))
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/list",
                "params": {}
            }))
            .send()
            .await
            .map_err(|e| CenturionError::ExternalFailure(format!("mcp list failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CenturionError::ExternalFailure(format!(
                "mcp server returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CenturionError::ExternalFailure(format!("mcp response parse failed: {e}")))?;

        let tools = body
            .get("result")
            .and_then(|r| r.get("tools"))
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .into_iter()
            .filter_map(|t| {
                Some(McpToolDescriptor {
                    name: t.get("name")?.as_str()?.to_string(),
                    description: t.get("description").and_then(|d| d.as_str()).unwrap_or("").to_string(),
                    input_schema: t.get("inputSchema").cloned().unwrap_or(serde_json::json!({"type": "object"})),
                })
            })
            .collect())
    }
}

struct McpTool {
    namespaced_name: String,
    description: String,
    input_schema: serde_json::Value,
    tool_name: String,
    server: McpServerConfig,
    client: reqwest::Client,
    egress: Arc<EgressPolicy>,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        if let Err(e) = self.egress.assert_allowed(&self.server.sse_url).await {
            return ToolResult::failure(e.to_string());
        }

        let resp = self
            .client
            .post(&self.server.sse_url)
            .timeout(Duration::from_millis(self.server.timeout_ms))
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": self.tool_name, "arguments": input}
            }))
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("mcp call transport error: {e}")),
        };

        let body: serde_json::Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => return ToolResult::failure(format!("mcp response parse error: {e}")),
        };

        if let Some(err) = body.get("error") {
            return ToolResult::failure(err.to_string());
        }
        ToolResult::success(body.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_serves_connected_list_within_freshness_window() {
        let bridge = McpBridge::new(Arc::new(EgressPolicy::from_config(&Default::default())));
        bridge.cache.lock().unwrap().insert(
            "crm".to_string(),
            CachedList {
                tools: vec![McpToolDescriptor {
                    name: "lookup".into(),
                    description: "d".into(),
                    input_schema: serde_json::json!({"type": "object"}),
                }],
                status: McpServerStatus::Connected,
                last_error: None,
                fetched_at: Instant::now(),
            },
        );
        let server = McpServerConfig {
            name: "crm".into(),
            sse_url: "https://mcp.example.com/sse".into(),
            timeout_ms: 1000,
        };
        let tools = bridge.tools_for(&server).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "mcp_crm__lookup");
    }

    #[tokio::test]
    async fn error_state_is_tracked_on_unreachable_server() {
        let bridge = McpBridge::new(Arc::new(EgressPolicy::from_config(&Default::default())));
        let server = McpServerConfig {
            name: "flaky".into(),
            sse_url: "http://127.0.0.1:1/sse".into(),
            timeout_ms: 100,
        };
        let tools = bridge.tools_for(&server).await;
        assert!(tools.is_empty());
        let (status, last_error) = bridge.status_of("flaky").unwrap();
        assert_eq!(status, McpServerStatus::Error);
        assert!(last_error.is_some());
    }
}
