//! `ToolSetProvider` impl composing `ToolRegistry` (custom HTTP tools) and
//! `McpBridge` (namespaced MCP-derived tools) for one centurion, composing
//! `centurion_tools::registry`/`centurion_tools::mcp`.

use async_trait::async_trait;
use centurion_core::types::ChannelType;
use centurion_dispatch::ToolSetProvider;
use centurion_store::repository::SharedConn;
use centurion_tools::mcp::McpBridge;
use centurion_tools::registry::ToolRegistry;
use centurion_tools::types::Tool;
use centurion_tools::{load_mcp_servers, load_tool_configs};
use std::sync::Arc;
use tracing::warn;

pub struct CenturionToolSetProvider {
    conn: SharedConn,
    registry: ToolRegistry,
    mcp: Arc<McpBridge>,
}

impl CenturionToolSetProvider {
    pub fn new(conn: SharedConn, registry: ToolRegistry, mcp: Arc<McpBridge>) -> Self {
        Self { conn, registry, mcp }
    }
}

#[async_trait]
impl ToolSetProvider for CenturionToolSetProvider {
    async fn tools_for(&self, _company_id: &str, centurion_id: &str, _channel: ChannelType) -> Vec<Box<dyn Tool>> {
        let (http_configs, mcp_servers) = {
            let conn = self.conn.lock().unwrap();
            let http = load_tool_configs(&conn, centurion_id).unwrap_or_default();
            let mcp = load_mcp_servers(&conn, centurion_id).unwrap_or_default();
            (http, mcp)
        };

        let mut mcp_tools = Vec::new();
        for server in &mcp_servers {
            mcp_tools.extend(self.mcp.tools_for(server).await);
        }

        match self.registry.get_tools(http_configs, mcp_tools) {
            Ok(tools) => tools,
            Err(e) => {
                warn!(centurion_id, error = %e, "failed to build tool set, continuing without tools");
                Vec::new()
            }
        }
    }
}
