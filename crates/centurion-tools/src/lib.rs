pub mod db;
pub mod executor;
pub mod mcp;
pub mod redact;
pub mod registry;
pub mod types;

pub use db::{init_db, load_mcp_servers, load_tool_configs, record_audit_log};
pub use executor::ToolExecutor;
pub use mcp::{McpBridge, McpServerConfig, McpServerStatus};
pub use redact::redact;
pub use registry::{AuthConfig, HttpToolConfig, ToolRegistry};
pub use types::{Tool, ToolResult};
