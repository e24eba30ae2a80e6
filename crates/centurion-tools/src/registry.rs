use crate::executor::HttpTool;
use crate::types::Tool;
use centurion_agent::ToolDefinition;
use centurion_core::error::{CenturionError, Result};
use centurion_egress::{EgressPolicy, PayloadLimits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves an encrypted secret blob (`v1:{iv_b64}:{tag_b64}:{ct_b64}`) to
/// its plaintext. Implemented by the gateway's AES-GCM keyring; kept as
/// a seam here the same way `centurion-agent::LlmProvider` decouples the
/// dispatch pipeline from one concrete LLM backend.
pub trait SecretResolver: Send + Sync {
    fn decrypt(&self, blob: &str) -> Result<String>;
}

/// Resolver used when a tool has no encrypted secrets — returns the input
/// unchanged, for configs that store plaintext dev credentials.
pub struct PlaintextResolver;

impl SecretResolver for PlaintextResolver {
    fn decrypt(&self, blob: &str) -> Result<String> {
        Ok(blob.to_string())
    }
}

/// Production resolver: decrypts `v1:{iv_b64}:{tag_b64}:{ct_b64}` auth
/// blobs through the AES-GCM keyring, falling back through
/// `CENTURION_SECRET_KEY_PREVIOUS` entries on rotation.
pub struct KeyringResolver {
    keyring: centurion_core::keyring::Keyring,
}

impl KeyringResolver {
    pub fn new(keyring: centurion_core::keyring::Keyring) -> Self {
        Self { keyring }
    }
}

impl SecretResolver for KeyringResolver {
    fn decrypt(&self, blob: &str) -> Result<String> {
        self.keyring.decrypt(blob)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    Bearer { token: String },
    ApiKey { header: String, key: String },
    Basic { username: String, password: String },
}

/// One tenant-defined HTTP tool (C17), deserialized straight out of
/// `tool_configs`. `auth`'s secret fields are encrypted blobs until resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout_ms() -> u64 {
    20_000
}

/// Builds the callable tool set for one centurion: custom HTTP tools plus
/// (via `McpBridge`) namespaced MCP-derived tools.
pub struct ToolRegistry {
    egress: Arc<EgressPolicy>,
    limits: Arc<PayloadLimits>,
    resolver: Arc<dyn SecretResolver>,
}

impl ToolRegistry {
    pub fn new(egress: Arc<EgressPolicy>, limits: Arc<PayloadLimits>, resolver: Arc<dyn SecretResolver>) -> Self {
        Self {
            egress,
            limits,
            resolver,
        }
    }

    /// Resolves auth secrets and builds one executable `HttpTool`.
    pub fn build_http_tool(&self, cfg: HttpToolConfig) -> Result<HttpTool> {
        let auth = match &cfg.auth {
            AuthConfig::None => AuthConfig::None,
            AuthConfig::Bearer { token } => AuthConfig::Bearer {
                token: self.resolver.decrypt(token)?,
            },
            AuthConfig::ApiKey { header, key } => AuthConfig::ApiKey {
                header: header.clone(),
                key: self.resolver.decrypt(key)?,
            },
            AuthConfig::Basic { username, password } => AuthConfig::Basic {
                username: username.clone(),
                password: self.resolver.decrypt(password)?,
            },
        };

        if cfg.input_schema.get("type").is_none() {
            return Err(CenturionError::InvalidInput(format!(
                "tool '{}' input_schema missing 'type'",
                cfg.name
            )));
        }

        Ok(HttpTool::new(
            HttpToolConfig { auth, ..cfg },
            Arc::clone(&self.egress),
            Arc::clone(&self.limits),
        ))
    }

    /// Builds the full tool set for one centurion from config rows plus any
    /// MCP-derived tools the caller already fetched from `McpBridge`.
    pub fn get_tools(
        &self,
        http_configs: Vec<HttpToolConfig>,
        mcp_tools: Vec<Box<dyn Tool>>,
    ) -> Result<Vec<Box<dyn Tool>>> {
        let mut tools: Vec<Box<dyn Tool>> = Vec::with_capacity(http_configs.len() + mcp_tools.len());
        for cfg in http_configs {
            tools.push(Box::new(self.build_http_tool(cfg)?));
        }
        tools.extend(mcp_tools);
        Ok(tools)
    }
}

/// Converts a tool set into the `ToolDefinition` shape the LLM provider
/// expects ("tool set = tenant tools ∪ MCP-derived tools").
pub fn tool_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tool_with_malformed_input_schema() {
        let registry = ToolRegistry::new(
            Arc::new(EgressPolicy::from_config(&Default::default())),
            Arc::new(PayloadLimits::from_config(&Default::default())),
            Arc::new(PlaintextResolver),
        );
        let cfg = HttpToolConfig {
            name: "broken".into(),
            description: "d".into(),
            url: "https://api.example.com/x".into(),
            method: "POST".into(),
            auth: AuthConfig::None,
            headers: HashMap::new(),
            input_schema: serde_json::json!({}),
            output_schema: None,
            timeout_ms: 1000,
        };
        let err = registry.build_http_tool(cfg).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn resolves_bearer_token_through_resolver() {
        struct UpperResolver;
        impl SecretResolver for UpperResolver {
            fn decrypt(&self, blob: &str) -> Result<String> {
                Ok(blob.to_uppercase())
            }
        }
        let registry = ToolRegistry::new(
            Arc::new(EgressPolicy::from_config(&Default::default())),
            Arc::new(PayloadLimits::from_config(&Default::default())),
            Arc::new(UpperResolver),
        );
        let cfg = HttpToolConfig {
            name: "check".into(),
            description: "d".into(),
            url: "https://api.example.com/check".into(),
            method: "GET".into(),
            auth: AuthConfig::Bearer { token: "v1:secret".into() },
            headers: HashMap::new(),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            timeout_ms: 1000,
        };
        let tool = registry.build_http_tool(cfg).unwrap();
        assert_eq!(tool.name(), "check");
    }
}
