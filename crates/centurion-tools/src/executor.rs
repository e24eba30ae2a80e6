use crate::registry::{AuthConfig, HttpToolConfig};
use crate::types::{Tool, ToolResult};
use async_trait::async_trait;
use centurion_egress::{EgressPolicy, PayloadLimits};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;

/// One custom HTTP tool (C17). Execution enforces C4 egress policy and
/// argument/result size limits, validates the call against its JSON
/// schemas, and retries transport/timeout failures with jittered
/// exponential backoff.
pub struct HttpTool {
    cfg: HttpToolConfig,
    client: reqwest::Client,
    egress: Arc<EgressPolicy>,
    limits: Arc<PayloadLimits>,
}

impl HttpTool {
    pub fn new(cfg: HttpToolConfig, egress: Arc<EgressPolicy>, limits: Arc<PayloadLimits>) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
            egress,
            limits,
        }
    }

    fn validate_input(&self, input: &serde_json::Value) -> Result<(), String> {
        jsonschema::validate(&self.cfg.input_schema, input)
            .map_err(|e| format!("input schema validation failed: {e}"))
    }

    fn validate_output(&self, output: &serde_json::Value) -> Result<(), String> {
        match &self.cfg.output_schema {
            Some(schema) => jsonschema::validate(schema, output)
                .map_err(|e| format!("output schema validation failed: {e}")),
            None => Ok(()),
        }
    }

    fn apply_auth(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.auth {
            AuthConfig::None => req,
            AuthConfig::Bearer { token } => req.bearer_auth(token),
            AuthConfig::ApiKey { header, key } => req.header(header, key),
            AuthConfig::Basic { username, password } => {
                req = req.basic_auth(username, Some(password));
                req
            }
        }
    }

    async fn call_once(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolCallError> {
        self.egress.assert_allowed(&self.cfg.url).await.map_err(|e| ToolCallError::Policy {
            message: "blocked by egress policy".to_string(),
            details: serde_json::json!({"endpoint": self.cfg.url, "error": e.to_string()}),
        })?;

        let method = self.cfg.method.parse::<reqwest::Method>().unwrap_or(reqwest::Method::POST);
        let mut req = self
            .client
            .request(method, &self.cfg.url)
            .timeout(Duration::from_millis(self.cfg.timeout_ms))
            .json(input);
        for (k, v) in &self.cfg.headers {
            req = req.header(k, v);
        }
        req = self.apply_auth(req);

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolCallError::Transient(format!("timeout: {e}"))
            } else if e.is_connect() {
                ToolCallError::Transient(format!("connect error: {e}"))
            } else {
                ToolCallError::Fatal {
                    message: e.to_string(),
                    status_code: None,
                }
            }
        })?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            return Err(ToolCallError::Fatal {
                message: format!("http {status}: {body}"),
                status_code: Some(status.as_u16()),
            });
        }
        Ok(body)
    }
}

#[derive(Debug)]
enum ToolCallError {
    Policy { message: String, details: serde_json::Value },
    Transient(String),
    Fatal { message: String, status_code: Option<u16> },
}

impl ToolCallError {
    fn into_tool_result(self) -> ToolResult {
        match self {
            ToolCallError::Policy { message, details } => ToolResult::external_failure(message, None, details),
            ToolCallError::Transient(m) => ToolResult::failure(m),
            ToolCallError::Fatal { message, status_code } => ToolResult::external_failure(message, status_code, serde_json::Value::Object(Default::default())),
        }
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    fn description(&self) -> &str {
        &self.cfg.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.cfg.input_schema.clone()
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        if let Err(e) = self.validate_input(&input) {
            return ToolResult::failure(e);
        }
        if let Err(e) = self.limits.ensure_tool_args(&input) {
            return ToolResult::failure(e.to_string());
        }

        let mut last_err: Option<ToolCallError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..=backoff / 2);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
            match self.call_once(&input).await {
                Ok(body) => {
                    if let Err(e) = self.validate_output(&body) {
                        warn!(tool = %self.cfg.name, error = %e, "tool output failed schema validation");
                        return ToolResult::failure(e);
                    }
                    return ToolResult::success(self.limits.truncate_tool_result(body));
                }
                Err(e @ ToolCallError::Policy { .. }) => return e.into_tool_result(),
                Err(e @ ToolCallError::Fatal { .. }) => return e.into_tool_result(),
                Err(e @ ToolCallError::Transient(_)) => {
                    debug!(tool = %self.cfg.name, attempt, "retrying tool call after transient failure");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => e.into_tool_result(),
            None => ToolResult::failure("exhausted retries"),
        }
    }
}

/// Orchestrates tool lookup + execution for the dispatch pipeline (C10),
/// wrapping every call with audit logging and redaction.
pub struct ToolExecutor {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolExecutor {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    /// Runs a named tool call, recording redacted audit fields. The audit
    /// row itself is persisted by the caller (which owns the DB connection
    /// and ambient company/correlation context); this returns what to log.
    pub async fn call(&self, name: &str, input: serde_json::Value) -> (ToolResult, Duration) {
        let started = std::time::Instant::now();
        let result = match self.find(name) {
            Some(tool) => tool.execute(input).await,
            None => ToolResult::failure(format!("unknown tool '{name}'")),
        };
        (result, started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tool(url: &str, schema: serde_json::Value) -> HttpTool {
        HttpTool::new(
            HttpToolConfig {
                name: "check_availability".into(),
                description: "checks slots".into(),
                url: url.into(),
                method: "POST".into(),
                auth: AuthConfig::None,
                headers: HashMap::new(),
                input_schema: schema,
                output_schema: None,
                timeout_ms: 2000,
            },
            Arc::new(EgressPolicy::from_config(&Default::default())),
            Arc::new(PayloadLimits::from_config(&Default::default())),
        )
    }

    #[tokio::test]
    async fn rejects_input_that_fails_schema() {
        let t = tool(
            "https://api.example.com/slots",
            serde_json::json!({"type": "object", "required": ["date"]}),
        );
        let result = t.execute(serde_json::json!({})).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("schema"));
    }

    #[tokio::test]
    async fn blocks_private_ip_before_sending_request() {
        let t = tool("http://127.0.0.1/secret", serde_json::json!({"type": "object"}));
        let result = t.execute(serde_json::json!({})).await;
        assert!(!result.ok);
        assert_eq!(result.details["endpoint"], "http://127.0.0.1/secret");
        assert!(result.details["error"].as_str().unwrap().contains("private"));
    }

    #[tokio::test]
    async fn executor_reports_unknown_tool() {
        let exec = ToolExecutor::new(vec![]);
        let (result, _) = exec.call("nope", serde_json::json!({})).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("unknown tool"));
    }
}
