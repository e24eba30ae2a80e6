use crate::mcp::McpServerConfig;
use crate::registry::HttpToolConfig;
use centurion_core::error::Result;
use rusqlite::Connection;

/// Tool-registry and audit schema: per-tenant HTTP tool/MCP server
/// configs and the audit trail every tool call writes to.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tool_configs (
            id          TEXT NOT NULL PRIMARY KEY,
            company_id  TEXT NOT NULL,
            centurion_id TEXT NOT NULL,
            config      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_configs_centurion ON tool_configs(centurion_id);

        CREATE TABLE IF NOT EXISTS mcp_servers (
            id          TEXT NOT NULL PRIMARY KEY,
            company_id  TEXT NOT NULL,
            centurion_id TEXT NOT NULL,
            name        TEXT NOT NULL,
            sse_url     TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'unknown',
            last_error  TEXT,
            last_sync   TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_mcp_servers_centurion ON mcp_servers(centurion_id);

        CREATE TABLE IF NOT EXISTS audit_logs (
            id             TEXT NOT NULL PRIMARY KEY,
            company_id     TEXT NOT NULL,
            correlation_id TEXT,
            tool_name      TEXT NOT NULL,
            args_redacted  TEXT NOT NULL,
            result_redacted TEXT NOT NULL,
            ok             INTEGER NOT NULL,
            duration_ms    INTEGER NOT NULL,
            created_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_company ON audit_logs(company_id, created_at);
        ",
    )?;
    Ok(())
}

/// Writes one audit entry: a persisted `audit_logs` row keyed by the
/// ambient company/request/correlation context. Args and result are
/// redacted before they ever reach this call.
#[allow(clippy::too_many_arguments)]
pub fn record_audit_log(
    conn: &Connection,
    company_id: &str,
    correlation_id: Option<&str>,
    tool_name: &str,
    args_redacted: &serde_json::Value,
    result_redacted: &serde_json::Value,
    ok: bool,
    duration_ms: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_logs (id, company_id, correlation_id, tool_name, args_redacted, \
         result_redacted, ok, duration_ms, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            uuid::Uuid::now_v7().to_string(),
            company_id,
            correlation_id,
            tool_name,
            args_redacted.to_string(),
            result_redacted.to_string(),
            ok as i64,
            duration_ms as i64,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Loads every custom HTTP tool configured for a centurion. Rows with a
/// `config` blob that no longer parses are skipped
/// rather than failing the whole lookup — a malformed tool shouldn't take
/// the rest of the tool set down with it.
pub fn load_tool_configs(conn: &Connection, centurion_id: &str) -> Result<Vec<HttpToolConfig>> {
    let mut stmt = conn.prepare("SELECT config FROM tool_configs WHERE centurion_id = ?1")?;
    let rows = stmt.query_map([centurion_id], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for raw in rows {
        let raw = raw?;
        match serde_json::from_str::<HttpToolConfig>(&raw) {
            Ok(cfg) => out.push(cfg),
            Err(e) => tracing::warn!(centurion_id, error = %e, "skipping malformed tool_configs row"),
        }
    }
    Ok(out)
}

/// Loads every MCP server registered for a centurion.
pub fn load_mcp_servers(conn: &Connection, centurion_id: &str) -> Result<Vec<McpServerConfig>> {
    let mut stmt = conn.prepare("SELECT name, sse_url FROM mcp_servers WHERE centurion_id = ?1")?;
    let rows = stmt.query_map([centurion_id], |row| {
        Ok(McpServerConfig {
            name: row.get(0)?,
            sse_url: row.get(1)?,
            timeout_ms: 15_000,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_audit_log_persists_redacted_fields() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let args = crate::redact::redact(&serde_json::json!({"api_key": "sk-secret", "q": "oi"}));
        record_audit_log(&conn, "acme", Some("corr-1"), "check_availability", &args, &serde_json::json!({"ok": true}), true, 42).unwrap();

        let stored: String = conn
            .query_row("SELECT args_redacted FROM audit_logs WHERE tool_name = 'check_availability'", [], |r| r.get(0))
            .unwrap();
        assert!(stored.contains("__redacted__"));
        assert!(!stored.contains("sk-secret"));
    }
}
