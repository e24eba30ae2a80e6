use centurion_core::error::{CenturionError, Result};
use centurion_core::types::{is_safe_sql_ident, LifecycleStage};
use centurion_store::repository::{LeadRepository, SharedConn};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DealsIndexRow {
    pub id: String,
    pub company_id: String,
    pub lead_id: String,
    pub schema_name: String,
    pub local_deal_id: String,
}

/// Writes a qualified lead into its tenant's CRM schema (C15). Tenant
/// schemas are modeled as separate SQLite files ATTACHed by a validated
/// identifier, the closest equivalent this stack has to a Postgres
/// per-tenant schema without a real multi-schema database.
pub struct HandoffService {
    conn: SharedConn,
    leads: LeadRepository,
    tenant_db_dir: String,
}

impl HandoffService {
    /// `tenant_db_dir` is a filesystem directory tenant schema files live
    /// under (`{dir}/{schema_name}.db`); pass `":memory:"` in tests to keep
    /// everything in-process.
    pub fn new(conn: SharedConn, tenant_db_dir: impl Into<String>) -> Self {
        Self {
            leads: LeadRepository::new(conn.clone()),
            conn,
            tenant_db_dir: tenant_db_dir.into(),
        }
    }

    fn resolve_schema_name(&self, company_id: &str) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let schema_name: Option<String> = conn
            .query_row(
                "SELECT schema_name FROM company_crms WHERE company_id = ?1",
                params![company_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(CenturionError::from)?;
        let schema_name = schema_name
            .ok_or_else(|| CenturionError::Config(format!("no CRM schema bound for company '{company_id}'")))?;
        if !is_safe_sql_ident(&schema_name) {
            return Err(CenturionError::Internal(format!(
                "tenant schema name '{schema_name}' is not a safe identifier"
            )));
        }
        Ok(schema_name)
    }

    fn existing_index(&self, lead_id: &str) -> Result<Option<DealsIndexRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, company_id, lead_id, schema_name, local_deal_id FROM deals_index WHERE lead_id = ?1",
            params![lead_id],
            |r| {
                Ok(DealsIndexRow {
                    id: r.get(0)?,
                    company_id: r.get(1)?,
                    lead_id: r.get(2)?,
                    schema_name: r.get(3)?,
                    local_deal_id: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(CenturionError::from)
    }

    /// `Handoff`. Idempotent: if the lead's lifecycle is already
    /// `handoff_done`, returns the existing index row without re-writing.
    #[instrument(skip(self, qualification_data))]
    pub fn handoff(&self, company_id: &str, lead_id: &str, qualification_data: &Value) -> Result<DealsIndexRow> {
        let lead = self
            .leads
            .get(lead_id)?
            .ok_or_else(|| CenturionError::InvalidInput(format!("unknown lead '{lead_id}'")))?;

        if lead.lifecycle_stage == LifecycleStage::HandoffDone {
            if let Some(existing) = self.existing_index(lead_id)? {
                return Ok(existing);
            }
        }

        let schema_name = self.resolve_schema_name(company_id)?;
        let db_path = if self.tenant_db_dir == ":memory:" {
            ":memory:".to_string()
        } else {
            format!("{}/{}.db", self.tenant_db_dir, schema_name)
        };

        let local_deal_id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(qualification_data)?;

        {
            let conn = self.conn.lock().unwrap();
            conn.execute(&format!("ATTACH DATABASE '{db_path}' AS {schema_name}"), [])
                .map_err(CenturionError::from)?;
            let attached = conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {schema_name}.deals (
                    id         TEXT NOT NULL PRIMARY KEY,
                    lead_id    TEXT NOT NULL,
                    company_id TEXT NOT NULL,
                    payload    TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );"
            ));
            if let Err(e) = attached {
                let _ = conn.execute(&format!("DETACH DATABASE {schema_name}"), []);
                return Err(CenturionError::from(e));
            }
            let inserted = conn.execute(
                &format!(
                    "INSERT INTO {schema_name}.deals (id, lead_id, company_id, payload, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                params![local_deal_id, lead_id, company_id, payload, now],
            );
            if let Err(e) = inserted {
                let _ = conn.execute(&format!("DETACH DATABASE {schema_name}"), []);
                return Err(CenturionError::from(e));
            }
            conn.execute(&format!("DETACH DATABASE {schema_name}"), [])
                .map_err(CenturionError::from)?;
        }

        let index_id = Uuid::now_v7().to_string();
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO deals_index (id, company_id, lead_id, schema_name, local_deal_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![index_id, company_id, lead_id, schema_name, local_deal_id, now],
            )
            .map_err(CenturionError::from)?;
        }

        self.leads.set_lifecycle(lead_id, LifecycleStage::HandoffDone)?;
        self.leads.merge_qualification_data(
            lead_id,
            &serde_json::json!({
                "deal_index_id": index_id,
                "local_deal_id": local_deal_id,
                "schema_name": schema_name,
            }),
        )?;

        info!(lead_id, schema_name = %schema_name, "lead handed off to CRM");

        Ok(DealsIndexRow {
            id: index_id,
            company_id: company_id.to_string(),
            lead_id: lead_id.to_string(),
            schema_name,
            local_deal_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn fresh() -> SharedConn {
        let conn = Connection::open_in_memory().unwrap();
        centurion_store::db::init_db(&conn).unwrap();
        crate::db::init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn bind_crm(conn: &SharedConn, company_id: &str, schema_name: &str) {
        let c = conn.lock().unwrap();
        c.execute(
            "INSERT INTO company_crms (company_id, schema_name, created_at) VALUES (?1, ?2, ?3)",
            params![company_id, schema_name, Utc::now().to_rfc3339()],
        )
        .unwrap();
    }

    #[test]
    fn handoff_writes_deal_and_sets_terminal_lifecycle() {
        let conn = fresh();
        bind_crm(&conn, "acme", "acme_crm");
        let leads = LeadRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+1555", None).unwrap();

        let service = HandoffService::new(conn.clone(), ":memory:");
        let row = service.handoff("acme", &lead.id, &serde_json::json!({"score": 0.9})).unwrap();
        assert_eq!(row.schema_name, "acme_crm");

        let reloaded = leads.get(&lead.id).unwrap().unwrap();
        assert_eq!(reloaded.lifecycle_stage, LifecycleStage::HandoffDone);
        assert_eq!(reloaded.qualification_data.get("schema_name").unwrap(), "acme_crm");
    }

    #[test]
    fn handoff_is_idempotent_once_terminal() {
        let conn = fresh();
        bind_crm(&conn, "acme", "acme_crm");
        let leads = LeadRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+1556", None).unwrap();

        let service = HandoffService::new(conn.clone(), ":memory:");
        let first = service.handoff("acme", &lead.id, &serde_json::json!({})).unwrap();
        let second = service.handoff("acme", &lead.id, &serde_json::json!({})).unwrap();
        assert_eq!(first.local_deal_id, second.local_deal_id);
    }

    #[test]
    fn rejects_unbound_company() {
        let conn = fresh();
        let leads = LeadRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("nocrm", "+1557", None).unwrap();
        let service = HandoffService::new(conn.clone(), ":memory:");
        let err = service.handoff("nocrm", &lead.id, &serde_json::json!({})).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
