use centurion_core::error::{CenturionError, Result};
use centurion_store::repository::SharedConn;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FollowupRule {
    pub id: String,
    pub company_id: String,
    pub centurion_id: String,
    pub inactivity_hours: i64,
    pub template: String,
    pub max_attempts: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowupStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Canceled,
}

impl FollowupStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FollowupStatus::Pending => "pending",
            FollowupStatus::Processing => "processing",
            FollowupStatus::Sent => "sent",
            FollowupStatus::Failed => "failed",
            FollowupStatus::Canceled => "canceled",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "processing" => FollowupStatus::Processing,
            "sent" => FollowupStatus::Sent,
            "failed" => FollowupStatus::Failed,
            "canceled" => FollowupStatus::Canceled,
            _ => FollowupStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FollowupQueueItem {
    pub id: String,
    pub company_id: String,
    pub lead_id: String,
    pub conversation_id: String,
    pub rule_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub attempt_number: i64,
    pub status: FollowupStatus,
    pub message_id: Option<String>,
    pub last_error: Option<String>,
}

fn row_to_rule(row: &Row) -> rusqlite::Result<FollowupRule> {
    Ok(FollowupRule {
        id: row.get(0)?,
        company_id: row.get(1)?,
        centurion_id: row.get(2)?,
        inactivity_hours: row.get(3)?,
        template: row.get(4)?,
        max_attempts: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_item(row: &Row) -> rusqlite::Result<(String, String, String, String, String, String, i64, String, Option<String>, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn map_item(
    tuple: (String, String, String, String, String, String, i64, String, Option<String>, Option<String>),
) -> Result<FollowupQueueItem> {
    let (id, company_id, lead_id, conversation_id, rule_id, scheduled_at, attempt_number, status, message_id, last_error) = tuple;
    Ok(FollowupQueueItem {
        id,
        company_id,
        lead_id,
        conversation_id,
        rule_id,
        scheduled_at: scheduled_at
            .parse()
            .map_err(|e| CenturionError::Internal(format!("corrupt scheduled_at: {e}")))?,
        attempt_number,
        status: FollowupStatus::from_str(&status),
        message_id,
        last_error,
    })
}

const ITEM_SELECT: &str = "SELECT id, company_id, lead_id, conversation_id, rule_id, scheduled_at, \
     attempt_number, status, message_id, last_error FROM followup_queue";

/// Rule and queue access for C14. Scheduling and claiming are both
/// expressed as short transactions against the shared connection mutex, the
/// same substitute for `SELECT ... FOR UPDATE SKIP LOCKED` used throughout
/// this runtime.
#[derive(Clone)]
pub struct FollowupRepository {
    conn: SharedConn,
}

impl FollowupRepository {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    pub fn active_rules_for_centurion(&self, centurion_id: &str) -> Result<Vec<FollowupRule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, company_id, centurion_id, inactivity_hours, template, max_attempts, is_active \
             FROM followup_rules WHERE centurion_id = ?1 AND is_active = 1 ORDER BY inactivity_hours ASC",
        )?;
        let rows = stmt.query_map(params![centurion_id], row_to_rule)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CenturionError::from)
    }

    pub fn get_rule(&self, rule_id: &str) -> Result<Option<FollowupRule>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, company_id, centurion_id, inactivity_hours, template, max_attempts, is_active \
             FROM followup_rules WHERE id = ?1",
            params![rule_id],
            row_to_rule,
        )
        .optional()
        .map_err(CenturionError::from)
    }

    fn sent_count(&self, lead_id: &str, rule_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM followup_queue WHERE lead_id = ?1 AND rule_id = ?2 AND status = 'sent'",
            params![lead_id, rule_id],
            |r| r.get(0),
        )
        .map_err(CenturionError::from)
    }

    fn has_future_pending(&self, lead_id: &str, rule_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM followup_queue WHERE lead_id = ?1 AND rule_id = ?2 \
             AND status IN ('pending', 'processing')",
            params![lead_id, rule_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// `ScheduleForLead`: for each active rule in ascending
    /// `inactivity_hours`, schedules the next attempt at
    /// `last_contact_at + inactivity_hours` unless the lead already exhausted
    /// `max_attempts` on that rule or already has a pending/processing row.
    pub fn schedule_for_lead(
        &self,
        company_id: &str,
        lead_id: &str,
        conversation_id: &str,
        centurion_id: &str,
        last_contact_at: DateTime<Utc>,
    ) -> Result<usize> {
        let rules = self.active_rules_for_centurion(centurion_id)?;
        let mut scheduled = 0;
        for rule in rules {
            if self.has_future_pending(lead_id, &rule.id)? {
                continue;
            }
            let sent = self.sent_count(lead_id, &rule.id)?;
            if sent >= rule.max_attempts {
                continue;
            }
            let scheduled_at = last_contact_at + ChronoDuration::hours(rule.inactivity_hours);
            self.insert_item(company_id, lead_id, conversation_id, &rule.id, scheduled_at, sent + 1)?;
            scheduled += 1;
        }
        Ok(scheduled)
    }

    fn insert_item(
        &self,
        company_id: &str,
        lead_id: &str,
        conversation_id: &str,
        rule_id: &str,
        scheduled_at: DateTime<Utc>,
        attempt_number: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO followup_queue (id, company_id, lead_id, conversation_id, rule_id, \
             scheduled_at, attempt_number, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?8)",
            params![
                Uuid::now_v7().to_string(),
                company_id,
                lead_id,
                conversation_id,
                rule_id,
                scheduled_at.to_rfc3339(),
                attempt_number,
                now,
            ],
        )?;
        Ok(())
    }

    /// Claims up to `limit` due pending rows, flipping them to `processing`
    /// under the connection mutex.
    pub fn claim_due(&self, limit: usize) -> Result<Vec<FollowupQueueItem>> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction().map_err(CenturionError::from)?;

        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM followup_queue WHERE status = 'pending' AND scheduled_at <= ?1 \
                 ORDER BY scheduled_at ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![now, limit as i64], |r| r.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            tx.execute(
                "UPDATE followup_queue SET status = 'processing', updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )?;
            let tuple = tx.query_row(&format!("{ITEM_SELECT} WHERE id = ?1"), params![id], row_to_item)?;
            items.push(map_item(tuple)?);
        }
        tx.commit().map_err(CenturionError::from)?;
        Ok(items)
    }

    pub fn mark_sent(&self, id: &str, message_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE followup_queue SET status = 'sent', message_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![message_id, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE followup_queue SET status = 'failed', last_error = ?1, updated_at = ?2 WHERE id = ?3",
            params![error, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn schedule_next_attempt(
        &self,
        company_id: &str,
        lead_id: &str,
        conversation_id: &str,
        rule_id: &str,
        attempt_number: i64,
        inactivity_hours: i64,
    ) -> Result<()> {
        let scheduled_at = Utc::now() + ChronoDuration::hours(inactivity_hours);
        self.insert_item(company_id, lead_id, conversation_id, rule_id, scheduled_at, attempt_number)
    }

    /// Cancels every pending/processing row for `lead_id`, invoked on any
    /// fresh inbound activity.
    pub fn cancel_pending(&self, lead_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE followup_queue SET status = 'canceled', updated_at = ?1 \
             WHERE lead_id = ?2 AND status IN ('pending', 'processing')",
            params![Utc::now().to_rfc3339(), lead_id],
        )?;
        Ok(n)
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

    fn insert_rule(conn: &SharedConn, id: &str, centurion_id: &str, hours: i64, max_attempts: i64) {
        let c = conn.lock().unwrap();
        c.execute(
            "INSERT INTO followup_rules (id, company_id, centurion_id, inactivity_hours, template, \
             max_attempts, is_active, created_at, updated_at) VALUES (?1, 'acme', ?2, ?3, 'oi {{name}}', ?4, 1, 'n', 'n')",
            params![id, centurion_id, hours, max_attempts],
        )
        .unwrap();
    }

    #[test]
    fn schedule_for_lead_respects_max_attempts_and_no_duplicate_future_rows() {
        let conn = fresh();
        insert_rule(&conn, "rule-1", "cent-1", 24, 2);
        let repo = FollowupRepository::new(conn);

        let n = repo.schedule_for_lead("acme", "lead-1", "conv-1", "cent-1", Utc::now()).unwrap();
        assert_eq!(n, 1);

        // Calling again while the first row is still pending schedules nothing new.
        let n2 = repo.schedule_for_lead("acme", "lead-1", "conv-1", "cent-1", Utc::now()).unwrap();
        assert_eq!(n2, 0);
    }

    #[test]
    fn claim_due_flips_status_and_cancel_pending_removes_rows_from_claim() {
        let conn = fresh();
        insert_rule(&conn, "rule-1", "cent-1", 0, 2);
        let repo = FollowupRepository::new(conn);
        repo.schedule_for_lead("acme", "lead-2", "conv-2", "cent-1", Utc::now() - ChronoDuration::hours(1)).unwrap();

        let due = repo.claim_due(10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, FollowupStatus::Processing);

        repo.mark_sent(&due[0].id, "msg-1").unwrap();
        let next = repo
            .schedule_next_attempt("acme", "lead-2", "conv-2", "rule-1", 2, 0)
            .map(|_| repo.claim_due(10).unwrap());
        assert_eq!(next.unwrap().len(), 1);
    }

    #[test]
    fn cancel_pending_stops_future_claims() {
        let conn = fresh();
        insert_rule(&conn, "rule-1", "cent-1", 0, 1);
        let repo = FollowupRepository::new(conn);
        repo.schedule_for_lead("acme", "lead-3", "conv-3", "cent-1", Utc::now() - ChronoDuration::hours(1)).unwrap();
        let canceled = repo.cancel_pending("lead-3").unwrap();
        assert_eq!(canceled, 1);
        assert!(repo.claim_due(10).unwrap().is_empty());
    }
}
