use crate::models::{CenturionConfigRow, Conversation, Lead, Message};
use centurion_core::error::{CenturionError, Result};
use centurion_core::types::{ChannelType, ContentType, DebounceState, Direction, LifecycleStage};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub type SharedConn = Arc<Mutex<Connection>>;

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    s.parse()
        .map_err(|e| CenturionError::Internal(format!("corrupt timestamp '{s}': {e}")))
}

fn opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_dt(&s)).transpose()
}

// ---------------------------------------------------------------- Leads ---

#[derive(Clone)]
pub struct LeadRepository {
    conn: SharedConn,
}

impl LeadRepository {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    fn row_to_lead(row: &Row) -> rusqlite::Result<(String, String, String, Option<String>, String, bool, Option<f64>, String, Option<String>, Option<String>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get::<_, i64>(5)? != 0,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        ))
    }

    fn map_row(tuple: (String, String, String, Option<String>, String, bool, Option<f64>, String, Option<String>, Option<String>)) -> Result<Lead> {
        let (id, company_id, phone, name, stage, is_qualified, score, qdata, centurion_id, last_contact) = tuple;
        Ok(Lead {
            id,
            company_id,
            phone,
            name,
            lifecycle_stage: LifecycleStage::from_str(&stage)
                .map_err(CenturionError::Internal)?,
            is_qualified,
            qualification_score: score,
            qualification_data: serde_json::from_str(&qdata).unwrap_or(Value::Object(Default::default())),
            centurion_id,
            last_contact_at: opt_dt(last_contact)?,
        })
    }

    const SELECT: &'static str = "SELECT id, company_id, phone, name, lifecycle_stage, is_qualified, \
         qualification_score, qualification_data, centurion_id, last_contact_at FROM leads";

    pub fn get(&self, lead_id: &str) -> Result<Option<Lead>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::SELECT),
                params![lead_id],
                Self::row_to_lead,
            )
            .optional()
            .map_err(CenturionError::from)?;
        row.map(Self::map_row).transpose()
    }

    /// Returns the lead and whether it was newly created.
    pub fn get_or_create(&self, company_id: &str, phone: &str, name: Option<&str>) -> Result<(Lead, bool)> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                &format!("{} WHERE company_id = ?1 AND phone = ?2", Self::SELECT),
                params![company_id, phone],
                Self::row_to_lead,
            )
            .optional()
            .map_err(CenturionError::from)?;

        if let Some(row) = existing {
            return Ok((Self::map_row(row)?, false));
        }

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO leads (id, company_id, phone, name, lifecycle_stage, is_qualified, \
             qualification_data, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'new', 0, '{}', ?5, ?5)",
            params![id, company_id, phone, name, now],
        )
        .map_err(CenturionError::from)?;

        let row = conn
            .query_row(&format!("{} WHERE id = ?1", Self::SELECT), params![id], Self::row_to_lead)
            .map_err(CenturionError::from)?;
        Ok((Self::map_row(row)?, true))
    }

    /// Sets the lifecycle stage unless the lead is already in a terminal
    /// state: terminal states never regress.
    pub fn set_lifecycle(&self, lead_id: &str, stage: LifecycleStage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: String = conn
            .query_row("SELECT lifecycle_stage FROM leads WHERE id = ?1", params![lead_id], |r| r.get(0))
            .map_err(CenturionError::from)?;
        let current_stage = LifecycleStage::from_str(&current).map_err(CenturionError::Internal)?;
        if current_stage.is_terminal() {
            return Ok(());
        }
        conn.execute(
            "UPDATE leads SET lifecycle_stage = ?1, updated_at = ?2 WHERE id = ?3",
            params![stage.to_string(), Utc::now().to_rfc3339(), lead_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    pub fn touch_last_contact(&self, lead_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE leads SET last_contact_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, lead_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    /// Persists qualification and flips `is_qualified`. Idempotent: a
    /// second call after the lead is already qualified is a no-op for the
    /// boolean flag (the caller gates the `lead.qualified` publish itself).
    pub fn set_qualified(&self, lead_id: &str, score: f64, qualification_data: &Value) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE leads SET is_qualified = 1, qualification_score = ?1, \
             qualification_data = ?2, lifecycle_stage = 'qualified', updated_at = ?3 WHERE id = ?4",
            params![score, qualification_data.to_string(), Utc::now().to_rfc3339(), lead_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    /// Merges keys into `qualification_data` (used by handoff).
    pub fn merge_qualification_data(&self, lead_id: &str, patch: &Value) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: String = conn
            .query_row("SELECT qualification_data FROM leads WHERE id = ?1", params![lead_id], |r| r.get(0))
            .map_err(CenturionError::from)?;
        let mut data: Value = serde_json::from_str(&current).unwrap_or(Value::Object(Default::default()));
        if let (Some(obj), Some(patch_obj)) = (data.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        conn.execute(
            "UPDATE leads SET qualification_data = ?1, updated_at = ?2 WHERE id = ?3",
            params![data.to_string(), Utc::now().to_rfc3339(), lead_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }
}

// --------------------------------------------------------- Conversations --

#[derive(Clone)]
pub struct ConversationRepository {
    conn: SharedConn,
}

impl ConversationRepository {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    const SELECT: &'static str = "SELECT id, company_id, lead_id, centurion_id, channel_type, \
        channel_instance_id, debounce_state, debounce_until, pending_messages, last_inbound_at, \
        last_outbound_at, lead_state, metadata FROM conversations";

    fn map_row(row: &Row) -> rusqlite::Result<Conversation> {
        let channel_type: String = row.get(4)?;
        let debounce_state: String = row.get(6)?;
        let debounce_until: Option<String> = row.get(7)?;
        let pending: String = row.get(8)?;
        let last_inbound: Option<String> = row.get(9)?;
        let last_outbound: Option<String> = row.get(10)?;
        let metadata: String = row.get(12)?;

        Ok(Conversation {
            id: row.get(0)?,
            company_id: row.get(1)?,
            lead_id: row.get(2)?,
            centurion_id: row.get(3)?,
            channel_type: ChannelType::from_str(&channel_type).unwrap_or(ChannelType::Whatsapp),
            channel_instance_id: row.get(5)?,
            debounce_state: DebounceState::from_str(&debounce_state).unwrap_or(DebounceState::Idle),
            debounce_until: debounce_until.and_then(|s| s.parse().ok()),
            pending_messages: serde_json::from_str(&pending).unwrap_or_default(),
            last_inbound_at: last_inbound.and_then(|s| s.parse().ok()),
            last_outbound_at: last_outbound.and_then(|s| s.parse().ok()),
            lead_state: row.get(11)?,
            metadata: serde_json::from_str(&metadata).unwrap_or(Value::Object(Default::default())),
        })
    }

    pub fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{} WHERE id = ?1", Self::SELECT), params![conversation_id], Self::map_row)
            .optional()
            .map_err(CenturionError::from)
    }

    pub fn get_or_create(
        &self,
        company_id: &str,
        lead_id: &str,
        centurion_id: &str,
        channel_type: ChannelType,
        channel_instance_id: Option<&str>,
    ) -> Result<Conversation> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                &format!(
                    "{} WHERE company_id = ?1 AND lead_id = ?2 AND centurion_id = ?3 AND channel_type = ?4 \
                     ORDER BY created_at DESC LIMIT 1",
                    Self::SELECT
                ),
                params![company_id, lead_id, centurion_id, channel_type.to_string()],
                Self::map_row,
            )
            .optional()
            .map_err(CenturionError::from)?;

        if let Some(c) = existing {
            return Ok(c);
        }

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO conversations (id, company_id, lead_id, centurion_id, channel_type, \
             channel_instance_id, debounce_state, pending_messages, lead_state, metadata, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'idle', '[]', 'active', '{}', ?7, ?7)",
            params![id, company_id, lead_id, centurion_id, channel_type.to_string(), channel_instance_id, now],
        )
        .map_err(CenturionError::from)?;

        conn.query_row(&format!("{} WHERE id = ?1", Self::SELECT), params![id], Self::map_row)
            .map_err(CenturionError::from)
    }

    /// Atomically appends `text` to pending, arms the debounce timer, and
    /// patches metadata — all in one transaction. Returns the new
    /// pending count.
    pub fn append_pending_message(
        &self,
        conversation_id: &str,
        text: &str,
        debounce_until: DateTime<Utc>,
        last_inbound_at: DateTime<Utc>,
        metadata_patch: &Value,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction().map_err(CenturionError::from)?;

        let (pending_json, metadata_json): (String, String) = tx
            .query_row(
                "SELECT pending_messages, metadata FROM conversations WHERE id = ?1",
                params![conversation_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(CenturionError::from)?;

        let mut pending: Vec<String> = serde_json::from_str(&pending_json).unwrap_or_default();
        pending.push(text.to_string());
        let new_count = pending.len();

        let mut metadata: Value = serde_json::from_str(&metadata_json).unwrap_or(Value::Object(Default::default()));
        if let (Some(obj), Some(patch_obj)) = (metadata.as_object_mut(), metadata_patch.as_object()) {
            for (k, v) in patch_obj {
                obj.insert(k.clone(), v.clone());
            }
        }

        tx.execute(
            "UPDATE conversations SET pending_messages = ?1, debounce_state = 'waiting', \
             debounce_until = ?2, last_inbound_at = ?3, metadata = ?4, updated_at = ?5 WHERE id = ?6",
            params![
                serde_json::to_string(&pending)?,
                debounce_until.to_rfc3339(),
                last_inbound_at.to_rfc3339(),
                metadata.to_string(),
                Utc::now().to_rfc3339(),
                conversation_id,
            ],
        )
        .map_err(CenturionError::from)?;

        tx.commit().map_err(CenturionError::from)?;
        Ok(new_count)
    }

    pub fn mark_processing(&self, conversation_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET debounce_state = 'processing', updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), conversation_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    pub fn clear_pending(&self, conversation_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET pending_messages = '[]', debounce_state = 'idle', \
             debounce_until = NULL, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), conversation_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    pub fn touch_last_outbound(&self, conversation_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET last_outbound_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), conversation_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    pub fn set_lead_state(&self, conversation_id: &str, lead_state: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET lead_state = ?1, updated_at = ?2 WHERE id = ?3",
            params![lead_state, Utc::now().to_rfc3339(), conversation_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    pub fn patch_metadata(&self, conversation_id: &str, patch: &Value) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: String = conn
            .query_row("SELECT metadata FROM conversations WHERE id = ?1", params![conversation_id], |r| r.get(0))
            .map_err(CenturionError::from)?;
        let mut metadata: Value = serde_json::from_str(&current).unwrap_or(Value::Object(Default::default()));
        if let (Some(obj), Some(patch_obj)) = (metadata.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        conn.execute(
            "UPDATE conversations SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
            params![metadata.to_string(), Utc::now().to_rfc3339(), conversation_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    /// Conversations whose debounce timer has fired (C8), oldest first.
    pub fn find_due(&self, limit: usize) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let mut stmt = conn
            .prepare_cached(&format!(
                "{} WHERE debounce_state = 'waiting' AND debounce_until <= ?1 \
                 ORDER BY debounce_until ASC LIMIT ?2",
                Self::SELECT
            ))
            .map_err(CenturionError::from)?;
        let rows = stmt
            .query_map(params![now, limit as i64], Self::map_row)
            .map_err(CenturionError::from)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CenturionError::from)
    }

    /// Conversations stuck in `processing` past the threshold (C9).
    pub fn find_stuck(&self, stuck_after_secs: i64, limit: usize) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - Duration::seconds(stuck_after_secs)).to_rfc3339();
        let mut stmt = conn
            .prepare_cached(&format!(
                "{} WHERE debounce_state = 'processing' AND updated_at < ?1 LIMIT ?2",
                Self::SELECT
            ))
            .map_err(CenturionError::from)?;
        let rows = stmt
            .query_map(params![cutoff, limit as i64], Self::map_row)
            .map_err(CenturionError::from)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CenturionError::from)
    }

    /// Recovery action for a stuck conversation: re-arm to `waiting`
    /// if pending is non-empty, otherwise clear to `idle`.
    pub fn recover_stuck(&self, conversation_id: &str, pending_non_empty: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        if pending_non_empty {
            conn.execute(
                "UPDATE conversations SET debounce_state = 'waiting', debounce_until = ?1, updated_at = ?1 \
                 WHERE id = ?2",
                params![now, conversation_id],
            )
        } else {
            conn.execute(
                "UPDATE conversations SET debounce_state = 'idle', debounce_until = NULL, \
                 pending_messages = '[]', updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )
        }
        .map_err(CenturionError::from)?;
        Ok(())
    }
}

// -------------------------------------------------------------- Messages --

#[derive(Clone)]
pub struct MessageRepository {
    conn: SharedConn,
}

impl MessageRepository {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    const SELECT: &'static str = "SELECT id, conversation_id, company_id, lead_id, direction, \
        content_type, content, audio_transcription, image_description, channel_message_id, \
        archived, metadata, created_at FROM messages";

    fn map_row(row: &Row) -> rusqlite::Result<Message> {
        let direction: String = row.get(4)?;
        let content_type: String = row.get(5)?;
        let metadata: String = row.get(11)?;
        let created_at: String = row.get(12)?;
        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            company_id: row.get(2)?,
            lead_id: row.get(3)?,
            direction: Direction::from_str(&direction).unwrap_or(Direction::Inbound),
            content_type: ContentType::from_str(&content_type).unwrap_or(ContentType::Text),
            content: row.get(6)?,
            audio_transcription: row.get(7)?,
            image_description: row.get(8)?,
            channel_message_id: row.get(9)?,
            archived: row.get::<_, i64>(10)? != 0,
            metadata: serde_json::from_str(&metadata).unwrap_or(Value::Object(Default::default())),
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Checks the secondary dedupe condition before the caller
    /// commits to appending — `channel_message_id` is unique per company.
    pub fn channel_message_exists(&self, company_id: &str, channel_message_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE company_id = ?1 AND channel_message_id = ?2",
                params![company_id, channel_message_id],
                |r| r.get(0),
            )
            .map_err(CenturionError::from)?;
        Ok(count > 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        conversation_id: &str,
        company_id: &str,
        lead_id: &str,
        direction: Direction,
        content_type: ContentType,
        content: Option<&str>,
        channel_message_id: Option<&str>,
        metadata: &Value,
    ) -> Result<Message> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (id, conversation_id, company_id, lead_id, direction, content_type, \
             content, channel_message_id, metadata, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id, conversation_id, company_id, lead_id, direction.to_string(), content_type.to_string(),
                content, channel_message_id, metadata.to_string(), now,
            ],
        )
        .map_err(CenturionError::from)?;

        conn.query_row(&format!("{} WHERE id = ?1", Self::SELECT), params![id], Self::map_row)
            .map_err(CenturionError::from)
    }

    /// Patches media-enrichment fields on an already-persisted inbound row.
    pub fn set_media_enrichment(&self, message_id: &str, transcription: Option<&str>, description: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET audio_transcription = ?1, image_description = ?2 WHERE id = ?3",
            params![transcription, description, message_id],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    /// Compensating delete: used when an outbound publish fails
    /// after the row was persisted.
    pub fn delete(&self, message_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])
            .map_err(CenturionError::from)?;
        Ok(())
    }

    pub fn list_recent(&self, conversation_id: &str, limit: usize, exclude_archived: bool) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let sql = if exclude_archived {
            format!(
                "{} WHERE conversation_id = ?1 AND archived = 0 ORDER BY created_at DESC LIMIT ?2",
                Self::SELECT
            )
        } else {
            format!("{} WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT ?2", Self::SELECT)
        };
        let mut stmt = conn.prepare(&sql).map_err(CenturionError::from)?;
        let rows = stmt
            .query_map(params![conversation_id, limit as i64], Self::map_row)
            .map_err(CenturionError::from)?;
        let mut out = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CenturionError::from)?;
        out.reverse(); // chronological order
        Ok(out)
    }

    /// Full conversation text (all non-archived messages), used by
    /// qualification.
    pub fn full_conversation_text(&self, conversation_id: &str) -> Result<String> {
        let msgs = self.list_recent(conversation_id, 100_000, true)?;
        Ok(msgs.iter().map(|m| m.effective_text()).collect::<Vec<_>>().join("\n"))
    }

    /// Marks messages older than `days` in conversations whose lead_state is
    /// not "active" as archived. Returns rows affected.
    pub fn archive_inactive_older_than(&self, days: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let n = conn
            .execute(
                "UPDATE messages SET archived = 1
                 WHERE archived = 0 AND created_at < ?1 AND conversation_id IN (
                    SELECT id FROM conversations WHERE lead_state != 'active'
                 )",
                params![cutoff],
            )
            .map_err(CenturionError::from)?;
        Ok(n)
    }
}

pub fn load_centurion_config(conn: &SharedConn, centurion_id: &str) -> Result<Option<CenturionConfigRow>> {
    let conn = conn.lock().unwrap();
    conn.query_row(
        "SELECT id, company_id, persona_prompt, debounce_wait_ms, chunk_max_chars, chunk_delay_ms, \
         chunking_enabled, media_enrichment_enabled, qualification_rules \
         FROM centurion_configs WHERE id = ?1",
        params![centurion_id],
        |row| {
            let rules: Option<String> = row.get(8)?;
            Ok(CenturionConfigRow {
                id: row.get(0)?,
                company_id: row.get(1)?,
                persona_prompt: row.get(2)?,
                debounce_wait_ms: row.get::<_, i64>(3)? as u64,
                chunk_max_chars: row.get::<_, i64>(4)? as usize,
                chunk_delay_ms: row.get::<_, i64>(5)? as u64,
                chunking_enabled: row.get::<_, i64>(6)? != 0,
                media_enrichment_enabled: row.get::<_, i64>(7)? != 0,
                qualification_rules: rules.and_then(|s| serde_json::from_str(&s).ok()),
            })
        },
    )
    .optional()
    .map_err(CenturionError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use centurion_core::types::ChannelType;

    fn fresh_conn() -> SharedConn {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn lead_get_or_create_is_idempotent_per_phone() {
        let conn = fresh_conn();
        let repo = LeadRepository::new(conn);
        let (lead1, created1) = repo.get_or_create("acme", "+15550001", Some("Ana")).unwrap();
        assert!(created1);
        let (lead2, created2) = repo.get_or_create("acme", "+15550001", None).unwrap();
        assert!(!created2);
        assert_eq!(lead1.id, lead2.id);
    }

    #[test]
    fn terminal_lifecycle_never_regresses() {
        let conn = fresh_conn();
        let repo = LeadRepository::new(conn);
        let (lead, _) = repo.get_or_create("acme", "+15550002", None).unwrap();
        repo.set_qualified(&lead.id, 0.9, &serde_json::json!({"budget": "ok"})).unwrap();
        repo.set_lifecycle(&lead.id, LifecycleStage::Contacted).unwrap();
        let reloaded = repo.get(&lead.id).unwrap().unwrap();
        assert_eq!(reloaded.lifecycle_stage, LifecycleStage::Qualified);
    }

    #[test]
    fn append_pending_message_arms_debounce_and_patches_metadata() {
        let conn = fresh_conn();
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn);
        let (lead, _) = leads.get_or_create("acme", "+15550003", None).unwrap();
        let conv = convs
            .get_or_create("acme", &lead.id, "centurion-1", ChannelType::Whatsapp, None)
            .unwrap();
        assert_eq!(conv.debounce_state, DebounceState::Idle);

        let now = Utc::now();
        let until = now + Duration::seconds(3);
        let count = convs
            .append_pending_message(&conv.id, "oi", until, now, &serde_json::json!({"last_wa_id": "w1"}))
            .unwrap();
        assert_eq!(count, 1);

        let reloaded = convs.get(&conv.id).unwrap().unwrap();
        assert_eq!(reloaded.debounce_state, DebounceState::Waiting);
        assert_eq!(reloaded.pending_messages, vec!["oi".to_string()]);
        assert_eq!(reloaded.metadata.get("last_wa_id").unwrap(), "w1");

        // due only once debounce_until has passed
        assert!(convs.find_due(10).unwrap().is_empty());
    }

    #[test]
    fn find_due_orders_oldest_first_and_clear_pending_resets() {
        let conn = fresh_conn();
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn);
        let (lead, _) = leads.get_or_create("acme", "+15550004", None).unwrap();
        let conv = convs
            .get_or_create("acme", &lead.id, "centurion-1", ChannelType::Whatsapp, None)
            .unwrap();

        let past = Utc::now() - Duration::seconds(5);
        convs
            .append_pending_message(&conv.id, "oi", past, past, &serde_json::json!({}))
            .unwrap();

        let due = convs.find_due(10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, conv.id);

        convs.mark_processing(&conv.id).unwrap();
        assert!(convs.find_due(10).unwrap().is_empty());

        convs.clear_pending(&conv.id).unwrap();
        let reloaded = convs.get(&conv.id).unwrap().unwrap();
        assert_eq!(reloaded.debounce_state, DebounceState::Idle);
        assert!(reloaded.pending_messages.is_empty());
    }

    #[test]
    fn message_channel_id_dedupe_and_effective_text() {
        let conn = fresh_conn();
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let msgs = MessageRepository::new(conn);
        let (lead, _) = leads.get_or_create("acme", "+15550005", None).unwrap();
        let conv = convs
            .get_or_create("acme", &lead.id, "centurion-1", ChannelType::Whatsapp, None)
            .unwrap();

        assert!(!msgs.channel_message_exists("acme", "wamid.1").unwrap());
        let msg = msgs
            .insert(
                &conv.id,
                "acme",
                &lead.id,
                Direction::Inbound,
                ContentType::Audio,
                Some("[audio]"),
                Some("wamid.1"),
                &serde_json::json!({}),
            )
            .unwrap();
        assert!(msgs.channel_message_exists("acme", "wamid.1").unwrap());

        msgs.set_media_enrichment(&msg.id, Some("hello there"), None).unwrap();
        let recent = msgs.list_recent(&conv.id, 10, true).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].effective_text(), "hello there");
    }

    #[test]
    fn stuck_conversation_recovery_rearms_or_idles() {
        let conn = fresh_conn();
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn);
        let (lead, _) = leads.get_or_create("acme", "+15550006", None).unwrap();
        let conv = convs
            .get_or_create("acme", &lead.id, "centurion-1", ChannelType::Whatsapp, None)
            .unwrap();
        convs.mark_processing(&conv.id).unwrap();

        // force updated_at into the past by recovering with a large window and checking logic directly
        convs.recover_stuck(&conv.id, true).unwrap();
        let reloaded = convs.get(&conv.id).unwrap().unwrap();
        assert_eq!(reloaded.debounce_state, DebounceState::Waiting);

        convs.mark_processing(&conv.id).unwrap();
        convs.recover_stuck(&conv.id, false).unwrap();
        let reloaded = convs.get(&conv.id).unwrap().unwrap();
        assert_eq!(reloaded.debounce_state, DebounceState::Idle);
    }
}
