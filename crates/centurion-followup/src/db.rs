use centurion_core::error::Result;
use rusqlite::Connection;

/// Follow-up schema (C14): per-centurion inactivity rules and the queue
/// of scheduled/sent/failed attempts derived from them.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS followup_rules (
            id               TEXT NOT NULL PRIMARY KEY,
            company_id       TEXT NOT NULL,
            centurion_id     TEXT NOT NULL,
            inactivity_hours INTEGER NOT NULL,
            template         TEXT NOT NULL,
            max_attempts     INTEGER NOT NULL DEFAULT 1,
            is_active        INTEGER NOT NULL DEFAULT 1,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_followup_rules_centurion
            ON followup_rules(centurion_id, inactivity_hours);

        CREATE TABLE IF NOT EXISTS followup_queue (
            id              TEXT NOT NULL PRIMARY KEY,
            company_id      TEXT NOT NULL,
            lead_id         TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            rule_id         TEXT NOT NULL,
            scheduled_at    TEXT NOT NULL,
            attempt_number  INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending',
            message_id      TEXT,
            last_error      TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_followup_queue_due
            ON followup_queue(status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_followup_queue_lead_rule
            ON followup_queue(lead_id, rule_id, status);
        ",
    )?;
    Ok(())
}
