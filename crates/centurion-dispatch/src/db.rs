use centurion_core::error::Result;
use rusqlite::Connection;

/// Qualification-event ledger: one row per
/// `(lead_id, correlation_id, rules_hash)` makes re-running qualification
/// for the same dispatch turn (e.g. after a crash-recovered watchdog retry)
/// a no-op instead of re-publishing `lead.qualified`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS lead_qualification_events (
            lead_id        TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            rules_hash     TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            PRIMARY KEY (lead_id, correlation_id, rules_hash)
        ) STRICT;
        ",
    )?;
    Ok(())
}
