use centurion_core::error::Result;
use rusqlite::Connection;

/// Handoff schema (C15): the tenant->CRM-schema binding and a local
/// index over every `deals` row written into a tenant's ATTACHed schema, so
/// lookups don't need to ATTACH just to check idempotency.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS company_crms (
            company_id  TEXT NOT NULL PRIMARY KEY,
            schema_name TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS deals_index (
            id            TEXT NOT NULL PRIMARY KEY,
            company_id    TEXT NOT NULL,
            lead_id       TEXT NOT NULL UNIQUE,
            schema_name   TEXT NOT NULL,
            local_deal_id TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
