use centurion_core::error::Result;
use rusqlite::Connection;

/// Long-term memory tables: facts per lead, knowledge chunks per
/// company. Embeddings are stored as a JSON array of f32 — no embedding
/// model is trained here, callers supply precomputed vectors.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS facts (
            id          TEXT NOT NULL PRIMARY KEY,
            company_id  TEXT NOT NULL,
            lead_id     TEXT NOT NULL,
            category    TEXT NOT NULL DEFAULT 'context',
            text        TEXT NOT NULL,
            embedding   TEXT NOT NULL DEFAULT '[]',
            source      TEXT NOT NULL DEFAULT 'inferred',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(lead_id, category, text)
        );
        CREATE INDEX IF NOT EXISTS idx_facts_lead ON facts(lead_id);

        CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id          TEXT NOT NULL PRIMARY KEY,
            company_id  TEXT NOT NULL,
            text        TEXT NOT NULL,
            embedding   TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_knowledge_company ON knowledge_chunks(company_id);
        ",
    )?;
    Ok(())
}
