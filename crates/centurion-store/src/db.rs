use centurion_core::error::Result;
use rusqlite::Connection;

/// Initialise the core schema: leads, conversations, messages,
/// centurion_configs, channel_instances. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS centurion_configs (
            id                 TEXT NOT NULL PRIMARY KEY,
            company_id         TEXT NOT NULL,
            persona_prompt     TEXT NOT NULL DEFAULT '',
            debounce_wait_ms   INTEGER NOT NULL DEFAULT 3000,
            chunk_max_chars    INTEGER NOT NULL DEFAULT 1200,
            chunk_delay_ms     INTEGER NOT NULL DEFAULT 1500,
            chunking_enabled   INTEGER NOT NULL DEFAULT 1,
            media_enrichment_enabled INTEGER NOT NULL DEFAULT 1,
            qualification_rules TEXT,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_centurion_configs_company
            ON centurion_configs(company_id);

        CREATE TABLE IF NOT EXISTS channel_instances (
            id           TEXT NOT NULL PRIMARY KEY,
            company_id   TEXT NOT NULL,
            channel_type TEXT NOT NULL,
            centurion_id TEXT,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS leads (
            id                  TEXT NOT NULL PRIMARY KEY,
            company_id          TEXT NOT NULL,
            phone               TEXT NOT NULL,
            name                TEXT,
            lifecycle_stage     TEXT NOT NULL DEFAULT 'new',
            is_qualified         INTEGER NOT NULL DEFAULT 0,
            qualification_score REAL,
            qualification_data  TEXT NOT NULL DEFAULT '{}',
            centurion_id        TEXT,
            last_contact_at     TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            UNIQUE(company_id, phone)
        );
        CREATE INDEX IF NOT EXISTS idx_leads_company ON leads(company_id);

        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT NOT NULL PRIMARY KEY,
            company_id          TEXT NOT NULL,
            lead_id             TEXT NOT NULL,
            centurion_id        TEXT NOT NULL,
            channel_type        TEXT NOT NULL,
            channel_instance_id TEXT,
            debounce_state      TEXT NOT NULL DEFAULT 'idle',
            debounce_until      TEXT,
            pending_messages    TEXT NOT NULL DEFAULT '[]',
            last_inbound_at     TEXT,
            last_outbound_at    TEXT,
            lead_state          TEXT NOT NULL DEFAULT 'active',
            metadata            TEXT NOT NULL DEFAULT '{}',
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_lookup
            ON conversations(company_id, lead_id, centurion_id, channel_type);
        CREATE INDEX IF NOT EXISTS idx_conversations_due
            ON conversations(debounce_state, debounce_until);
        CREATE INDEX IF NOT EXISTS idx_conversations_stuck
            ON conversations(debounce_state, updated_at);

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT NOT NULL PRIMARY KEY,
            conversation_id     TEXT NOT NULL,
            company_id          TEXT NOT NULL,
            lead_id             TEXT NOT NULL,
            direction           TEXT NOT NULL,
            content_type        TEXT NOT NULL DEFAULT 'text',
            content             TEXT,
            audio_transcription TEXT,
            image_description   TEXT,
            channel_message_id  TEXT,
            archived            INTEGER NOT NULL DEFAULT 0,
            metadata            TEXT NOT NULL DEFAULT '{}',
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_channel_message_id
            ON messages(company_id, channel_message_id)
            WHERE channel_message_id IS NOT NULL;
        ",
    )?;
    Ok(())
}
