use centurion_core::config::{DEDUPE_KEY_MAX_LEN, IDEMPOTENCY_TTL_FLOOR_SECS};
use centurion_core::error::{CenturionError, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Mutex;

/// Initialise the `idempotency_claims` table (C2).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS idempotency_claims (
            company_id   TEXT NOT NULL,
            consumer     TEXT NOT NULL,
            dedupe_key   TEXT NOT NULL,
            event_type   TEXT,
            event_id     TEXT,
            correlation_id TEXT,
            causation_id TEXT,
            payload_hash TEXT NOT NULL,
            metadata     TEXT NOT NULL DEFAULT '{}',
            expires_at   TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            PRIMARY KEY (company_id, consumer, dedupe_key)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_idempotency_expires
            ON idempotency_claims (expires_at);
        ",
    )?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ClaimMeta {
    pub event_type: Option<String>,
    pub event_id: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub metadata: Value,
}

/// At-most-once claim-key store (C2). A thin wrapper over a shared
/// connection mutex.
pub struct IdempotencyStore {
    conn: Mutex<Connection>,
}

impl IdempotencyStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Returns true iff a new row was inserted or an expired row was replaced.
    /// TTL is floored at 30s; the dedupe key is truncated to 512 chars.
    pub fn claim(
        &self,
        company_id: &str,
        consumer: &str,
        dedupe_key: &str,
        ttl_secs: u64,
        meta: ClaimMeta,
    ) -> Result<bool> {
        let ttl_secs = ttl_secs.max(IDEMPOTENCY_TTL_FLOOR_SECS);
        let key: String = dedupe_key.chars().take(DEDUPE_KEY_MAX_LEN).collect();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_secs as i64);
        let payload_hash = hash_meta(&meta.metadata);
        let metadata_json = serde_json::to_string(&meta.metadata)?;

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction().map_err(CenturionError::from)?;

        let existing_expiry: Option<String> = tx
            .query_row(
                "SELECT expires_at FROM idempotency_claims
                 WHERE company_id = ?1 AND consumer = ?2 AND dedupe_key = ?3",
                params![company_id, consumer, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(CenturionError::from)?;

        if let Some(expiry_str) = &existing_expiry {
            let expiry: DateTime<Utc> = expiry_str
                .parse()
                .map_err(|e| CenturionError::Internal(format!("corrupt expires_at: {e}")))?;
            if expiry > now {
                // Still live: the claim is held by someone else (or us, already).
                return Ok(false);
            }
        }

        tx.execute(
            "INSERT INTO idempotency_claims
                (company_id, consumer, dedupe_key, event_type, event_id,
                 correlation_id, causation_id, payload_hash, metadata, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (company_id, consumer, dedupe_key) DO UPDATE SET
                event_type = excluded.event_type,
                event_id = excluded.event_id,
                correlation_id = excluded.correlation_id,
                causation_id = excluded.causation_id,
                payload_hash = excluded.payload_hash,
                metadata = excluded.metadata,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at",
            params![
                company_id,
                consumer,
                key,
                meta.event_type,
                meta.event_id,
                meta.correlation_id,
                meta.causation_id,
                payload_hash,
                metadata_json,
                expires_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(CenturionError::from)?;

        tx.commit().map_err(CenturionError::from)?;
        Ok(true)
    }

    /// Unconditional delete — used to compensate a claim when the caller's
    /// subsequent work fails (e.g. outbound publish error).
    pub fn release(&self, company_id: &str, consumer: &str, dedupe_key: &str) -> Result<()> {
        let key: String = dedupe_key.chars().take(DEDUPE_KEY_MAX_LEN).collect();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM idempotency_claims
             WHERE company_id = ?1 AND consumer = ?2 AND dedupe_key = ?3",
            params![company_id, consumer, key],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    /// Bounded oldest-first sweep of expired rows. Returns the number deleted.
    pub fn cleanup_expired(&self, limit: usize) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                "DELETE FROM idempotency_claims
                 WHERE rowid IN (
                    SELECT rowid FROM idempotency_claims
                    WHERE expires_at <= ?1
                    ORDER BY expires_at ASC
                    LIMIT ?2
                 )",
                params![now, limit as i64],
            )
            .map_err(CenturionError::from)?;
        Ok(deleted)
    }
}

fn hash_meta(meta: &Value) -> String {
    let bytes = serde_json::to_vec(meta).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn first_claim_succeeds_second_fails() {
        let store = store();
        let ok1 = store
            .claim("c1", "inbound", "message.received:corr-1", 60, ClaimMeta::default())
            .unwrap();
        let ok2 = store
            .claim("c1", "inbound", "message.received:corr-1", 60, ClaimMeta::default())
            .unwrap();
        assert!(ok1);
        assert!(!ok2);
    }

    #[test]
    fn ttl_below_floor_is_coerced() {
        let store = store();
        // TTL=1s requested, but floor is 30s so an immediate re-claim still fails.
        assert!(store.claim("c1", "outbound", "k", 1, ClaimMeta::default()).unwrap());
        assert!(!store.claim("c1", "outbound", "k", 1, ClaimMeta::default()).unwrap());
    }

    #[test]
    fn release_allows_reclaim() {
        let store = store();
        assert!(store.claim("c1", "outbound", "k", 60, ClaimMeta::default()).unwrap());
        store.release("c1", "outbound", "k").unwrap();
        assert!(store.claim("c1", "outbound", "k", 60, ClaimMeta::default()).unwrap());
    }

    #[test]
    fn dedupe_key_is_truncated() {
        let store = store();
        let long_key = "x".repeat(1000);
        assert!(store
            .claim("c1", "outbound", &long_key, 60, ClaimMeta::default())
            .unwrap());
        // A second key that only differs after char 512 collides with the first.
        let mut other = "x".repeat(600);
        other.push('Z');
        assert!(!store
            .claim("c1", "outbound", &other, 60, ClaimMeta::default())
            .unwrap());
    }
}
