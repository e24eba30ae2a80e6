use crate::store::FactStore;
use centurion_core::config::{
    MemoryCleanupConfig, MEMORY_ARCHIVE_INACTIVE_DAYS, MEMORY_PRUNE_BOT_FACTS_DAYS,
    MEMORY_STRIP_AGNO_SESSION_DAYS,
};
use centurion_core::error::Result;
use centurion_idempotency::IdempotencyStore;
use centurion_store::MessageRepository;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info};

/// Report of one cleanup pass, surfaced for logging/metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    pub messages_archived: usize,
    pub agno_sessions_stripped: usize,
    pub bot_facts_pruned: usize,
    pub idempotency_claims_expired: usize,
}

/// Runs every long-term cleanup sweep: archive inactive
/// conversation history, strip stale `agno_session` blobs, prune
/// bot-authored facts, and piggyback C2's expired-claim sweep.
pub fn run_once(
    store_conn: &Arc<Mutex<Connection>>,
    messages: &MessageRepository,
    facts: &FactStore,
    idempotency: &IdempotencyStore,
) -> Result<CleanupReport> {
    let messages_archived = messages.archive_inactive_older_than(MEMORY_ARCHIVE_INACTIVE_DAYS)?;
    let agno_sessions_stripped = strip_agno_sessions(store_conn, MEMORY_STRIP_AGNO_SESSION_DAYS)?;
    let bot_facts_pruned = facts.prune_bot_facts_older_than(MEMORY_PRUNE_BOT_FACTS_DAYS)?;
    let idempotency_claims_expired = idempotency.cleanup_expired(1000)?;

    let report = CleanupReport {
        messages_archived,
        agno_sessions_stripped,
        bot_facts_pruned,
        idempotency_claims_expired,
    };
    info!(?report, "memory cleanup pass complete");
    Ok(report)
}

/// Removes the `agno_session` key from conversation metadata once the
/// conversation has been untouched for `days` — these are raw LLM run
/// history blobs the runtime only ever keeps compacted summaries of.
fn strip_agno_sessions(conn: &Arc<Mutex<Connection>>, days: i64) -> Result<usize> {
    let conn = conn.lock().unwrap();
    let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT id, metadata FROM conversations \
         WHERE updated_at < ?1 AND metadata LIKE '%agno_session%'",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map(params![cutoff], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    let mut stripped = 0;
    for (id, metadata_json) in rows {
        let mut metadata: serde_json::Value =
            serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Object(Default::default()));
        if let Some(obj) = metadata.as_object_mut() {
            if obj.remove("agno_session").is_some() {
                conn.execute(
                    "UPDATE conversations SET metadata = ?1 WHERE id = ?2",
                    params![metadata.to_string(), id],
                )?;
                stripped += 1;
            }
        }
    }
    Ok(stripped)
}

/// Periodic wrapper around [`run_once`], using the same `watch::Receiver<bool>`
/// shutdown pattern as the other background workers in this runtime.
pub struct MemoryCleanupWorker {
    store_conn: Arc<Mutex<Connection>>,
    messages: MessageRepository,
    facts: FactStore,
    idempotency: Arc<IdempotencyStore>,
    config: MemoryCleanupConfig,
}

impl MemoryCleanupWorker {
    pub fn new(
        store_conn: Arc<Mutex<Connection>>,
        messages: MessageRepository,
        facts: FactStore,
        idempotency: Arc<IdempotencyStore>,
        config: MemoryCleanupConfig,
    ) -> Self {
        Self { store_conn, messages, facts, idempotency, config }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("memory cleanup worker started");
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(self.config.interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = run_once(&self.store_conn, &self.messages, &self.facts, &self.idempotency) {
                        error!("memory cleanup pass error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("memory cleanup worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use centurion_core::types::ChannelType;
    use centurion_store::{ConversationRepository, LeadRepository};

    fn fresh() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        centurion_store::init_db(&conn).unwrap();
        crate::db::init_db(&conn).unwrap();
        centurion_idempotency::init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn strip_agno_sessions_only_touches_stale_conversations() {
        let conn = fresh();
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+1555", None).unwrap();
        let conv = convs
            .get_or_create("acme", &lead.id, "c1", ChannelType::Whatsapp, None)
            .unwrap();
        convs
            .patch_metadata(&conv.id, &serde_json::json!({"agno_session": {"turns": []}}))
            .unwrap();

        // fresh conversation: not stale yet, nothing stripped
        let stripped = strip_agno_sessions(&conn, 90).unwrap();
        assert_eq!(stripped, 0);

        // negative threshold makes every row "stale"
        let stripped = strip_agno_sessions(&conn, -1).unwrap();
        assert_eq!(stripped, 1);
        let reloaded = convs.get(&conv.id).unwrap().unwrap();
        assert!(reloaded.metadata.get("agno_session").is_none());
    }

    #[test]
    fn run_once_aggregates_all_sweeps() {
        let conn = fresh();
        let messages = MessageRepository::new(conn.clone());
        let facts = FactStore::new(conn.clone());
        let idempotency = IdempotencyStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let report = run_once(&conn, &messages, &facts, &idempotency).unwrap();
        assert_eq!(report.messages_archived, 0);
    }
}
