use crate::similarity::{CosineScorer, SimilarityScorer};
use crate::types::{Fact, FactSource, KnowledgeChunk};
use centurion_core::config::{KNOWLEDGE_CHUNK_TOP_K, LONG_TERM_FACT_MAX_DISTANCE, LONG_TERM_FACT_TOP_K};
use centurion_core::error::{CenturionError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub type SharedConn = Arc<Mutex<Connection>>;

fn row_to_fact(row: &Row) -> rusqlite::Result<Fact> {
    let embedding_json: String = row.get(5)?;
    let source: String = row.get(6)?;
    let created: String = row.get(7)?;
    let updated: String = row.get(8)?;
    Ok(Fact {
        id: row.get(0)?,
        company_id: row.get(1)?,
        lead_id: row.get(2)?,
        category: row.get(3)?,
        text: row.get(4)?,
        embedding: serde_json::from_str(&embedding_json).unwrap_or_default(),
        source: FactSource::from_str(&source).unwrap_or(FactSource::Inferred),
        created_at: created.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated.parse().unwrap_or_else(|_| Utc::now()),
    })
}

/// Long-term per-lead fact store with deduplication and vector retrieval.
pub struct FactStore {
    conn: SharedConn,
    scorer: Box<dyn SimilarityScorer>,
}

impl FactStore {
    pub fn new(conn: SharedConn) -> Self {
        Self {
            conn,
            scorer: Box::new(CosineScorer),
        }
    }

    pub fn with_scorer(conn: SharedConn, scorer: Box<dyn SimilarityScorer>) -> Self {
        Self { conn, scorer }
    }

    /// Upserts a fact, deduplicated per `(lead_id, category, text)`.
    pub fn learn(
        &self,
        company_id: &str,
        lead_id: &str,
        category: &str,
        text: &str,
        embedding: &[f32],
        source: FactSource,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let embedding_json = serde_json::to_string(embedding)?;
        conn.execute(
            "INSERT INTO facts (id, company_id, lead_id, category, text, embedding, source, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) \
             ON CONFLICT(lead_id, category, text) DO UPDATE SET \
             embedding = excluded.embedding, source = excluded.source, updated_at = excluded.updated_at",
            params![Uuid::now_v7().to_string(), company_id, lead_id, category, text, embedding_json, source.to_string(), now],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    pub fn forget(&self, lead_id: &str, category: &str, text: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM facts WHERE lead_id = ?1 AND category = ?2 AND text = ?3",
            params![lead_id, category, text],
        )
        .map_err(CenturionError::from)?;
        Ok(())
    }

    pub fn list_for_lead(&self, lead_id: &str) -> Result<Vec<Fact>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, company_id, lead_id, category, text, embedding, source, created_at, updated_at \
                 FROM facts WHERE lead_id = ?1 ORDER BY updated_at DESC",
            )
            .map_err(CenturionError::from)?;
        let rows = stmt.query_map(params![lead_id], row_to_fact).map_err(CenturionError::from)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CenturionError::from)
    }

    /// Top-k facts within the similarity cutoff, nearest first.
    pub fn search_similar(&self, lead_id: &str, query_embedding: &[f32], top_k: Option<usize>) -> Result<Vec<(Fact, f64)>> {
        let facts = self.list_for_lead(lead_id)?;
        let mut scored: Vec<(Fact, f64)> = facts
            .into_iter()
            .map(|f| {
                let d = self.scorer.distance(query_embedding, &f.embedding);
                (f, d)
            })
            .filter(|(_, d)| *d <= LONG_TERM_FACT_MAX_DISTANCE)
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k.unwrap_or(LONG_TERM_FACT_TOP_K));
        Ok(scored)
    }

    /// Prunes bot-authored facts older than `days`.
    pub fn prune_bot_facts_older_than(&self, days: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let n = conn
            .execute(
                "DELETE FROM facts WHERE source = 'bot' AND created_at < ?1",
                params![cutoff],
            )
            .map_err(CenturionError::from)?;
        Ok(n)
    }
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<KnowledgeChunk> {
    let embedding_json: String = row.get(3)?;
    let created: String = row.get(4)?;
    Ok(KnowledgeChunk {
        id: row.get(0)?,
        company_id: row.get(1)?,
        text: row.get(2)?,
        embedding: serde_json::from_str(&embedding_json).unwrap_or_default(),
        created_at: created.parse().unwrap_or_else(|_| Utc::now()),
    })
}

/// Read-only access to knowledge-base chunks (ingestion is out of scope;
/// rows are assumed populated by an external pipeline).
pub struct KnowledgeStore {
    conn: SharedConn,
    scorer: Box<dyn SimilarityScorer>,
}

impl KnowledgeStore {
    pub fn new(conn: SharedConn) -> Self {
        Self {
            conn,
            scorer: Box::new(CosineScorer),
        }
    }

    pub fn search_similar(&self, company_id: &str, query_embedding: &[f32], top_k: Option<usize>) -> Result<Vec<(KnowledgeChunk, f64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, company_id, text, embedding, created_at FROM knowledge_chunks WHERE company_id = ?1",
            )
            .map_err(CenturionError::from)?;
        let rows = stmt.query_map(params![company_id], row_to_chunk).map_err(CenturionError::from)?;
        let chunks = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CenturionError::from)?;
        drop(stmt);
        drop(conn);

        let mut scored: Vec<(KnowledgeChunk, f64)> = chunks
            .into_iter()
            .map(|c| {
                let d = self.scorer.distance(query_embedding, &c.embedding);
                (c, d)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k.unwrap_or(KNOWLEDGE_CHUNK_TOP_K));
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> SharedConn {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn learn_deduplicates_by_lead_category_text() {
        let store = FactStore::new(fresh());
        store.learn("acme", "lead-1", "preference", "quer entrega rápida", &[1.0, 0.0], FactSource::User).unwrap();
        store.learn("acme", "lead-1", "preference", "quer entrega rápida", &[0.9, 0.1], FactSource::Inferred).unwrap();
        let facts = store.list_for_lead("lead-1").unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].source, FactSource::Inferred);
    }

    #[test]
    fn search_similar_filters_by_distance_and_orders_nearest_first() {
        let store = FactStore::new(fresh());
        store.learn("acme", "lead-1", "context", "mora em SP", &[1.0, 0.0, 0.0], FactSource::User).unwrap();
        store.learn("acme", "lead-1", "context", "tem orçamento alto", &[0.0, 1.0, 0.0], FactSource::User).unwrap();
        let hits = store.search_similar("lead-1", &[1.0, 0.0, 0.0], None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.text, "mora em SP");
    }

    #[test]
    fn prune_bot_facts_respects_threshold() {
        let store = FactStore::new(fresh());
        store.learn("acme", "lead-1", "context", "gerado pelo bot", &[], FactSource::Bot).unwrap();
        store.learn("acme", "lead-1", "context", "disse o usuário", &[], FactSource::User).unwrap();
        // threshold of 0 days prunes everything already created (created_at < now+epsilon)
        let n = store.prune_bot_facts_older_than(-1).unwrap();
        assert_eq!(n, 1);
        let remaining = store.list_for_lead("lead-1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source, FactSource::User);
    }
}
