use centurion_core::error::{CenturionError, Result};
use centurion_store::repository::SharedConn;
use chrono::Utc;
use rusqlite::params;

/// Tracks which `(lead_id, correlation_id, rules_hash)` qualification
/// passes have already run.
#[derive(Clone)]
pub struct QualificationEventLog {
    conn: SharedConn,
}

impl QualificationEventLog {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Returns `true` if this is the first time this triple has been
    /// recorded (the caller should proceed with the qualified-lead side
    /// effects); `false` if already recorded.
    pub fn record_if_new(&self, lead_id: &str, correlation_id: &str, rules_hash: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO lead_qualification_events (lead_id, correlation_id, rules_hash, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![lead_id, correlation_id, rules_hash, Utc::now().to_rfc3339()],
            )
            .map_err(CenturionError::from)?;
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    #[test]
    fn second_record_for_same_triple_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let log = QualificationEventLog::new(Arc::new(Mutex::new(conn)));
        assert!(log.record_if_new("lead-1", "corr-1", "hash-1").unwrap());
        assert!(!log.record_if_new("lead-1", "corr-1", "hash-1").unwrap());
        assert!(log.record_if_new("lead-1", "corr-2", "hash-1").unwrap());
    }
}
