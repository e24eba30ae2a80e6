use centurion_core::error::{CenturionError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Initialise the `locks` table (C3). SQLite has no `SET NX EX` or Lua
/// scripting, so acquire/release/refresh are expressed as short
/// transactions instead.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS locks (
            name       TEXT NOT NULL PRIMARY KEY,
            token      TEXT NOT NULL,
            expires_at TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Named distributed lock manager backed by the shared SQLite connection
/// (C3). Acquisition is set-if-absent-or-expired with a unique owner token;
/// release and refresh both require the caller's token to match.
#[derive(Clone)]
pub struct LockManager {
    conn: Arc<Mutex<Connection>>,
}

impl LockManager {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let c = conn.lock().unwrap();
            init_db(&c)?;
        }
        Ok(Self { conn })
    }

    pub fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + ChronoDuration::milliseconds(ttl.as_millis() as i64);

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction().map_err(CenturionError::from)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT expires_at FROM locks WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(CenturionError::from)?;

        if let Some(expiry_str) = &existing {
            let expiry: DateTime<Utc> = expiry_str
                .parse()
                .map_err(|e| CenturionError::Internal(format!("corrupt lock expiry: {e}")))?;
            if expiry > now {
                return Ok(None); // still held by someone else
            }
        }

        tx.execute(
            "INSERT INTO locks (name, token, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (name) DO UPDATE SET token = excluded.token, expires_at = excluded.expires_at",
            params![name, token, expires_at.to_rfc3339()],
        )
        .map_err(CenturionError::from)?;
        tx.commit().map_err(CenturionError::from)?;

        Ok(Some(token))
    }

    /// Compare-token-then-delete. Only the current holder may release.
    pub fn release(&self, name: &str, token: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                "DELETE FROM locks WHERE name = ?1 AND token = ?2",
                params![name, token],
            )
            .map_err(CenturionError::from)?;
        Ok(deleted > 0)
    }

    /// Extend the TTL only when `token` still matches the holder.
    pub fn refresh(&self, name: &str, token: &str, ttl: Duration) -> Result<bool> {
        let expires_at = Utc::now() + ChronoDuration::milliseconds(ttl.as_millis() as i64);
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE locks SET expires_at = ?1 WHERE name = ?2 AND token = ?3",
                params![expires_at.to_rfc3339(), name, token],
            )
            .map_err(CenturionError::from)?;
        Ok(updated > 0)
    }

    /// Scoped acquisition with an optional background refresher. Returns
    /// `None` if the lock is currently held elsewhere (caller should retry
    /// on the next poll tick rather than block).
    pub async fn hold(
        self: &Arc<Self>,
        name: &str,
        ttl: Duration,
        refresh_every: Option<Duration>,
    ) -> Result<Option<LockGuard>> {
        let token = match self.acquire(name, ttl)? {
            Some(t) => t,
            None => return Ok(None),
        };

        let refresher = refresh_every.map(|interval| {
            let mgr = Arc::clone(self);
            let name = name.to_string();
            let token = token.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    // Refresh errors are swallowed: the TTL still bounds
                    // how long a wedged holder can block others.
                    if let Err(e) = mgr.refresh(&name, &token, ttl) {
                        tracing::warn!(lock = %name, error = %e, "lock refresh failed");
                    }
                }
            })
        });

        Ok(Some(LockGuard {
            manager: Arc::clone(self),
            name: name.to_string(),
            token,
            refresher,
            released: false,
        }))
    }
}

/// RAII-ish guard for a held lock. Call `release().await` on the happy path;
/// `Drop` aborts the background refresher and best-effort releases via a
/// detached task so a forgotten guard doesn't wedge the lock beyond its TTL.
pub struct LockGuard {
    manager: Arc<LockManager>,
    name: String,
    token: String,
    refresher: Option<JoinHandle<()>>,
    released: bool,
}

impl LockGuard {
    pub async fn release(mut self) -> Result<()> {
        self.do_release()
    }

    fn do_release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if let Some(h) = self.refresher.take() {
            h.abort();
        }
        self.manager.release(&self.name, &self.token)?;
        self.released = true;
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(h) = self.refresher.take() {
            h.abort();
        }
        let manager = self.manager.clone();
        let name = self.name.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.release(&name, &token) {
                tracing::warn!(lock = %name, error = %e, "lock release on drop failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<LockManager> {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        Arc::new(LockManager::new(conn).unwrap())
    }

    #[test]
    fn acquire_blocks_second_holder_until_expiry_or_release() {
        let mgr = manager();
        let t1 = mgr.acquire("conv:1", Duration::from_secs(60)).unwrap();
        assert!(t1.is_some());
        let t2 = mgr.acquire("conv:1", Duration::from_secs(60)).unwrap();
        assert!(t2.is_none());

        assert!(mgr.release("conv:1", &t1.unwrap()).unwrap());
        let t3 = mgr.acquire("conv:1", Duration::from_secs(60)).unwrap();
        assert!(t3.is_some());
    }

    #[test]
    fn release_requires_matching_token() {
        let mgr = manager();
        let token = mgr.acquire("conv:2", Duration::from_secs(60)).unwrap().unwrap();
        assert!(!mgr.release("conv:2", "wrong-token").unwrap());
        assert!(mgr.release("conv:2", &token).unwrap());
    }

    #[test]
    fn refresh_requires_matching_token() {
        let mgr = manager();
        let token = mgr.acquire("conv:3", Duration::from_secs(1)).unwrap().unwrap();
        assert!(!mgr.refresh("conv:3", "wrong", Duration::from_secs(60)).unwrap());
        assert!(mgr.refresh("conv:3", &token, Duration::from_secs(60)).unwrap());
    }

    #[tokio::test]
    async fn hold_then_release_frees_the_lock() {
        let mgr = manager();
        let guard = mgr.hold("conv:4", Duration::from_secs(30), None).await.unwrap();
        assert!(guard.is_some());
        // Contended while held.
        assert!(mgr.hold("conv:4", Duration::from_secs(30), None).await.unwrap().is_none());
        guard.unwrap().release().await.unwrap();
        assert!(mgr.hold("conv:4", Duration::from_secs(30), None).await.unwrap().is_some());
    }
}
