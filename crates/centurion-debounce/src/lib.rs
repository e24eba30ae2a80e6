//! Debounce scheduler (C8) and watchdog (C9).
//!
//! Both are independent `tokio::select!` polling loops shut down by a shared
//! `watch::Receiver<bool>`.

use async_trait::async_trait;
use centurion_core::config::{DebounceConfig, WatchdogConfig};
use centurion_core::error::Result;
use centurion_locks::LockManager;
use centurion_store::repository::ConversationRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Seam between the debounce scheduler and the dispatch worker (C10), which
/// lives in its own crate to avoid a circular dependency — the scheduler
/// only needs to know "process this conversation", not how.
#[async_trait]
pub trait ConversationProcessor: Send + Sync {
    async fn process(&self, conversation_id: &str);
}

/// Polls for conversations whose debounce timer has fired and hands each to
/// the dispatch worker under a per-conversation lock. Contention with
/// another runtime instance resolves naturally: whichever instance acquires
/// the lock wins, the other simply fails to acquire and moves on.
pub struct DebounceScheduler {
    conversations: ConversationRepository,
    locks: Arc<LockManager>,
    processor: Arc<dyn ConversationProcessor>,
    config: DebounceConfig,
}

impl DebounceScheduler {
    pub fn new(
        conversations: ConversationRepository,
        locks: Arc<LockManager>,
        processor: Arc<dyn ConversationProcessor>,
        config: DebounceConfig,
    ) -> Self {
        Self { conversations, locks, processor, config }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("debounce scheduler started");
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("debounce scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("debounce scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> Result<()> {
        let due = self.conversations.find_due(self.config.batch_size)?;
        for conv in due {
            let lock_name = format!("conv:{}", conv.id);
            match self
                .locks
                .hold(&lock_name, Duration::from_secs(self.config.lock_ttl_secs()), Some(Duration::from_secs(self.config.lock_refresh_secs())))
                .await?
            {
                Some(guard) => {
                    self.processor.process(&conv.id).await;
                    if let Err(e) = guard.release().await {
                        warn!(conversation_id = %conv.id, error = %e, "failed to release conversation lock");
                    }
                }
                None => {
                    // Another instance holds the lock for this conversation; skip.
                    continue;
                }
            }
        }
        Ok(())
    }
}

/// Polls for conversations stuck in `processing` past a threshold and
/// recovers them. A crash or panic mid-dispatch is the usual cause;
/// recovery re-arms the conversation rather than leaving it wedged forever.
pub struct Watchdog {
    conversations: ConversationRepository,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(conversations: ConversationRepository, config: WatchdogConfig) -> Self {
        Self { conversations, config }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("watchdog started");
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("watchdog tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("watchdog shutting down");
                        break;
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    fn tick(&self) -> Result<()> {
        let stuck = self.conversations.find_stuck(self.config.stuck_after_secs, self.config.batch_size)?;
        for conv in stuck {
            let pending_non_empty = !conv.pending_messages.is_empty();
            warn!(
                conversation_id = %conv.id,
                pending_non_empty,
                "recovering conversation stuck in processing"
            );
            self.conversations.recover_stuck(&conv.id, pending_non_empty)?;
        }
        Ok(())
    }
}

trait DebounceConfigExt {
    fn lock_ttl_secs(&self) -> u64;
    fn lock_refresh_secs(&self) -> u64;
}

impl DebounceConfigExt for DebounceConfig {
    // The per-conversation dispatch lock's TTL tracks the debounce poll
    // interval: long enough to cover one tick of work, refreshed well
    // before expiry so a slow dispatch run doesn't lose the lock mid-flight.
    fn lock_ttl_secs(&self) -> u64 {
        (self.poll_interval_ms / 1000).max(30)
    }

    fn lock_refresh_secs(&self) -> u64 {
        self.lock_ttl_secs() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use centurion_core::types::ChannelType;
    use chrono::{Duration as ChronoDuration, Utc};
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn conn() -> centurion_store::repository::SharedConn {
        let conn = Connection::open_in_memory().unwrap();
        centurion_store::db::init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    struct CountingProcessor {
        count: AtomicUsize,
    }

    #[async_trait]
    impl ConversationProcessor for CountingProcessor {
        async fn process(&self, _conversation_id: &str) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn tick_processes_due_conversation_under_lock() {
        let conn = conn();
        let leads = centurion_store::repository::LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+1", None).unwrap();
        let c = convs.get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, None).unwrap();
        let past = Utc::now() - ChronoDuration::seconds(5);
        convs.append_pending_message(&c.id, "oi", past, past, &serde_json::json!({})).unwrap();

        let locks = Arc::new(LockManager::new(conn).unwrap());
        let processor = Arc::new(CountingProcessor { count: AtomicUsize::new(0) });
        let scheduler = DebounceScheduler::new(convs, locks, processor.clone(), DebounceConfig::default());
        scheduler.tick().await.unwrap();

        assert_eq!(processor.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watchdog_rearms_stuck_conversation_with_pending() {
        let conn = conn();
        let leads = centurion_store::repository::LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+2", None).unwrap();
        let c = convs.get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, None).unwrap();
        let now = Utc::now();
        convs.append_pending_message(&c.id, "oi", now, now, &serde_json::json!({})).unwrap();
        convs.mark_processing(&c.id).unwrap();

        let watchdog = Watchdog::new(convs.clone(), WatchdogConfig { stuck_after_secs: -1, ..WatchdogConfig::default() });
        watchdog.tick().unwrap();

        let reloaded = convs.get(&c.id).unwrap().unwrap();
        assert_eq!(reloaded.debounce_state, centurion_core::types::DebounceState::Waiting);
    }
}
