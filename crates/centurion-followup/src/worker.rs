use crate::repository::{FollowupQueueItem, FollowupRepository};
use async_trait::async_trait;
use centurion_core::config::FollowupConfig;
use centurion_core::error::Result;
use centurion_core::types::{ContentType, Direction, LifecycleStage};
use centurion_inbound::FollowUpCanceller;
use centurion_store::repository::{load_centurion_config, ConversationRepository, LeadRepository, MessageRepository, SharedConn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Publishes one follow-up send and reports whether it actually went out
/// (same semantics the outbound sender uses: a claimed-but-unsent dedupe
/// is not success). A
/// separate crate the same way `centurion-inbound::FollowUpCanceller`
/// decouples C7 from C14 — here it decouples C14 from C12, which lives in
/// `centurion-dispatch`, to avoid a dispatch <-> followup cycle.
#[async_trait]
pub trait FollowUpSender: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        company_id: &str,
        conversation_id: &str,
        lead_id: &str,
        text: &str,
        correlation_id: &str,
    ) -> Result<bool>;
}

/// Best-effort rewrite of a rule's template using the centurion's persona and
/// conversation history. Returning `None` leaves the raw template
/// untouched.
#[async_trait]
pub trait FollowupMessageAdapter: Send + Sync {
    async fn adapt(&self, persona_prompt: &str, history_text: &str, template: &str) -> Option<String>;
}

/// Default adapter for deployments that don't wire an LLM-backed rewriter.
pub struct NoopFollowupMessageAdapter;

#[async_trait]
impl FollowupMessageAdapter for NoopFollowupMessageAdapter {
    async fn adapt(&self, _persona_prompt: &str, _history_text: &str, _template: &str) -> Option<String> {
        None
    }
}

impl FollowUpCanceller for FollowupRepository {
    fn cancel_pending(&self, lead_id: &str) -> Result<()> {
        self.cancel_pending(lead_id).map(|_| ())
    }
}

/// Follow-up scheduler and worker (C14).
pub struct FollowupWorker {
    conn: SharedConn,
    leads: LeadRepository,
    conversations: ConversationRepository,
    messages: MessageRepository,
    queue: FollowupRepository,
    sender: Arc<dyn FollowUpSender>,
    adapter: Arc<dyn FollowupMessageAdapter>,
    config: FollowupConfig,
}

impl FollowupWorker {
    pub fn new(
        conn: SharedConn,
        queue: FollowupRepository,
        sender: Arc<dyn FollowUpSender>,
        adapter: Arc<dyn FollowupMessageAdapter>,
        config: FollowupConfig,
    ) -> Self {
        Self {
            leads: LeadRepository::new(conn.clone()),
            conversations: ConversationRepository::new(conn.clone()),
            messages: MessageRepository::new(conn.clone()),
            conn,
            queue,
            sender,
            adapter,
            config,
        }
    }

    /// `ScheduleForLead`: called after dispatch finishes handling a
    /// whatsapp turn. Arms the lead's lifecycle to `follow_up_pending` unless
    /// it is already terminal.
    pub fn schedule_for_lead(&self, company_id: &str, lead_id: &str, conversation_id: &str, centurion_id: &str) -> Result<()> {
        let lead = match self.leads.get(lead_id)? {
            Some(l) => l,
            None => return Ok(()),
        };
        let last_contact_at = lead.last_contact_at.unwrap_or_else(chrono::Utc::now);
        let scheduled = self
            .queue
            .schedule_for_lead(company_id, lead_id, conversation_id, centurion_id, last_contact_at)?;
        if scheduled > 0 && !lead.lifecycle_stage.is_terminal() {
            self.leads.set_lifecycle(lead_id, LifecycleStage::FollowUpPending)?;
        }
        Ok(())
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("follow-up worker started");
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.process_due(self.config.batch_size).await {
                        Ok(n) if n > 0 => info!(processed = n, "follow-up batch processed"),
                        Ok(_) => {}
                        Err(e) => error!("follow-up worker tick error: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("follow-up worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// `ProcessDue`: claims up to `limit` due rows and works through
    /// them in order. Failures on one item never abort the batch.
    #[instrument(skip(self))]
    pub async fn process_due(&self, limit: usize) -> Result<usize> {
        let due = self.queue.claim_due(limit)?;
        let n = due.len();
        for item in due {
            if let Err(e) = self.process_one(&item).await {
                warn!(item_id = %item.id, error = %e, "follow-up item failed");
                let _ = self.queue.mark_failed(&item.id, &e.to_string());
            }
        }
        Ok(n)
    }

    async fn process_one(&self, item: &FollowupQueueItem) -> Result<()> {
        let rule = match self.queue.get_rule(&item.rule_id)? {
            Some(r) if r.is_active => r,
            _ => {
                self.queue.mark_failed(&item.id, "rule inactive or missing")?;
                return Ok(());
            }
        };

        let lead = match self.leads.get(&item.lead_id)? {
            Some(l) => l,
            None => {
                self.queue.mark_failed(&item.id, "lead not found")?;
                return Ok(());
            }
        };
        if lead.is_qualified {
            self.queue.mark_failed(&item.id, "lead already qualified")?;
            self.queue.cancel_pending(&item.lead_id)?;
            return Ok(());
        }

        let conversation = match self.conversations.get(&item.conversation_id)? {
            Some(c) => c,
            None => {
                self.queue.mark_failed(&item.id, "conversation not found")?;
                return Ok(());
            }
        };

        let centurion_id = conversation.centurion_id.clone();
        let persona_prompt = load_centurion_config(&self.conn, &centurion_id)?
            .map(|c| c.persona_prompt)
            .unwrap_or_default();
        let history_text = self.messages.full_conversation_text(&item.conversation_id)?;

        let text = match self.adapter.adapt(&persona_prompt, &history_text, &rule.template).await {
            Some(adapted) if !adapted.trim().is_empty() => adapted,
            _ => rule.template.clone(),
        };

        let message = self.messages.insert(
            &item.conversation_id,
            &item.company_id,
            &item.lead_id,
            Direction::Outbound,
            ContentType::Text,
            Some(&text),
            None,
            &serde_json::json!({"followup_rule_id": rule.id}),
        )?;

        let correlation_id = Uuid::now_v7().to_string();
        let sent = self
            .sender
            .send(&item.company_id, &item.conversation_id, &item.lead_id, &text, &correlation_id)
            .await;

        let sent = match sent {
            Ok(ok) => ok,
            Err(e) => {
                self.messages.delete(&message.id)?;
                return Err(e);
            }
        };
        if !sent {
            self.messages.delete(&message.id)?;
            self.queue.mark_failed(&item.id, "send was suppressed by dedupe")?;
            return Ok(());
        }

        self.queue.mark_sent(&item.id, &message.id)?;
        self.conversations.touch_last_outbound(&item.conversation_id)?;
        if !lead.lifecycle_stage.is_terminal() {
            self.leads.set_lifecycle(&item.lead_id, LifecycleStage::FollowUpSent)?;
        }

        if item.attempt_number < rule.max_attempts {
            self.queue.schedule_next_attempt(
                &item.company_id,
                &item.lead_id,
                &item.conversation_id,
                &rule.id,
                item.attempt_number + 1,
                rule.inactivity_hours,
            )?;
            if !lead.lifecycle_stage.is_terminal() {
                self.leads.set_lifecycle(&item.lead_id, LifecycleStage::FollowUpPending)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use centurion_core::types::ChannelType;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingSender {
        count: AtomicUsize,
    }

    #[async_trait]
    impl FollowUpSender for CountingSender {
        async fn send(&self, _company_id: &str, _conversation_id: &str, _lead_id: &str, _text: &str, _correlation_id: &str) -> Result<bool> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn worker(sender: Arc<CountingSender>) -> (FollowupWorker, SharedConn) {
        let conn = Connection::open_in_memory().unwrap();
        centurion_store::db::init_db(&conn).unwrap();
        crate::db::init_db(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let worker = FollowupWorker::new(
            conn.clone(),
            crate::repository::FollowupRepository::new(conn.clone()),
            sender,
            Arc::new(NoopFollowupMessageAdapter),
            FollowupConfig::default(),
        );
        (worker, conn)
    }

    #[tokio::test]
    async fn process_due_sends_and_reschedules_within_max_attempts() {
        let sender = Arc::new(CountingSender { count: AtomicUsize::new(0) });
        let (worker, conn) = worker(sender.clone());

        {
            let c = conn.lock().unwrap();
            c.execute(
                "INSERT INTO followup_rules (id, company_id, centurion_id, inactivity_hours, template, \
                 max_attempts, is_active, created_at, updated_at) \
                 VALUES ('rule-1', 'acme', 'cent-1', 0, 'Ainda por ai?', 2, 1, 'n', 'n')",
                [],
            )
            .unwrap();
        }
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+1555", None).unwrap();
        let conversation = convs.get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, None).unwrap();

        worker.schedule_for_lead("acme", &lead.id, &conversation.id, "cent-1").unwrap();
        let n = worker.process_due(10).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(sender.count.load(Ordering::SeqCst), 1);

        let reloaded = leads.get(&lead.id).unwrap().unwrap();
        assert_eq!(reloaded.lifecycle_stage, LifecycleStage::FollowUpPending);

        // Second attempt is due immediately (inactivity_hours=0); third should not exist (max_attempts=2).
        let n2 = worker.process_due(10).await.unwrap();
        assert_eq!(n2, 1);
        let n3 = worker.process_due(10).await.unwrap();
        assert_eq!(n3, 0);
    }

    #[tokio::test]
    async fn qualified_lead_cancels_remaining_followups() {
        let sender = Arc::new(CountingSender { count: AtomicUsize::new(0) });
        let (worker, conn) = worker(sender);
        {
            let c = conn.lock().unwrap();
            c.execute(
                "INSERT INTO followup_rules (id, company_id, centurion_id, inactivity_hours, template, \
                 max_attempts, is_active, created_at, updated_at) \
                 VALUES ('rule-1', 'acme', 'cent-1', 0, 'oi', 3, 1, 'n', 'n')",
                [],
            )
            .unwrap();
        }
        let leads = LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let (lead, _) = leads.get_or_create("acme", "+1556", None).unwrap();
        let conversation = convs.get_or_create("acme", &lead.id, "cent-1", ChannelType::Whatsapp, None).unwrap();
        worker.schedule_for_lead("acme", &lead.id, &conversation.id, "cent-1").unwrap();
        leads.set_qualified(&lead.id, 1.0, &serde_json::json!({})).unwrap();

        let n = worker.process_due(10).await.unwrap();
        assert_eq!(n, 1);
        assert!(worker.queue.claim_due(10).unwrap().is_empty());
    }
}
