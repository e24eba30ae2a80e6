use centurion_core::config::{DEFAULT_HISTORY_LIMIT, HISTORY_LIMIT_WITH_SUMMARY};
use centurion_core::error::Result;
use centurion_store::{ConversationRepository, Message, MessageRepository};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(60);

/// Short-term history cache: `conv:{id}:history:{limit}`, 60s TTL.
/// Falls back to the conversation repository's `list_recent` on a miss.
pub struct HistoryCache {
    messages: MessageRepository,
    conversations: ConversationRepository,
    entries: Mutex<HashMap<(String, usize), (Vec<Message>, Instant)>>,
}

impl HistoryCache {
    pub fn new(messages: MessageRepository, conversations: ConversationRepository) -> Self {
        Self {
            messages,
            conversations,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the effective history limit for a conversation: the
    /// compact limit when a session summary already exists,
    /// otherwise the default.
    pub fn effective_limit(&self, conversation_id: &str) -> Result<usize> {
        let has_summary = self
            .conversations
            .get(conversation_id)?
            .and_then(|c| c.session_summary())
            .is_some();
        Ok(if has_summary {
            HISTORY_LIMIT_WITH_SUMMARY
        } else {
            DEFAULT_HISTORY_LIMIT
        })
    }

    pub fn get_history(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let key = (conversation_id.to_string(), limit);
        if let Some((msgs, stamped_at)) = self.entries.lock().unwrap().get(&key) {
            if stamped_at.elapsed() < CACHE_TTL {
                return Ok(msgs.clone());
            }
        }

        let msgs = self.messages.list_recent(conversation_id, limit, true)?;
        self.entries.lock().unwrap().insert(key, (msgs.clone(), Instant::now()));
        Ok(msgs)
    }

    /// Drops cached entries for this conversation across the limits we
    /// actually use, called on every inbound and after each dispatch.
    pub fn invalidate(&self, conversation_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        for limit in [DEFAULT_HISTORY_LIMIT, HISTORY_LIMIT_WITH_SUMMARY] {
            entries.remove(&(conversation_id.to_string(), limit));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use centurion_core::types::{ChannelType, ContentType, Direction};
    use rusqlite::Connection;
    use std::sync::Arc;

    fn fresh() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        centurion_store::init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn cache_hit_avoids_seeing_new_rows_until_invalidated() {
        let conn = fresh();
        let leads = centurion_store::LeadRepository::new(conn.clone());
        let convs = ConversationRepository::new(conn.clone());
        let msgs_repo = MessageRepository::new(conn);
        let (lead, _) = leads.get_or_create("acme", "+1555", None).unwrap();
        let conv = convs.get_or_create("acme", &lead.id, "c1", ChannelType::Whatsapp, None).unwrap();
        msgs_repo
            .insert(&conv.id, "acme", &lead.id, Direction::Inbound, ContentType::Text, Some("oi"), None, &serde_json::json!({}))
            .unwrap();

        let cache = HistoryCache::new(msgs_repo.clone(), convs);
        let first = cache.get_history(&conv.id, 25).unwrap();
        assert_eq!(first.len(), 1);

        msgs_repo
            .insert(&conv.id, "acme", &lead.id, Direction::Inbound, ContentType::Text, Some("tudo bem?"), None, &serde_json::json!({}))
            .unwrap();
        let still_cached = cache.get_history(&conv.id, 25).unwrap();
        assert_eq!(still_cached.len(), 1);

        cache.invalidate(&conv.id);
        let refreshed = cache.get_history(&conv.id, 25).unwrap();
        assert_eq!(refreshed.len(), 2);
    }
}
