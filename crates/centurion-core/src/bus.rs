use crate::envelope::EventEnvelope;
use std::sync::Arc;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 1024;

/// In-process replacement for a networked bus. A real deployment swaps
/// this for Kafka/Redis-streams without touching any component above C1.
///
/// Fan-out is a single broadcast channel shared by every `event_type`;
/// subscribers filter client-side. This matches the single-topic
/// `EventBroadcaster` the gateway's websocket layer already uses, just
/// carrying `EventEnvelope`s instead of pre-serialized JSON strings.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<EventEnvelope>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, envelope: EventEnvelope) {
        // No subscribers is a normal state at startup; never an error.
        let _ = self.tx.send(Arc::new(envelope));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventEnvelope>> {
        self.tx.subscribe()
    }

    /// Number of live subscribers, used by the `/ready` liveness check.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper for subscriber tasks: receive the next envelope whose `event_type`
/// equals `want`, skipping (and logging at debug level) anything else and
/// tolerating broadcast lag by resubscribing past dropped messages.
pub async fn recv_matching(
    rx: &mut broadcast::Receiver<Arc<EventEnvelope>>,
    want: &str,
) -> Option<Arc<EventEnvelope>> {
    loop {
        match rx.recv().await {
            Ok(env) if env.event_type == want => return Some(env),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "bus subscriber lagged, skipping missed events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
