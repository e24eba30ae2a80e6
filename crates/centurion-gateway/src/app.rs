use centurion_agent::{LlmProvider, OpenAiProvider};
use centurion_core::config::CenturionConfig;
use centurion_core::error::{CenturionError, Result};
use centurion_core::bus::EventBus;
use centurion_channels::ChannelRouter;
use centurion_debounce::{ConversationProcessor, DebounceScheduler, Watchdog};
use centurion_dispatch::DispatchService;
use centurion_egress::{EgressPolicy, PayloadLimits};
use centurion_followup::worker::FollowUpSender;
use centurion_followup::{FollowupRepository, FollowupWorker, LlmFollowupAdapter};
use centurion_handoff::HandoffService;
use centurion_idempotency::IdempotencyStore;
use centurion_inbound::InboundHandler;
use centurion_locks::LockManager;
use centurion_qualification::{LlmQualifier, OpenAiQualifier};
use centurion_store::repository::{ConversationRepository, SharedConn};
use centurion_tools::mcp::McpBridge;
use centurion_tools::registry::{KeyringResolver, PlaintextResolver, SecretResolver, ToolRegistry};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::tools::CenturionToolSetProvider;

/// Everything an axum handler needs. Built once at startup in
/// `bootstrap` and shared behind an `Arc`.
pub struct AppState {
    pub config: CenturionConfig,
    pub conn: SharedConn,
    pub bus: EventBus,
    pub dispatch: Arc<DispatchService>,
    pub inbound: Arc<InboundHandler>,
}

/// Everything `bootstrap` builds, including the background workers main.rs
/// spawns and the shutdown handle it signals on Ctrl-C.
pub struct Runtime {
    pub state: Arc<AppState>,
    pub shutdown_tx: watch::Sender<bool>,
    pub debounce: DebounceScheduler,
    pub watchdog: Watchdog,
    pub followup: FollowupWorker,
    pub memory_cleanup: centurion_memory::MemoryCleanupWorker,
}

/// Bridges the in-process bus to the inbound handler: subscribes to
/// `message.received` and runs C7's full pipeline for each envelope.
/// Grounded in the same `tokio::select!` + `watch::Receiver<bool>` shutdown
/// shape every other worker in this runtime uses.
pub async fn run_inbound_subscriber(
    bus: EventBus,
    inbound: Arc<InboundHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("inbound bus subscriber started");
    let mut rx = bus.subscribe();
    loop {
        tokio::select! {
            envelope = centurion_core::bus::recv_matching(&mut rx, "message.received") => {
                match envelope {
                    Some(envelope) => {
                        let bytes = match envelope.to_bytes() {
                            Ok(b) => b,
                            Err(e) => {
                                warn!(error = %e, "failed to re-serialize message.received envelope");
                                continue;
                            }
                        };
                        if let Err(e) = inbound.handle(&bytes).await {
                            warn!(error = %e, "inbound handler failed");
                        }
                    }
                    None => {
                        warn!("bus closed, inbound subscriber exiting");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("inbound bus subscriber shutting down");
                    break;
                }
            }
        }
    }
}

fn build_llm_provider(config: &CenturionConfig) -> Arc<dyn LlmProvider> {
    match &config.providers.openai {
        Some(openai) if !openai.api_key.is_empty() => {
            Arc::new(OpenAiProvider::new(openai.api_key.clone(), openai.base_url.clone()))
        }
        _ => {
            warn!("no openai provider configured, dispatch will use the deterministic fallback response");
            Arc::new(NoProvider)
        }
    }
}

/// Stand-in used when no LLM credentials are configured. Every call fails
/// over to `deterministic_fallback_response`, the same path a live
/// provider's transient error takes.
struct NoProvider;

#[async_trait::async_trait]
impl LlmProvider for NoProvider {
    fn name(&self) -> &str {
        "none"
    }
    async fn send(
        &self,
        _req: &centurion_agent::ChatRequest,
    ) -> std::result::Result<centurion_agent::ChatResponse, centurion_agent::ProviderError> {
        Err(centurion_agent::ProviderError::Unavailable("no LLM provider configured".to_string()))
    }
}

fn build_secret_resolver(config: &CenturionConfig) -> Arc<dyn SecretResolver> {
    match &config.secrets.keyring_key {
        Some(key) if !key.is_empty() => Arc::new(KeyringResolver::new(centurion_core::keyring::Keyring::new(
            key.clone(),
            config.secrets.keyring_previous_keys.clone(),
        ))),
        _ => {
            warn!("no keyring key configured, tool auth secrets are stored/used as plaintext");
            Arc::new(PlaintextResolver)
        }
    }
}

fn tenant_db_dir(config: &CenturionConfig) -> String {
    let path = std::path::Path::new(&config.database.path);
    let parent = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    parent.join("tenants").to_string_lossy().into_owned()
}

/// Wires every component into one running system: opens the shared
/// connection, runs every crate's `init_db`, then constructs the services
/// bottom-up (stores -> policies -> dispatch -> inbound -> schedulers).
pub fn bootstrap(config: CenturionConfig) -> Result<Runtime> {
    if let Some(dir) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(dir).map_err(CenturionError::Io)?;
    }
    let conn = Connection::open(&config.database.path).map_err(CenturionError::from)?;
    centurion_store::db::init_db(&conn)?;
    centurion_followup::db::init_db(&conn)?;
    centurion_tools::init_db(&conn)?;
    centurion_handoff::db::init_db(&conn)?;
    centurion_memory::init_db(&conn)?;
    centurion_dispatch::db::init_db(&conn)?;
    let conn: SharedConn = Arc::new(std::sync::Mutex::new(conn));

    // Idempotency owns a separate connection to the same file: its store is
    // constructed from an owned `Connection`, not the shared `SharedConn`
    // every other component uses.
    let idem_conn = Connection::open(&config.database.path).map_err(CenturionError::from)?;
    let idempotency = Arc::new(IdempotencyStore::new(idem_conn)?);

    let bus = EventBus::new();
    let locks = Arc::new(LockManager::new(conn.clone())?);
    let channels = Arc::new(ChannelRouter::new());
    let egress = Arc::new(EgressPolicy::from_config(&config.egress));
    let limits = Arc::new(PayloadLimits::from_config(&config.payload_limits));
    let llm = build_llm_provider(&config);

    let resolver = build_secret_resolver(&config);
    let tool_registry = ToolRegistry::new(Arc::clone(&egress), Arc::clone(&limits), resolver);
    let mcp_bridge = Arc::new(McpBridge::new(Arc::clone(&egress)));
    let tools = Arc::new(CenturionToolSetProvider::new(conn.clone(), tool_registry, mcp_bridge));

    let qualifier: Option<Arc<dyn LlmQualifier>> = config.providers.openai.as_ref().filter(|o| !o.api_key.is_empty()).map(|o| {
        Arc::new(OpenAiQualifier::new(o.api_key.clone(), o.base_url.clone(), o.model.clone())) as Arc<dyn LlmQualifier>
    });

    let outbound = Arc::new(centurion_dispatch::OutboundSender::new(Arc::clone(&idempotency), bus.clone()));
    let handoff = Arc::new(HandoffService::new(conn.clone(), tenant_db_dir(&config)));

    let dispatch = Arc::new(DispatchService::new(
        conn.clone(),
        Arc::clone(&channels),
        Arc::clone(&llm),
        tools,
        qualifier,
        outbound,
        handoff,
        bus.clone(),
    ));

    // Shared by the follow-up worker and as the inbound handler's canceller
    // any fresh inbound activity cancels pending follow-ups.
    let followup_repo = FollowupRepository::new(conn.clone());
    let followup_canceller: Arc<dyn centurion_inbound::FollowUpCanceller> = Arc::new(followup_repo.clone());

    let inbound = Arc::new(InboundHandler::new(
        conn.clone(),
        Arc::clone(&idempotency),
        channels,
        bus.clone(),
        egress,
        limits,
        Arc::clone(&llm),
        followup_canceller,
    ));

    let conversations = ConversationRepository::new(conn.clone());
    let processor: Arc<dyn ConversationProcessor> = dispatch.clone();
    let debounce = DebounceScheduler::new(conversations.clone(), Arc::clone(&locks), processor, config.debounce.clone());
    let watchdog = Watchdog::new(conversations, config.watchdog.clone());

    let followup_adapter = Arc::new(LlmFollowupAdapter::new(Arc::clone(&llm)));
    let followup_sender: Arc<dyn FollowUpSender> = dispatch.clone();
    let followup = FollowupWorker::new(
        conn.clone(),
        followup_repo,
        followup_sender,
        followup_adapter,
        config.followup.clone(),
    );

    let memory_cleanup = centurion_memory::MemoryCleanupWorker::new(
        conn.clone(),
        centurion_store::MessageRepository::new(conn.clone()),
        centurion_memory::FactStore::new(conn.clone()),
        Arc::clone(&idempotency),
        config.memory_cleanup.clone(),
    );

    let state = Arc::new(AppState {
        config,
        conn,
        bus,
        dispatch,
        inbound,
    });

    let (shutdown_tx, _) = watch::channel(false);

    info!("centurion gateway bootstrap complete");
    Ok(Runtime {
        state,
        shutdown_tx,
        debounce,
        watchdog,
        followup,
        memory_cleanup,
    })
}

pub fn build_router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/health", axum::routing::get(crate::http::health::health_handler))
        .route("/ready", axum::routing::get(crate::http::ready::ready_handler))
        .route(
            "/centurions/{id}/test",
            axum::routing::post(crate::http::centurion_test::test_handler),
        )
        .with_state(state)
        .layer(axum::middleware::from_fn(crate::http::middleware::correlation_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
