use std::net::SocketAddr;
use tracing::info;

mod app;
mod http;
mod tools;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "centurion_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > CENTURION_CONFIG env > ~/.centurion/centurion.toml
    let config_path = std::env::var("CENTURION_CONFIG").ok();
    let config = centurion_core::config::CenturionConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        centurion_core::config::CenturionConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let runtime = app::bootstrap(config)?;
    let app::Runtime { state, shutdown_tx, debounce, watchdog, followup, memory_cleanup } = runtime;

    let inbound_handle = tokio::spawn(app::run_inbound_subscriber(
        state.bus.clone(),
        state.inbound.clone(),
        shutdown_tx.subscribe(),
    ));
    let debounce_handle = tokio::spawn(debounce.run(shutdown_tx.subscribe()));
    let watchdog_handle = tokio::spawn(watchdog.run(shutdown_tx.subscribe()));
    let followup_handle = tokio::spawn(followup.run(shutdown_tx.subscribe()));
    let memory_cleanup_handle = tokio::spawn(memory_cleanup.run(shutdown_tx.subscribe()));

    let router = app::build_router(state.clone());
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Centurion gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve = axum::serve(listener, router).with_graceful_shutdown(wait_for_ctrl_c());
    serve.await?;

    // Ctrl-C arrived: stop the background workers too, then wait for each to
    // actually exit before the process does.
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(
        inbound_handle,
        debounce_handle,
        watchdog_handle,
        followup_handle,
        memory_cleanup_handle
    );

    info!("centurion gateway shut down cleanly");
    Ok(())
}

async fn wait_for_ctrl_c() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("ctrl-c received, shutting down");
}
