use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /ready — aggregated readiness probe: DB ping + event bus liveness.
/// Returns 503 when any dependency check fails, matching the "aggregated
/// DB+cache checks" contract.
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let db_ok = {
        let conn = state.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    };
    // The bus itself has no "down" state in-process; report subscriber count
    // as a liveness signal rather than a pass/fail check.
    let bus_subscribers = state.bus.subscriber_count();
    let bus_ok = true;

    let checks = json!({
        "database": db_ok,
        "bus": bus_ok,
        "bus_subscribers": bus_subscribers,
    });

    if db_ok && bus_ok {
        (StatusCode::OK, Json(json!({"status": "ready", "checks": checks})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "not_ready", "checks": checks})))
    }
}
