//! POST /centurions/{id}/test — one-shot agent run.
//!
//! Wired to `DispatchService::test_run`, the same prompt-assembly code path
//! the real pipeline uses.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct TestRequest {
    pub company_id: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct TestResponse {
    pub ok: bool,
    pub model: String,
    pub response: String,
    pub usage: TestUsage,
}

#[derive(Serialize)]
pub struct TestUsage {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

#[derive(Serialize)]
pub struct TestErrorBody {
    pub ok: bool,
    pub error: String,
}

pub async fn test_handler(
    State(state): State<Arc<AppState>>,
    Path(centurion_id): Path<String>,
    Json(req): Json<TestRequest>,
) -> Result<Json<TestResponse>, (StatusCode, Json<TestErrorBody>)> {
    if req.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(TestErrorBody { ok: false, error: "message cannot be empty".to_string() }),
        ));
    }

    match state.dispatch.test_run(&centurion_id, &req.company_id, &req.message).await {
        Ok(outcome) => Ok(Json(TestResponse {
            ok: true,
            model: outcome.model,
            response: outcome.response,
            usage: TestUsage { tokens_in: outcome.usage.tokens_in, tokens_out: outcome.usage.tokens_out },
        })),
        Err(e) => {
            warn!(centurion_id, error = %e, "POST /centurions/{{id}}/test failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TestErrorBody { ok: false, error: e.to_string() }),
            ))
        }
    }
}
