//! `GET /health`. Not behind the API key.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;

use crate::app_context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_name: String,
    pub engine_reachable: bool,
    pub slot_busy: bool,
    pub queue_depth: usize,
    pub timestamp: String,
}

/// 200 when the engine answers its own health probe, 503 otherwise.
pub async fn health(State(ctx): State<Arc<AppContext>>) -> (StatusCode, Json<HealthResponse>) {
    let engine_reachable = match ctx.engine.health().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Inference engine health check failed");
            false
        }
    };
    let (status_code, status) = if engine_reachable {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            model_name: ctx.model_id.clone(),
            engine_reachable,
            slot_busy: ctx.slot.is_busy(),
            queue_depth: ctx.slot.queue_depth(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    )
}
