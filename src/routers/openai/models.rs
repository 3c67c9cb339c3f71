//! `GET /v1/models`.

use std::sync::Arc;

use axum::{extract::State, Json};
use openai_protocol::{ModelCapabilities, ModelCard, ModelList};

use crate::{
    app_context::AppContext,
    observability::metrics::{metrics_labels, Metrics},
};

/// Advertised creation time of the served checkpoints.
const MODEL_CREATED: u64 = 1_709_251_200;
const MODEL_OWNER: &str = "Qwen";

pub async fn list_models(State(ctx): State<Arc<AppContext>>) -> Json<ModelList> {
    Metrics::record_request(
        metrics_labels::ENDPOINT_MODELS,
        false,
        metrics_labels::OUTCOME_SUCCESS,
    );
    Json(ModelList::new(vec![model_card(&ctx)]))
}

fn model_card(ctx: &AppContext) -> ModelCard {
    ModelCard::new(ctx.model_id.clone(), MODEL_OWNER, MODEL_CREATED)
        .with_capabilities(ModelCapabilities {
            vision: true,
            chat: true,
            embeddings: false,
            text_completion: true,
        })
        .with_context_window(ctx.config.limits.context_window)
        .with_max_tokens(ctx.config.limits.max_tokens_ceiling)
}
