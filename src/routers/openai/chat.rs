//! `POST /v1/chat/completions`.
//!
//! Preprocessing (validation, prompt rendering, image resolution) runs to
//! completion before the inference slot is requested, so a bad request never
//! occupies the model.

use std::{sync::Arc, time::Instant};

use axum::{
    extract::State,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use llm_multimodal::{AsyncMultiModalTracker, ImageFrame};
use openai_protocol::ChatCompletionRequest;
use tracing::{debug, info, instrument, warn};

use super::{non_streaming, streaming};
use crate::{
    app_context::AppContext,
    chat::normalize,
    core::{EngineRequest, GenerationRequest, GenerationSession},
    observability::metrics::{metrics_labels, Metrics},
    routers::error::{extract_error_code_from_response, ApiError},
};

/// Identity shared by every object or chunk of one completion.
#[derive(Debug, Clone)]
pub(crate) struct CompletionMeta {
    pub id: String,
    pub created: u64,
    pub model: String,
}

impl CompletionMeta {
    fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp().max(0) as u64,
            model: model.to_string(),
        }
    }
}

#[instrument(name = "chat_completions", skip_all)]
pub async fn chat_completions(State(ctx): State<Arc<AppContext>>, body: Bytes) -> Response {
    let started = Instant::now();
    let mut streaming = false;
    let response = match handle(&ctx, &body, &mut streaming).await {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                warn!(error = %e, code = e.code(), "Chat completion failed");
            } else {
                debug!(error = %e, code = e.code(), "Chat completion rejected");
            }
            e.into_response()
        }
    };

    let status = response.status();
    let outcome = if status.is_success() {
        metrics_labels::OUTCOME_SUCCESS
    } else if status.is_client_error() {
        metrics_labels::OUTCOME_CLIENT_ERROR
    } else {
        metrics_labels::OUTCOME_SERVER_ERROR
    };
    Metrics::record_request(metrics_labels::ENDPOINT_CHAT, streaming, outcome);
    debug!(
        status = status.as_u16(),
        error_code = extract_error_code_from_response(&response),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Chat completion handled"
    );
    response
}

async fn handle(ctx: &Arc<AppContext>, body: &[u8], streaming: &mut bool) -> Result<Response, ApiError> {
    let log_payloads = ctx.config.logging.log_payloads;
    if log_payloads {
        info!(body = %String::from_utf8_lossy(body), "Chat completion request");
    }

    let wire: ChatCompletionRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidBody(e.to_string()))?;
    *streaming = wire.is_stream();

    let request = GenerationRequest::from_chat(
        wire,
        &ctx.model_id,
        &ctx.config.sampling,
        &ctx.config.limits,
    )?;
    let prompt = normalize(
        request.messages(),
        request.tools(),
        ctx.config.images.max_images_per_request,
    )?;
    if log_payloads {
        if let Some(tools) = &prompt.tool_instructions {
            info!(tools = %tools, "Rendered tool definitions");
        }
    }

    let images = resolve_images(ctx, &prompt.image_urls).await?;
    let engine_request = EngineRequest {
        prompt: prompt.text,
        images,
        sampling: request.sampling().clone(),
    };

    let meta = CompletionMeta::new(request.model());
    let session = GenerationSession::new(meta.id.clone(), Arc::clone(&ctx.engine), engine_request);
    let permit = ctx.slot.acquire().await?;

    if request.is_stream() {
        streaming::respond(ctx, meta, &request, session, permit).await
    } else {
        non_streaming::respond(ctx, meta, &request, session, permit).await
    }
}

/// Fetch and normalize every referenced image, in prompt order. Any single
/// failure fails the request.
async fn resolve_images(ctx: &AppContext, urls: &[String]) -> Result<Vec<ImageFrame>, ApiError> {
    if urls.is_empty() {
        return Ok(Vec::new());
    }

    let started = Instant::now();
    let mut tracker = AsyncMultiModalTracker::new(Arc::clone(&ctx.media_connector));
    for url in urls {
        tracker.push_image(url);
    }

    match tracker.finalize().await {
        Ok(frames) => {
            Metrics::record_images(metrics_labels::IMAGE_RESOLVED, frames.len(), started.elapsed());
            debug!(
                count = frames.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Resolved images"
            );
            Ok(frames)
        }
        Err(e) => {
            Metrics::record_images(metrics_labels::IMAGE_REJECTED, urls.len(), started.elapsed());
            warn!(error = %e, count = urls.len(), "Image resolution failed");
            Err(e.into())
        }
    }
}
