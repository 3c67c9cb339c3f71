//! Server-sent `chat.completion.chunk` streams.
//!
//! A producer task pulls events from the [`SessionStream`] and pushes SSE
//! frames into a bounded channel. A full channel parks the producer, which
//! parks the engine stream; a dropped receiver (client gone) ends the task,
//! which drops the session and frees the inference slot.

use std::{io, sync::Arc};

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use openai_protocol::{
    ChatCompletionStreamResponse, ChatMessageDelta, ChatStreamChoice, FinishReason, Role, Usage,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::chat::CompletionMeta;
use crate::{
    app_context::AppContext,
    core::{GenerationError, GenerationRequest, GenerationSession, SessionStream, SlotPermit, StreamEvent},
    routers::error::{self as router_error, ApiError},
};

type FrameSender = mpsc::Sender<Result<Bytes, io::Error>>;

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

pub(super) async fn respond(
    ctx: &Arc<AppContext>,
    meta: CompletionMeta,
    request: &GenerationRequest,
    session: GenerationSession,
    permit: SlotPermit,
) -> Result<Response, ApiError> {
    // engine rejections before the first token still get a plain error response
    let stream = session.stream(permit).await?;

    let (tx, rx) = mpsc::channel(ctx.config.limits.stream_buffer.max(1));
    let producer = ChunkProducer {
        meta,
        include_usage: request.include_usage(),
        log_payloads: ctx.config.logging.log_payloads,
        tx,
    };
    tokio::spawn(producer.run(stream));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|e| {
            error!("Failed to build streaming response: {}", e);
            router_error::internal_error("response_build_failed", "Failed to build response")
        }))
}

struct ChunkProducer {
    meta: CompletionMeta,
    include_usage: bool,
    log_payloads: bool,
    tx: FrameSender,
}

impl ChunkProducer {
    async fn run(self, mut stream: SessionStream) {
        let session_id = stream.session_id().to_string();
        let mut transcript = String::new();

        let role = ChatMessageDelta {
            role: Some(Role::Assistant),
            content: Some(String::new()),
        };
        if !self.send_chunk(role, None).await {
            return;
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = self.tx.closed() => {
                    info!(session_id = %session_id, "Client disconnected, cancelling generation");
                    return;
                }
                event = stream.next_event() => event,
            };

            match event {
                Some(Ok(StreamEvent::Delta(text))) => {
                    if self.log_payloads {
                        transcript.push_str(&text);
                    }
                    let delta = ChatMessageDelta {
                        role: None,
                        content: Some(text),
                    };
                    if !self.send_chunk(delta, None).await {
                        info!(session_id = %session_id, "Client disconnected, cancelling generation");
                        return;
                    }
                }
                Some(Ok(StreamEvent::Finished { reason, usage })) => {
                    if self.log_payloads {
                        info!(session_id = %session_id, response = %transcript, "Streamed chat completion");
                    }
                    self.finish(reason, usage).await;
                    return;
                }
                Some(Err(e)) => {
                    self.fail(&e).await;
                    return;
                }
                None => {
                    // next_event only yields None after a terminal event
                    warn!(session_id = %session_id, "Session stream ended without a terminal event");
                    self.send_raw(Bytes::from_static(DONE_FRAME)).await;
                    return;
                }
            }
        }
    }

    async fn finish(&self, reason: FinishReason, usage: Option<Usage>) {
        if !self.send_chunk(ChatMessageDelta::default(), Some(reason)).await {
            return;
        }
        if self.include_usage {
            if let Some(usage) = usage {
                let chunk = ChatCompletionStreamResponse {
                    usage: Some(usage),
                    ..self.chunk(Vec::new())
                };
                if !self.send_json(&chunk).await {
                    return;
                }
            }
        }
        self.send_raw(Bytes::from_static(DONE_FRAME)).await;
        debug!(id = %self.meta.id, finish_reason = %reason, "Stream completed");
    }

    /// Error frame, then a chunk finishing with `error`, then `[DONE]`.
    async fn fail(&self, e: &GenerationError) {
        warn!(id = %self.meta.id, error = %e, "Stream failed after output started");
        let body = router_error::error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            router_error::GENERATION_ERROR_CODE,
            e.to_string(),
            None,
        );
        if !self.send_json(&body).await {
            return;
        }
        if !self
            .send_chunk(ChatMessageDelta::default(), Some(FinishReason::Error))
            .await
        {
            return;
        }
        self.send_raw(Bytes::from_static(DONE_FRAME)).await;
    }

    fn chunk(&self, choices: Vec<ChatStreamChoice>) -> ChatCompletionStreamResponse {
        ChatCompletionStreamResponse {
            id: self.meta.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.meta.created,
            model: self.meta.model.clone(),
            choices,
            usage: None,
        }
    }

    async fn send_chunk(&self, delta: ChatMessageDelta, finish_reason: Option<FinishReason>) -> bool {
        let chunk = self.chunk(vec![ChatStreamChoice {
            index: 0,
            delta,
            finish_reason,
        }]);
        self.send_json(&chunk).await
    }

    async fn send_json<T: Serialize>(&self, data: &T) -> bool {
        let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
        self.send_raw(Bytes::from(format!("data: {json}\n\n"))).await
    }

    async fn send_raw(&self, frame: Bytes) -> bool {
        self.tx.send(Ok(frame)).await.is_ok()
    }
}
