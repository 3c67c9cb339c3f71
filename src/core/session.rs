//! One inference pass, from slot admission to a finish reason.
//!
//! A session moves `Created -> Running -> {Completed, Cancelled, Failed}`.
//! It owns the slot permit while running and gives it back the moment it
//! leaves `Running`, including when the caller drops it mid-generation
//! (client disconnect), which is recorded as `Cancelled`.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::StreamExt;
use openai_protocol::{FinishReason, Usage};
use tracing::{debug, info, warn};

use super::{
    engine::{EngineChunk, EngineRequest, EngineStream, InferenceEngine},
    error::{EngineError, GenerationError},
    output::OutputFilter,
    slot::SlotPermit,
    stop::StopSequences,
};
use crate::observability::metrics::{metrics_labels, Metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    fn metrics_label(self) -> &'static str {
        match self {
            SessionState::Completed => metrics_labels::GENERATION_COMPLETED,
            SessionState::Cancelled => metrics_labels::GENERATION_CANCELLED,
            _ => metrics_labels::GENERATION_FAILED,
        }
    }
}

/// Materialized result of a non-streamed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish: FinishReason,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Cleaned text, never empty.
    Delta(String),
    /// Always the last event of a successful stream.
    Finished {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

pub struct GenerationSession {
    id: String,
    engine: Arc<dyn InferenceEngine>,
    request: EngineRequest,
    state: SessionState,
    streaming: bool,
    permit: Option<SlotPermit>,
    started_at: Option<Instant>,
}

impl GenerationSession {
    pub fn new(id: impl Into<String>, engine: Arc<dyn InferenceEngine>, request: EngineRequest) -> Self {
        Self {
            id: id.into(),
            engine,
            request,
            state: SessionState::Created,
            streaming: false,
            permit: None,
            started_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run to completion and return the whole cleaned text.
    pub async fn complete(mut self, permit: SlotPermit) -> Result<Completion, GenerationError> {
        let request = self.start(permit, false);
        let stop = StopSequences::new(&request.sampling.stop);

        match self.engine.generate(request).await {
            Ok(output) => {
                let mut filter = OutputFilter::new(stop);
                filter.push(&output.text);
                filter.finish();
                let finish = if filter.stopped() {
                    FinishReason::Stop
                } else {
                    output.finish.into()
                };
                self.finish(SessionState::Completed, output.usage);
                Ok(Completion {
                    text: filter.into_text(),
                    finish,
                    usage: output.usage,
                })
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Generation failed");
                self.finish(SessionState::Failed, None);
                Err(e.into())
            }
        }
    }

    /// Start a streamed generation.
    ///
    /// Fails here, before any output exists, when the engine rejects the
    /// request outright.
    pub async fn stream(mut self, permit: SlotPermit) -> Result<SessionStream, GenerationError> {
        let request = self.start(permit, true);
        let stop = StopSequences::new(&request.sampling.stop);

        match self.engine.generate_stream(request).await {
            Ok(inner) => Ok(SessionStream {
                inner,
                session: self,
                filter: OutputFilter::new(stop),
                queued_finish: None,
                done: false,
            }),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to start streamed generation");
                self.finish(SessionState::Failed, None);
                Err(e.into())
            }
        }
    }

    fn start(&mut self, permit: SlotPermit, streaming: bool) -> EngineRequest {
        self.permit = Some(permit);
        self.streaming = streaming;
        self.state = SessionState::Running;
        self.started_at = Some(Instant::now());
        debug!(
            session_id = %self.id,
            streaming,
            images = self.request.images.len(),
            prompt_bytes = self.request.prompt.len(),
            "Generation started"
        );
        std::mem::take(&mut self.request)
    }

    fn finish(&mut self, state: SessionState, usage: Option<Usage>) {
        self.state = state;
        // free the engine before the response is assembled
        self.permit.take();

        let elapsed = self.elapsed();
        Metrics::record_generation(state.metrics_label(), self.streaming, elapsed);
        if let Some(usage) = usage {
            Metrics::record_completion_tokens(usage.completion_tokens);
        }
        debug!(
            session_id = %self.id,
            state = ?state,
            elapsed_ms = elapsed.as_millis() as u64,
            "Generation finished"
        );
    }

    fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

impl Drop for GenerationSession {
    fn drop(&mut self) {
        if self.state == SessionState::Running {
            info!(
                session_id = %self.id,
                elapsed_ms = self.elapsed().as_millis() as u64,
                "Generation cancelled before completion"
            );
            self.finish(SessionState::Cancelled, None);
        }
    }
}

fn exhausted() -> EngineStream {
    Box::pin(futures::stream::empty::<Result<EngineChunk, EngineError>>())
}

/// Lazy, finite, non-restartable sequence of cleaned text fragments.
///
/// Pull-based: nothing is read from the engine until the consumer asks for
/// the next event, so a slow reader slows generation instead of growing a
/// buffer.
pub struct SessionStream {
    // declared first so it is dropped before the session frees the slot
    inner: EngineStream,
    session: GenerationSession,
    filter: OutputFilter,
    queued_finish: Option<StreamEvent>,
    done: bool,
}

impl SessionStream {
    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Next event, or `None` once the stream has ended. After an error no
    /// further events are produced.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, GenerationError>> {
        if self.done {
            return None;
        }
        if let Some(finish) = self.queued_finish.take() {
            return Some(Ok(self.complete_with(finish)));
        }

        loop {
            match self.inner.next().await {
                Some(Ok(EngineChunk::Text(fragment))) => {
                    let delta = self.filter.push(&fragment);
                    if self.filter.stopped() {
                        // the rest of the generation is not needed
                        self.inner = exhausted();
                        let finish = StreamEvent::Finished {
                            reason: FinishReason::Stop,
                            usage: None,
                        };
                        return Some(Ok(self.emit_then(delta, finish)));
                    }
                    if !delta.is_empty() {
                        return Some(Ok(StreamEvent::Delta(delta)));
                    }
                }
                Some(Ok(EngineChunk::Finished { finish, usage })) => {
                    let tail = self.filter.finish();
                    let reason = if self.filter.stopped() {
                        FinishReason::Stop
                    } else {
                        finish.into()
                    };
                    let finish = StreamEvent::Finished { reason, usage };
                    return Some(Ok(self.emit_then(tail, finish)));
                }
                Some(Err(e)) => {
                    warn!(session_id = %self.session.id, error = %e, "Streamed generation failed");
                    return Some(Err(self.fail(e.into())));
                }
                None => {
                    warn!(session_id = %self.session.id, "Engine stream closed without a finish reason");
                    return Some(Err(self.fail(GenerationError::Incomplete)));
                }
            }
        }
    }

    fn emit_then(&mut self, delta: String, finish: StreamEvent) -> StreamEvent {
        if delta.is_empty() {
            self.complete_with(finish)
        } else {
            self.queued_finish = Some(finish);
            StreamEvent::Delta(delta)
        }
    }

    fn complete_with(&mut self, finish: StreamEvent) -> StreamEvent {
        self.done = true;
        // the engine stream must be gone before the next request gets the slot
        self.inner = exhausted();
        let usage = match &finish {
            StreamEvent::Finished { usage, .. } => *usage,
            StreamEvent::Delta(_) => None,
        };
        self.session.finish(SessionState::Completed, usage);
        finish
    }

    fn fail(&mut self, error: GenerationError) -> GenerationError {
        self.done = true;
        self.inner = exhausted();
        self.session.finish(SessionState::Failed, None);
        error
    }
}
