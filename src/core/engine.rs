//! Boundary to the inference engine.
//!
//! Weight loading, quantized kernels and GPU memory all live behind
//! [`InferenceEngine`]; this crate only hands it a rendered prompt, the
//! normalized images and sampling parameters.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use llm_multimodal::ImageFrame;
use openai_protocol::{FinishReason, Usage};

use super::{error::EngineError, request::SamplingParams};

/// One inference pass as the engine sees it.
#[derive(Debug, Clone, Default)]
pub struct EngineRequest {
    pub prompt: String,
    /// In prompt order, one per image placeholder.
    pub images: Vec<ImageFrame>,
    pub sampling: SamplingParams,
}

/// Why the engine stopped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFinish {
    /// End-of-turn token or a stop sequence.
    Stop,
    /// `max_tokens` reached.
    Length,
}

impl From<EngineFinish> for FinishReason {
    fn from(finish: EngineFinish) -> Self {
        match finish {
            EngineFinish::Stop => FinishReason::Stop,
            EngineFinish::Length => FinishReason::Length,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub text: String,
    pub finish: EngineFinish,
    pub usage: Option<Usage>,
}

/// Incremental engine output. A well-formed stream is zero or more `Text`
/// chunks followed by exactly one `Finished`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineChunk {
    Text(String),
    Finished {
        finish: EngineFinish,
        usage: Option<Usage>,
    },
}

/// Dropping the stream abandons the generation.
pub type EngineStream = Pin<Box<dyn Stream<Item = Result<EngineChunk, EngineError>> + Send>>;

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Id of the model the engine serves.
    fn model_id(&self) -> &str;

    async fn generate(&self, request: EngineRequest) -> Result<EngineOutput, EngineError>;

    async fn generate_stream(&self, request: EngineRequest) -> Result<EngineStream, EngineError>;

    /// Cheap liveness probe.
    async fn health(&self) -> Result<(), EngineError>;
}
