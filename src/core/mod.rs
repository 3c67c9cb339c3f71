//! Core generation machinery: request validation, the single inference slot,
//! generation sessions and the engine boundary.

pub mod engine;
pub mod error;
pub mod http_engine;
pub mod output;
pub mod request;
pub mod session;
pub mod slot;
pub mod stop;

pub use engine::{
    EngineChunk, EngineFinish, EngineOutput, EngineRequest, EngineStream, InferenceEngine,
};
pub use error::{EngineError, GenerationError, SlotError};
pub use http_engine::HttpEngine;
pub use output::{clean_generated_text, OutputFilter};
pub use request::{GenerationRequest, RequestError, SamplingParams};
pub use session::{Completion, GenerationSession, SessionState, SessionStream, StreamEvent};
pub use slot::{InferenceSlot, SlotPermit};
pub use stop::StopSequences;
