use std::time::Duration;

use thiserror::Error;

/// Failures reported by (or while talking to) the inference engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Inference engine unreachable: {0}")]
    Unavailable(String),

    #[error("Inference engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Generation aborted by the engine: {0}")]
    Aborted(String),

    #[error("Malformed engine response: {0}")]
    Protocol(String),

    #[error("Engine stream ended without a finish reason")]
    Truncated,

    #[error("Inference engine sent nothing for {0:?}")]
    Stalled(Duration),
}

/// Failure of one generation session. Partial output is discarded.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Engine stopped producing output before reporting a finish reason")]
    Incomplete,
}

/// Admission to the inference slot was refused.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error("Inference queue is full ({waiting} requests waiting, limit {limit})")]
    QueueFull { waiting: usize, limit: usize },

    #[error("Inference slot is closed")]
    Closed,
}
