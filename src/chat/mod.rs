//! Message Normalizer: chat messages to the model's prompt format.

pub mod normalizer;
pub mod template;

pub use normalizer::{normalize, NormalizeError, NormalizedPrompt};
