//! OpenAI-compatible `/v1` routes.

pub mod chat;
pub mod models;
mod non_streaming;
mod streaming;

pub use chat::chat_completions;
pub use models::list_models;
