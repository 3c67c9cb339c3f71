//! OpenAI-compatible chat completions server for a locally hosted
//! Qwen2.5-VL model.
//!
//! A request flows through validation ([`core::request`]), prompt rendering
//! ([`chat`]), image resolution (`llm_multimodal`), the single inference slot
//! ([`core::slot`]) and a generation session ([`core::session`]) before the
//! response is assembled by [`routers::openai`].

pub mod app_context;
pub mod chat;
pub mod config;
pub mod core;
pub mod middleware;
pub mod observability;
pub mod routers;
pub mod server;
