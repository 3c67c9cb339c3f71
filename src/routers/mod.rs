//! HTTP endpoint layer.

pub mod error;
pub mod health;
pub mod openai;
