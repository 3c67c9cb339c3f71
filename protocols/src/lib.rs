//! OpenAI-compatible protocol definitions.
//!
//! Request and response types for the `/v1/chat/completions` and `/v1/models`
//! endpoints, shaped after the public Chat Completions API so that existing
//! clients can talk to a locally hosted vision-language model unchanged.

pub mod chat;
pub mod common;
pub mod error;
pub mod model_card;

pub use chat::{
    ChatChoice, ChatCompletionMessage, ChatCompletionRequest, ChatCompletionResponse,
    ChatCompletionStreamResponse, ChatMessage, ChatMessageDelta, ChatStreamChoice, ContentPart,
    ImageUrl, MessageContent, Role,
};
pub use common::{
    FinishReason, Function, FunctionCallChoice, FunctionCallResponse, FunctionName,
    ResponseFormat, StreamOptions, StringOrArray, Tool, ToolCall, ToolChoice, ToolChoiceMode,
    Usage,
};
pub use error::{ErrorDetail, ErrorResponse};
pub use model_card::{ModelCapabilities, ModelCard, ModelList};
