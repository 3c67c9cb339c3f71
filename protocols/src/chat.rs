use serde::{Deserialize, Serialize};

use super::common::*;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "developer")]
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ImageUrl {
    /// `data:image/...;base64,...` or an `http(s)` URL.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One element of a multi-part message content array.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    /// Any part type this server does not understand (audio, files, ...).
    /// Kept so the request still parses and the normalizer can reject it
    /// with a precise message.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    pub name: Option<String>,
    /// Tool calls made by a previous assistant turn.
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For `tool` messages: the call this result answers.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Parts(parts)),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

// ============================================================================
// Request
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// Model to use. Optional here: an empty value means "the served model".
    #[serde(default)]
    pub model: String,

    pub messages: Vec<ChatMessage>,

    /// What sampling temperature to use, between 0 and 2
    pub temperature: Option<f32>,

    /// An alternative to sampling with temperature (nucleus sampling)
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate
    pub max_tokens: Option<u32>,

    /// Newer spelling of `max_tokens`; takes precedence when both are set
    pub max_completion_tokens: Option<u32>,

    /// Up to 4 sequences where the API will stop generating further tokens
    pub stop: Option<StringOrArray>,

    /// Best-effort deterministic sampling seed
    pub seed: Option<i64>,

    /// How many choices to generate; only 1 is supported
    pub n: Option<u32>,

    /// Whether to stream back partial progress
    #[serde(default)]
    pub stream: bool,

    pub stream_options: Option<StreamOptions>,

    pub tools: Option<Vec<Tool>>,

    pub tool_choice: Option<ToolChoice>,

    /// Deprecated predecessor of `tools`
    pub functions: Option<Vec<Function>>,

    /// Deprecated predecessor of `tool_choice`
    pub function_call: Option<FunctionCallChoice>,

    pub response_format: Option<ResponseFormat>,

    /// A unique identifier representing your end-user
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn requested_max_tokens(&self) -> Option<u32> {
        self.max_completion_tokens.or(self.max_tokens)
    }

    /// True when the request declares any callable tool, through either the
    /// current `tools` field or the legacy `functions` field.
    pub fn declares_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
            || self.functions.as_ref().is_some_and(|f| !f.is_empty())
    }

    pub fn uses_legacy_functions(&self) -> bool {
        !self.tools.as_ref().is_some_and(|t| !t.is_empty())
            && self.functions.as_ref().is_some_and(|f| !f.is_empty())
    }

    pub fn include_usage(&self) -> bool {
        self.stream_options
            .as_ref()
            .is_some_and(|opts| opts.include_usage)
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatCompletionMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Mirror of the first tool call for clients still on `functions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallResponse>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatCompletionMessage,
    pub finish_reason: FinishReason,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String, // "chat.completion"
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
    pub system_fingerprint: Option<String>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatMessageDelta {
    pub role: Option<Role>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatStreamChoice {
    pub index: u32,
    pub delta: ChatMessageDelta,
    pub finish_reason: Option<FinishReason>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatCompletionStreamResponse {
    pub id: String,
    pub object: String, // "chat.completion.chunk"
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatStreamChoice>,
    pub usage: Option<Usage>,
}
