use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Shared Primitives
// ============================================================================

/// A value the API accepts either as a single string or as a list of strings
/// (`stop` is the main user).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StringOrArray {
    String(String),
    Array(Vec<String>),
}

impl StringOrArray {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrArray::String(s) => vec![s],
            StringOrArray::Array(v) => v,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StringOrArray::String(s) => s.is_empty(),
            StringOrArray::Array(v) => v.is_empty(),
        }
    }
}

/// Token accounting attached to a completion.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Why a completion stopped.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// A stop sequence or the model's end-of-turn token was produced.
    Stop,
    /// `max_tokens` was reached.
    Length,
    /// The model elected to call a function.
    ToolCalls,
    /// Generation failed after output had started streaming.
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Error => "error",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    /// Accepted for compatibility; treated like `json_object`.
    JsonSchema {
        #[serde(default)]
        json_schema: Option<Value>,
    },
}

// ============================================================================
// Tools
// ============================================================================

/// A callable function as declared by the client.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Function {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema describing the accepted arguments.
    pub parameters: Option<Value>,
    pub strict: Option<bool>,
}

/// A tool entry of the `tools` array. Only `function` tools exist today.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Tool {
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: Function,
}

fn default_tool_type() -> String {
    "function".to_string()
}

impl Tool {
    pub fn function(function: Function) -> Self {
        Self {
            tool_type: default_tool_type(),
            function,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FunctionName {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Function {
        #[serde(rename = "type")]
        tool_type: String,
        function: FunctionName,
    },
}

/// Legacy `function_call` request field: `"none"`, `"auto"` or `{"name": ...}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FunctionCallChoice {
    Mode(ToolChoiceMode),
    Named(FunctionName),
}

impl From<FunctionCallChoice> for ToolChoice {
    fn from(choice: FunctionCallChoice) -> Self {
        match choice {
            FunctionCallChoice::Mode(mode) => ToolChoice::Mode(mode),
            FunctionCallChoice::Named(function) => ToolChoice::Function {
                tool_type: default_tool_type(),
                function,
            },
        }
    }
}

/// Function name plus JSON-encoded arguments, as emitted in responses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FunctionCallResponse {
    pub name: String,
    /// Arguments serialized as a JSON string, per the wire contract.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: FunctionCallResponse,
}
