use openai_protocol::common::Tool;
use tracing::warn;

use crate::traits::ToolParser;

/// Function name plus arguments serialized as a JSON object string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool invocation recovered from model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Outcome of scanning a finished completion for a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedOutput {
    /// Plain assistant text (no invocation, or one that failed to parse).
    Text(String),
    /// A well-formed invocation, with any prose the model wrote around it.
    ToolCall {
        content: Option<String>,
        call: ToolCall,
    },
}

/// Best-effort extraction of a single tool call from `text`.
///
/// Never fails: near-miss syntax, or a call to a function missing from
/// `tools`, is surfaced as ordinary text with a warning, so an otherwise
/// useful completion is not thrown away. Only the first invocation is
/// returned; later ones are logged and dropped.
pub fn extract_tool_call(parser: &dyn ToolParser, text: &str, tools: &[Tool]) -> ParsedOutput {
    if !parser.has_tool_markers(text) {
        return ParsedOutput::Text(text.to_string());
    }

    match parser.parse_complete(text) {
        Ok((normal_text, calls)) => {
            let total = calls.len();
            let Some(call) = calls.into_iter().next() else {
                warn!("Tool call markers present but no invocation parsed; returning raw text");
                return ParsedOutput::Text(text.to_string());
            };
            if !tools.iter().any(|t| t.function.name == call.function.name) {
                warn!(
                    name = %call.function.name,
                    "Model called a function that was not offered; returning raw text"
                );
                return ParsedOutput::Text(text.to_string());
            }
            if total > 1 {
                warn!(
                    dropped = total - 1,
                    kept = %call.function.name,
                    "Model emitted several tool calls; only the first is returned"
                );
            }
            let content = (!normal_text.trim().is_empty()).then_some(normal_text);
            ParsedOutput::ToolCall { content, call }
        }
        Err(e) => {
            warn!(error = %e, "Malformed tool call in model output; returning it as text");
            ParsedOutput::Text(text.to_string())
        }
    }
}
