//! Qwen / Hermes tool call parser
//!
//! Parses tool calls from `<tool_call>...</tool_call>` blocks.
//!
//! # Format
//!
//! Qwen2.5 models output tool calls in the following format:
//! ```text
//! Let me check that for you.
//! <tool_call>
//! {"name": "get_weather", "arguments": {"city": "Paris"}}
//! </tool_call>
//! ```
//!
//! # Field Mapping
//! - `name` → `name`
//! - `arguments` (or `parameters`) → `arguments`, re-serialized as a JSON string

use serde_json::Value;

use crate::{
    errors::{ParserError, ParserResult},
    traits::ToolParser,
    types::{FunctionCall, ToolCall},
};

const TOOL_CALL_START: &str = "<tool_call>";
const TOOL_CALL_END: &str = "</tool_call>";

/// Qwen-family tool call parser
#[derive(Debug, Default, Clone, Copy)]
pub struct QwenParser;

impl QwenParser {
    pub fn new() -> Self {
        Self
    }

    /// Convert one block body into a ToolCall
    fn convert_tool_call(json_str: &str) -> ParserResult<ToolCall> {
        let value: Value = serde_json::from_str(json_str.trim())
            .map_err(|e| ParserError::ParsingFailed(format!("Invalid JSON: {}", e)))?;

        let name = value
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or(ParserError::MissingName)?;

        let arguments = match value.get("arguments").or_else(|| value.get("parameters")) {
            None | Some(Value::Null) => "{}".to_string(),
            Some(args @ Value::Object(_)) => args.to_string(),
            // Some fine-tunes double-encode the arguments
            Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
                Ok(args @ Value::Object(_)) => args.to_string(),
                Ok(_) => {
                    return Err(ParserError::InvalidArguments(
                        "arguments must encode a JSON object".into(),
                    ))
                }
                Err(e) => return Err(ParserError::InvalidArguments(e.to_string())),
            },
            Some(_) => {
                return Err(ParserError::InvalidArguments(
                    "arguments must be a JSON object".into(),
                ))
            }
        };

        Ok(ToolCall {
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        })
    }
}

impl ToolParser for QwenParser {
    fn parse_complete(&self, text: &str) -> ParserResult<(String, Vec<ToolCall>)> {
        if !self.has_tool_markers(text) {
            return Ok((text.trim().to_string(), vec![]));
        }

        let mut normal_text = String::new();
        let mut tool_calls = Vec::new();
        let mut remaining = text;

        while let Some(start_idx) = remaining.find(TOOL_CALL_START) {
            normal_text.push_str(&remaining[..start_idx]);

            let body_start = start_idx + TOOL_CALL_START.len();
            let body_len = remaining[body_start..]
                .find(TOOL_CALL_END)
                .ok_or(ParserError::Unterminated)?;

            tool_calls.push(Self::convert_tool_call(
                &remaining[body_start..body_start + body_len],
            )?);

            remaining = &remaining[body_start + body_len + TOOL_CALL_END.len()..];
        }

        normal_text.push_str(remaining);

        Ok((normal_text.trim().to_string(), tool_calls))
    }

    fn has_tool_markers(&self, text: &str) -> bool {
        text.contains(TOOL_CALL_START)
    }
}
