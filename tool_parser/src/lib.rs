//! Function-call bridge between OpenAI-style tool declarations and the
//! in-prompt tool format Qwen-family models are fine-tuned on.
//!
//! Outbound, [`render_tool_instructions`] turns a `tools` list into the system
//! prompt block the model recognises. Inbound, a [`ToolParser`] scans generated
//! text for `<tool_call>` blocks and [`extract_tool_call`] applies the
//! best-effort policy: a well-formed invocation becomes one [`ToolCall`],
//! anything else stays ordinary assistant text.

pub mod errors;
pub mod parsers;
pub mod render;
pub mod traits;
pub mod types;

pub use errors::{ParserError, ParserResult};
pub use parsers::QwenParser;
pub use render::{render_tool_call, render_tool_instructions, to_python_json};
pub use traits::ToolParser;
pub use types::{extract_tool_call, FunctionCall, ParsedOutput, ToolCall};
