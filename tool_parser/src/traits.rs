use crate::{errors::ParserResult, types::ToolCall};

/// Parses tool invocations out of complete model output.
pub trait ToolParser: Send + Sync {
    /// Split `text` into the ordinary text around the tool-call markers and
    /// the tool calls found inside them.
    ///
    /// Errors when the markers are present but their contents are not a
    /// well-formed invocation.
    fn parse_complete(&self, text: &str) -> ParserResult<(String, Vec<ToolCall>)>;

    /// Cheap check for the parser's start marker.
    fn has_tool_markers(&self, text: &str) -> bool;
}
