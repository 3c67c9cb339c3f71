//! Outbound half of the bridge: tool declarations rendered into the system
//! prompt block Qwen2.5 models were fine-tuned on.
//!
//! Rendering is deterministic and order-preserving. Tools appear in request
//! order, object keys keep their request order (`preserve_order`), and JSON
//! is written with Python `json.dumps` spacing to match the training data.
//! Identical `tools` lists therefore produce byte-identical instructions.

use std::io;

use openai_protocol::common::Tool;
use serde::{ser::Error as _, Serialize};
use serde_json::{ser::Formatter, Value};

const TOOLS_PREAMBLE: &str = "# Tools\n\n\
You may call one or more functions to assist with the user query.\n\n\
You are provided with function signatures within <tools></tools> XML tags:\n\
<tools>";

const TOOLS_POSTAMBLE: &str = "\n</tools>\n\n\
For each function call, return a json object with function name and arguments within <tool_call></tool_call> XML tags:\n\
<tool_call>\n\
{\"name\": <function-name>, \"arguments\": <args-json-object>}\n\
</tool_call>";

/// `", "` between items and `": "` after keys, like Python's default
/// `json.dumps` separators.
struct PythonFormatter;

impl Formatter for PythonFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serialize `value` with Python-style separators.
pub fn to_python_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, PythonFormatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(serde_json::Error::custom)
}

/// Render the `# Tools` instruction block for the system turn.
pub fn render_tool_instructions(tools: &[Tool]) -> serde_json::Result<String> {
    let mut out = String::from(TOOLS_PREAMBLE);
    for tool in tools {
        out.push('\n');
        out.push_str(&to_python_json(tool)?);
    }
    out.push_str(TOOLS_POSTAMBLE);
    Ok(out)
}

/// Render a previous assistant tool call back into prompt form.
///
/// `arguments` arrives as a JSON string on the wire; when it parses it is
/// embedded as an object, otherwise as the raw string.
pub fn render_tool_call(name: &str, arguments: &str) -> serde_json::Result<String> {
    let arguments = serde_json::from_str::<Value>(arguments)
        .unwrap_or_else(|_| Value::String(arguments.to_string()));
    let call = serde_json::json!({ "name": name, "arguments": arguments });
    Ok(format!("<tool_call>\n{}\n</tool_call>", to_python_json(&call)?))
}
