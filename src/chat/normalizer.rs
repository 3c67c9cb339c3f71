//! Chat messages to a single ChatML prompt plus the ordered image list.
//!
//! Pure transform. Every image part becomes an [`IMAGE_PLACEHOLDER`] at its
//! position in the conversation and its URL is queued in the same order, so
//! the n-th resolved image always fills the n-th placeholder. Tool
//! declarations are rendered into the system turn.
//!
//! [`IMAGE_PLACEHOLDER`]: super::template::IMAGE_PLACEHOLDER

use openai_protocol::{ChatMessage, ContentPart, MessageContent, Role, Tool};
use thiserror::Error;
use tool_parser::{render_tool_call, render_tool_instructions};

use super::template::{PromptWriter, DEFAULT_SYSTEM_PROMPT, DEFAULT_TOOL_SYSTEM_PROMPT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("messages[{index}] has neither text nor image content")]
    EmptyMessage { index: usize },

    #[error(
        "messages[{index}] contains an unsupported content part type; only 'text' and 'image_url' are accepted"
    )]
    UnsupportedPart { index: usize },

    #[error("messages[{index}] contains an image_url part with an empty url")]
    EmptyImageUrl { index: usize },

    #[error("Request contains {count} images; at most {limit} are allowed per request")]
    TooManyImages { count: usize, limit: usize },

    #[error("Failed to render tool definitions: {0}")]
    ToolRender(String),
}

impl NormalizeError {
    /// Request field the error refers to, for the error envelope.
    pub fn param(&self) -> Option<&'static str> {
        match self {
            NormalizeError::ToolRender(_) => Some("tools"),
            _ => Some("messages"),
        }
    }
}

/// Prompt text plus the image references it consumes, in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPrompt {
    pub text: String,
    pub image_urls: Vec<String>,
    /// The rendered tool block, kept for payload logging.
    pub tool_instructions: Option<String>,
}

/// Render `messages` and `tools` into a Qwen2.5-VL prompt.
///
/// Role order is not validated. An assistant turn may omit content when it
/// carries tool calls; every other message needs text or an image.
pub fn normalize(
    messages: &[ChatMessage],
    tools: &[Tool],
    max_images: usize,
) -> Result<NormalizedPrompt, NormalizeError> {
    validate(messages, max_images)?;

    let tool_instructions = if tools.is_empty() {
        None
    } else {
        Some(render_tool_instructions(tools).map_err(|e| NormalizeError::ToolRender(e.to_string()))?)
    };

    let mut writer = PromptWriter::new();
    let mut image_urls = Vec::new();

    let explicit_system = messages.first().is_some_and(|m| m.role == Role::System);
    if !explicit_system {
        let default = if tool_instructions.is_some() {
            DEFAULT_TOOL_SYSTEM_PROMPT
        } else {
            DEFAULT_SYSTEM_PROMPT
        };
        writer.open_turn(Role::System.as_str());
        writer.push_str(default);
        append_tools(&mut writer, tool_instructions.as_deref());
        writer.close_turn();
    }

    let mut in_tool_group = false;
    for (index, message) in messages.iter().enumerate() {
        if message.role == Role::Tool {
            if !in_tool_group {
                writer.open_turn(Role::User.as_str());
                in_tool_group = true;
            }
            if !writer.turn_is_empty() {
                writer.push_str("\n");
            }
            writer.push_str("<tool_response>\n");
            write_content(&mut writer, message.content.as_ref(), &mut image_urls);
            writer.push_str("\n</tool_response>");
            continue;
        }
        if in_tool_group {
            writer.close_turn();
            in_tool_group = false;
        }

        writer.open_turn(message.role.as_str());
        write_content(&mut writer, message.content.as_ref(), &mut image_urls);
        if index == 0 && explicit_system {
            append_tools(&mut writer, tool_instructions.as_deref());
        }
        if message.role == Role::Assistant {
            for call in message.tool_calls.iter().flatten() {
                let rendered = render_tool_call(&call.function.name, &call.function.arguments)
                    .map_err(|e| NormalizeError::ToolRender(e.to_string()))?;
                writer.push_block(&rendered);
            }
        }
        writer.close_turn();
    }

    Ok(NormalizedPrompt {
        text: writer.finish(),
        image_urls,
        tool_instructions,
    })
}

fn validate(messages: &[ChatMessage], max_images: usize) -> Result<(), NormalizeError> {
    let mut images = 0usize;
    for (index, message) in messages.iter().enumerate() {
        let has_tool_calls = message.role == Role::Assistant
            && message.tool_calls.as_ref().is_some_and(|c| !c.is_empty());

        let has_content = match &message.content {
            None => false,
            Some(MessageContent::Text(text)) => !text.is_empty(),
            Some(MessageContent::Parts(parts)) => {
                for part in parts {
                    match part {
                        ContentPart::Text { .. } => {}
                        ContentPart::ImageUrl { image_url } => {
                            if image_url.url.trim().is_empty() {
                                return Err(NormalizeError::EmptyImageUrl { index });
                            }
                            images += 1;
                        }
                        ContentPart::Unsupported => {
                            return Err(NormalizeError::UnsupportedPart { index });
                        }
                    }
                }
                parts.iter().any(|part| match part {
                    ContentPart::Text { text } => !text.is_empty(),
                    _ => true,
                })
            }
        };

        if !has_content && !has_tool_calls {
            return Err(NormalizeError::EmptyMessage { index });
        }
    }

    if images > max_images {
        return Err(NormalizeError::TooManyImages {
            count: images,
            limit: max_images,
        });
    }
    Ok(())
}

fn append_tools(writer: &mut PromptWriter, tool_instructions: Option<&str>) {
    if let Some(instructions) = tool_instructions {
        writer.push_str("\n\n");
        writer.push_str(instructions);
    }
}

fn write_content(
    writer: &mut PromptWriter,
    content: Option<&MessageContent>,
    image_urls: &mut Vec<String>,
) {
    match content {
        None => {}
        Some(MessageContent::Text(text)) => writer.push_str(text),
        Some(MessageContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => writer.push_str(text),
                    ContentPart::ImageUrl { image_url } => {
                        writer.push_image();
                        image_urls.push(image_url.url.trim().to_string());
                    }
                    // rejected by validate()
                    ContentPart::Unsupported => {}
                }
            }
        }
    }
}
