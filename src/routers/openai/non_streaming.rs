//! Materialized `chat.completion` responses.

use std::sync::Arc;

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use openai_protocol::{
    ChatChoice, ChatCompletionMessage, ChatCompletionResponse, FinishReason,
    FunctionCallResponse, Role, ToolCall,
};
use serde_json::Value;
use tool_parser::{extract_tool_call, ParsedOutput, ToolParser};
use tracing::info;

use super::chat::CompletionMeta;
use crate::{
    app_context::AppContext,
    core::{GenerationRequest, GenerationSession, SlotPermit},
    observability::metrics::{metrics_labels, Metrics},
    routers::error::ApiError,
};

pub(super) async fn respond(
    ctx: &Arc<AppContext>,
    meta: CompletionMeta,
    request: &GenerationRequest,
    session: GenerationSession,
    permit: SlotPermit,
) -> Result<Response, ApiError> {
    let completion = session.complete(permit).await?;
    let (message, finish_reason) =
        assemble_message(ctx.tool_parser.as_ref(), request, completion.text, completion.finish)?;

    let response = ChatCompletionResponse {
        id: meta.id,
        object: "chat.completion".to_string(),
        created: meta.created,
        model: meta.model,
        choices: vec![ChatChoice {
            index: 0,
            message,
            finish_reason,
        }],
        usage: completion.usage,
        system_fingerprint: None,
    };
    if ctx.config.logging.log_payloads {
        info!(
            response = %serde_json::to_string(&response).unwrap_or_default(),
            "Chat completion response"
        );
    }
    Ok(Json(response).into_response())
}

/// Turn the final text into the assistant message: a tool call when the
/// model made one, coerced JSON when `response_format` asked for it, plain
/// text otherwise.
fn assemble_message(
    parser: &dyn ToolParser,
    request: &GenerationRequest,
    text: String,
    finish: FinishReason,
) -> Result<(ChatCompletionMessage, FinishReason), ApiError> {
    if request.parse_tool_calls() {
        match extract_tool_call(parser, &text, request.tools()) {
            ParsedOutput::ToolCall { content, call } => {
                Metrics::record_tool_call(metrics_labels::TOOL_CALL_PARSED);
                let function = FunctionCallResponse {
                    name: call.function.name,
                    arguments: call.function.arguments,
                };
                let legacy_mirror = request.legacy_functions().then(|| function.clone());
                let message = ChatCompletionMessage {
                    role: Role::Assistant,
                    content,
                    tool_calls: Some(vec![ToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                        tool_type: "function".to_string(),
                        function,
                    }]),
                    function_call: legacy_mirror,
                };
                return Ok((message, FinishReason::ToolCalls));
            }
            ParsedOutput::Text(_) => {
                Metrics::record_tool_call(metrics_labels::TOOL_CALL_TEXT);
            }
        }
    }

    let content = if request.json_response() {
        coerce_json(&text)?
    } else {
        text
    };
    Ok((
        ChatCompletionMessage {
            role: Role::Assistant,
            content: Some(content),
            tool_calls: None,
            function_call: None,
        },
        finish,
    ))
}

/// Strip markdown fences and a leading `json` tag, then re-serialize compactly.
fn coerce_json(text: &str) -> Result<String, ApiError> {
    let mut body = text.trim().to_string();
    if body.starts_with("```") {
        let mut lines: Vec<&str> = body.lines().skip(1).collect();
        if lines.last().is_some_and(|l| l.trim_start().starts_with("```")) {
            lines.pop();
        }
        body = lines.join("\n");
    }
    let body = body.trim();
    let body = body.strip_prefix("json").unwrap_or(body).trim();

    let value: Value =
        serde_json::from_str(body).map_err(|e| ApiError::InvalidJsonResponse(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| ApiError::InvalidJsonResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use openai_protocol::ChatCompletionRequest;
    use serde_json::json;
    use tool_parser::QwenParser;

    use super::*;
    use crate::config::{LimitsConfig, SamplingDefaults};

    fn request(body: Value) -> GenerationRequest {
        let wire: ChatCompletionRequest = serde_json::from_value(body).unwrap();
        GenerationRequest::from_chat(
            wire,
            "m",
            &SamplingDefaults::default(),
            &LimitsConfig::default(),
        )
        .unwrap()
    }

    fn with_tools(extra: Value) -> GenerationRequest {
        let mut body = json!({
            "messages": [{"role": "user", "content": "Weather in Paris?"}],
        });
        body.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        request(body)
    }

    const CALL: &str = "<tool_call>\n{\"name\": \"get_weather\", \"arguments\": {\"city\": \"Paris\"}}\n</tool_call>";

    #[test]
    fn test_tool_call_becomes_structured() {
        let request = with_tools(json!({
            "tools": [{"type": "function", "function": {"name": "get_weather"}}]
        }));
        let (message, finish) =
            assemble_message(&QwenParser::new(), &request, CALL.to_string(), FinishReason::Stop)
                .unwrap();
        assert_eq!(finish, FinishReason::ToolCalls);
        assert!(message.content.is_none());
        let calls = message.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"city":"Paris"}"#);
        assert!(calls[0].id.starts_with("call_"));
        assert!(message.function_call.is_none());
    }

    #[test]
    fn test_legacy_functions_get_mirror() {
        let request = with_tools(json!({"functions": [{"name": "get_weather"}]}));
        let (message, _) =
            assemble_message(&QwenParser::new(), &request, CALL.to_string(), FinishReason::Stop)
                .unwrap();
        assert_eq!(message.function_call.unwrap().name, "get_weather");
    }

    #[test]
    fn test_malformed_call_is_text() {
        let request = with_tools(json!({
            "tools": [{"type": "function", "function": {"name": "get_weather"}}]
        }));
        let raw = "<tool_call>\n{\"name\": \"get_weather\", \"arguments\": \n</tool_call>";
        let (message, finish) =
            assemble_message(&QwenParser::new(), &request, raw.to_string(), FinishReason::Stop)
                .unwrap();
        assert_eq!(finish, FinishReason::Stop);
        assert_eq!(message.content.as_deref(), Some(raw));
        assert!(message.tool_calls.is_none());
    }

    #[test]
    fn test_tool_choice_none_skips_parsing() {
        let request = with_tools(json!({
            "tools": [{"type": "function", "function": {"name": "get_weather"}}],
            "tool_choice": "none"
        }));
        let (message, finish) =
            assemble_message(&QwenParser::new(), &request, CALL.to_string(), FinishReason::Stop)
                .unwrap();
        assert_eq!(finish, FinishReason::Stop);
        assert_eq!(message.content.as_deref(), Some(CALL));
    }

    #[test]
    fn test_coerce_json_strips_fences() {
        assert_eq!(
            coerce_json("```json\n{\"a\": 1,\n \"b\": [1, 2]}\n```").unwrap(),
            r#"{"a":1,"b":[1,2]}"#
        );
        assert_eq!(coerce_json("json {\"a\": true}").unwrap(), r#"{"a":true}"#);
        assert_eq!(coerce_json("  {\"z\": 1, \"a\": 2} ").unwrap(), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn test_coerce_json_rejects_prose() {
        let err = coerce_json("Sure! Here is the JSON you asked for.").unwrap_err();
        assert_eq!(err.code(), "invalid_json_response");
    }

    #[test]
    fn test_json_mode_applies_to_text() {
        let request = request(json!({
            "messages": [{"role": "user", "content": "Give me JSON"}],
            "response_format": {"type": "json_object"}
        }));
        let (message, finish) = assemble_message(
            &QwenParser::new(),
            &request,
            "```\n{\"ok\": true}\n```".to_string(),
            FinishReason::Length,
        )
        .unwrap();
        assert_eq!(message.content.as_deref(), Some(r#"{"ok":true}"#));
        assert_eq!(finish, FinishReason::Length);
    }
}
