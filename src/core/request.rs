//! Validated, immutable form of one chat completion request.

use openai_protocol::{
    ChatCompletionRequest, ChatMessage, ResponseFormat, Tool, ToolChoice, ToolChoiceMode,
};
use thiserror::Error;

use crate::config::{LimitsConfig, SamplingDefaults};

/// OpenAI accepts at most this many stop sequences.
const MAX_STOP_SEQUENCES: usize = 4;

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("Requested model '{requested}' is not served here; the current model is '{served}'")]
    ModelNotFound { requested: String, served: String },

    #[error("{message}")]
    Invalid {
        param: &'static str,
        message: String,
    },

    #[error("Tool calls are not supported with stream=true; disable streaming or remove tools")]
    UnsupportedStreamingToolCall,
}

fn invalid(param: &'static str, message: impl Into<String>) -> RequestError {
    RequestError::Invalid {
        param,
        message: message.into(),
    }
}

/// Sampling configuration handed to the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub seed: Option<u64>,
}

impl SamplingParams {
    pub fn from_defaults(defaults: &SamplingDefaults) -> Self {
        Self {
            temperature: defaults.temperature,
            top_p: defaults.top_p,
            max_tokens: defaults.max_tokens,
            stop: Vec::new(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    model: String,
    messages: Vec<ChatMessage>,
    tools: Vec<Tool>,
    parse_tool_calls: bool,
    legacy_functions: bool,
    sampling: SamplingParams,
    stream: bool,
    include_usage: bool,
    json_response: bool,
}

impl GenerationRequest {
    /// Validate a wire request against the served model and limits.
    ///
    /// Everything that can be rejected without touching images or the
    /// engine is rejected here.
    pub fn from_chat(
        request: ChatCompletionRequest,
        served_model: &str,
        defaults: &SamplingDefaults,
        limits: &LimitsConfig,
    ) -> Result<Self, RequestError> {
        let requested = request.model.trim();
        if !requested.is_empty() && requested != served_model {
            return Err(RequestError::ModelNotFound {
                requested: requested.to_string(),
                served: served_model.to_string(),
            });
        }

        if request.messages.is_empty() {
            return Err(invalid("messages", "messages must contain at least one message"));
        }
        if let Some(n) = request.n {
            if n != 1 {
                return Err(invalid("n", format!("only n=1 is supported, got {n}")));
            }
        }
        if request.stream && request.declares_tools() {
            return Err(RequestError::UnsupportedStreamingToolCall);
        }

        let sampling = build_sampling(&request, defaults, limits)?;
        let legacy_functions = request.uses_legacy_functions();
        let (tools, parse_tool_calls) = resolve_tools(&request)?;
        let json_response = !request.stream
            && matches!(
                request.response_format,
                Some(ResponseFormat::JsonObject) | Some(ResponseFormat::JsonSchema { .. })
            );
        let include_usage = request.include_usage();

        Ok(Self {
            model: served_model.to_string(),
            messages: request.messages,
            tools,
            parse_tool_calls,
            legacy_functions,
            sampling,
            stream: request.stream,
            include_usage,
            json_response,
        })
    }

    /// The served model id, echoed in responses.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Tools to render into the prompt, after `tool_choice` filtering.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Whether output should be scanned for a tool invocation.
    pub fn parse_tool_calls(&self) -> bool {
        self.parse_tool_calls
    }

    /// The client used the deprecated `functions` field.
    pub fn legacy_functions(&self) -> bool {
        self.legacy_functions
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn include_usage(&self) -> bool {
        self.include_usage
    }

    /// `response_format` asked for a JSON object.
    pub fn json_response(&self) -> bool {
        self.json_response
    }
}

fn build_sampling(
    request: &ChatCompletionRequest,
    defaults: &SamplingDefaults,
    limits: &LimitsConfig,
) -> Result<SamplingParams, RequestError> {
    let mut sampling = SamplingParams::from_defaults(defaults);

    if let Some(temperature) = request.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid(
                "temperature",
                format!("temperature must be between 0 and 2, got {temperature}"),
            ));
        }
        sampling.temperature = temperature;
    }

    if let Some(top_p) = request.top_p {
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(invalid(
                "top_p",
                format!("top_p must be greater than 0 and at most 1, got {top_p}"),
            ));
        }
        sampling.top_p = top_p;
    }

    if let Some(max_tokens) = request.requested_max_tokens() {
        if max_tokens == 0 || max_tokens > limits.max_tokens_ceiling {
            return Err(invalid(
                "max_tokens",
                format!(
                    "max_tokens must be between 1 and {}, got {max_tokens}",
                    limits.max_tokens_ceiling
                ),
            ));
        }
        sampling.max_tokens = max_tokens;
    } else {
        sampling.max_tokens = sampling.max_tokens.min(limits.max_tokens_ceiling);
    }

    if let Some(stop) = request.stop.clone() {
        let stop = stop.into_vec();
        if stop.len() > MAX_STOP_SEQUENCES {
            return Err(invalid(
                "stop",
                format!("at most {MAX_STOP_SEQUENCES} stop sequences are allowed"),
            ));
        }
        if stop.iter().any(String::is_empty) {
            return Err(invalid("stop", "stop sequences must not be empty"));
        }
        sampling.stop = stop;
    }

    if let Some(seed) = request.seed {
        let seed = u64::try_from(seed)
            .map_err(|_| invalid("seed", format!("seed must be non-negative, got {seed}")))?;
        sampling.seed = Some(seed);
    }

    Ok(sampling)
}

/// Merge `tools` and legacy `functions`, then apply `tool_choice`.
fn resolve_tools(request: &ChatCompletionRequest) -> Result<(Vec<Tool>, bool), RequestError> {
    let declared: Vec<Tool> = match (&request.tools, &request.functions) {
        (Some(tools), _) if !tools.is_empty() => tools.clone(),
        (_, Some(functions)) => functions.iter().cloned().map(Tool::function).collect(),
        _ => Vec::new(),
    };

    for (i, tool) in declared.iter().enumerate() {
        if tool.tool_type != "function" {
            return Err(invalid(
                "tools",
                format!("unsupported tool type '{}'", tool.tool_type),
            ));
        }
        if tool.function.name.trim().is_empty() {
            return Err(invalid("tools", "tool function name must not be empty"));
        }
        if declared[..i]
            .iter()
            .any(|t| t.function.name == tool.function.name)
        {
            return Err(invalid(
                "tools",
                format!("duplicate tool name '{}'", tool.function.name),
            ));
        }
    }

    let choice = request
        .tool_choice
        .clone()
        .or_else(|| request.function_call.clone().map(ToolChoice::from));

    match choice {
        Some(ToolChoice::Mode(ToolChoiceMode::None)) => Ok((Vec::new(), false)),
        Some(ToolChoice::Function { function, .. }) => {
            let selected: Vec<Tool> = declared
                .into_iter()
                .filter(|t| t.function.name == function.name)
                .collect();
            if selected.is_empty() {
                return Err(invalid(
                    "tool_choice",
                    format!("tool_choice names unknown function '{}'", function.name),
                ));
            }
            Ok((selected, true))
        }
        Some(ToolChoice::Mode(_)) | None => {
            let parse = !declared.is_empty();
            Ok((declared, parse))
        }
    }
}
