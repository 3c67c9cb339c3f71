//! OpenAI-style error responses.
//!
//! Every failure leaves the server as `{"error": {"type", "code", "message",
//! "param"}}` with the machine-readable code repeated in [`HEADER_X_ERROR_CODE`].

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use llm_multimodal::MediaConnectorError;
use openai_protocol::{ErrorDetail, ErrorResponse};
use thiserror::Error;

use crate::{
    chat::NormalizeError,
    core::{GenerationError, RequestError, SlotError},
};

pub const HEADER_X_ERROR_CODE: &str = "X-Error-Code";

pub const GENERATION_ERROR_CODE: &str = "generation_error";

/// Everything a chat completion request can fail with before (or instead
/// of) producing a response.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Image(#[from] MediaConnectorError),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Model output is not valid JSON: {0}")]
    InvalidJsonResponse(String),

    #[error("Missing or invalid API key")]
    Unauthorized,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_)
            | ApiError::Request(_)
            | ApiError::Normalize(_)
            | ApiError::InvalidJsonResponse(_) => StatusCode::BAD_REQUEST,
            ApiError::Image(e) => match e {
                MediaConnectorError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                MediaConnectorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                MediaConnectorError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
            ApiError::Slot(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidBody(_) => "invalid_request_body",
            ApiError::Request(RequestError::ModelNotFound { .. }) => "model_not_found",
            ApiError::Request(RequestError::Invalid { .. }) => "invalid_request",
            ApiError::Request(RequestError::UnsupportedStreamingToolCall) => {
                "unsupported_streaming_tool_call"
            }
            ApiError::Normalize(_) => "malformed_request",
            ApiError::Image(e) => match e {
                MediaConnectorError::TooLarge { .. } => "image_too_large",
                MediaConnectorError::Timeout(_) => "image_fetch_timeout",
                MediaConnectorError::Task(_) => "internal_error",
                _ => "image_fetch_error",
            },
            ApiError::Slot(SlotError::QueueFull { .. }) => "queue_full",
            ApiError::Slot(SlotError::Closed) => "slot_closed",
            ApiError::Generation(_) => GENERATION_ERROR_CODE,
            ApiError::InvalidJsonResponse(_) => "invalid_json_response",
            ApiError::Unauthorized => "invalid_api_key",
        }
    }

    pub fn param(&self) -> Option<&'static str> {
        match self {
            ApiError::Request(RequestError::ModelNotFound { .. }) => Some("model"),
            ApiError::Request(RequestError::Invalid { param, .. }) => Some(*param),
            ApiError::Request(RequestError::UnsupportedStreamingToolCall) => Some("stream"),
            ApiError::Normalize(e) => e.param(),
            ApiError::Image(_) => Some("messages"),
            ApiError::InvalidJsonResponse(_) => Some("response_format"),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        create_error_with_param(self.status(), self.code(), self.to_string(), self.param())
    }
}

pub fn internal_error(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::INTERNAL_SERVER_ERROR, code, message)
}

pub fn create_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> Response {
    create_error_with_param(status, code, message, None)
}

pub fn create_error_with_param(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    param: Option<&str>,
) -> Response {
    let code_str = code.into();

    let mut headers = HeaderMap::with_capacity(1);
    if let Ok(val) = HeaderValue::from_str(&code_str) {
        headers.insert(HEADER_X_ERROR_CODE, val);
    }

    (status, headers, Json(error_body(status, code_str, message, param))).into_response()
}

/// The error envelope on its own, for SSE error frames.
pub fn error_body(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    param: Option<&str>,
) -> ErrorResponse {
    ErrorResponse {
        error: ErrorDetail {
            error_type: status_code_to_str(status).to_string(),
            code: code.into(),
            message: message.into(),
            param: param.map(str::to_string),
        },
    }
}

fn status_code_to_str(status_code: StatusCode) -> &'static str {
    status_code
        .canonical_reason()
        .unwrap_or("Unknown Status Code")
}

pub fn extract_error_code_from_response<B>(response: &Response<B>) -> &str {
    response
        .headers()
        .get(HEADER_X_ERROR_CODE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
