//! Request middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::{app_context::AppContext, routers::error::ApiError};

/// Static bearer-key check for `/v1/*`. A no-op when no key is configured.
pub async fn require_api_key(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = ctx.config.api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);

    match presented {
        Some(token) if keys_match(token, expected) => next.run(request).await,
        _ => {
            debug!(path = %request.uri().path(), "Rejected request with missing or invalid API key");
            ApiError::Unauthorized.into_response()
        }
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

fn keys_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer sk-local"), Some("sk-local"));
        assert_eq!(bearer_token("bearer   sk-local "), Some("sk-local"));
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("sk-local"), None);
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("sk-local", "sk-local"));
        assert!(!keys_match("sk-loca", "sk-local"));
        assert!(!keys_match("", "sk-local"));
    }
}
