//! Router assembly and the HTTP server loop.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header::CONTENT_TYPE, HeaderName, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, warn};

use crate::{
    app_context::AppContext,
    middleware::require_api_key,
    routers::{
        error::create_error,
        health::health,
        openai::{chat_completions, list_models},
    },
};

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let body_limit = ctx.config.limits.max_request_body_bytes;
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let v1 = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&ctx),
            require_api_key,
        ));

    Router::new()
        .merge(v1)
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(ctx)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                    let request_id = req
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    info_span!(
                        "http_request",
                        method = %req.method(),
                        uri = %req.uri(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
}

async fn render_metrics(State(ctx): State<Arc<AppContext>>) -> Response {
    match &ctx.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => create_error(
            StatusCode::NOT_FOUND,
            "metrics_disabled",
            "Metrics recorder is not installed",
        ),
    }
}

/// Bind and serve until Ctrl-C or SIGTERM.
pub async fn serve(ctx: AppContext) -> anyhow::Result<()> {
    let addr = format!("{}:{}", ctx.config.host, ctx.config.port);
    let model_id = ctx.model_id.clone();
    let app = build_router(Arc::new(ctx));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, model = %model_id, "Serving chat completions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}
