//! Shared fixtures: a scripted engine and helpers for driving the router
//! in-process.
#![allow(dead_code)]

use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{header::CONTENT_TYPE, StatusCode},
    response::Response,
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use futures::stream;
use http_body_util::BodyExt;
use openai_protocol::Usage;
use parking_lot::Mutex;
use serde_json::Value;
use tower::ServiceExt;
use vlm_gateway::{
    app_context::{media_config, AppContext},
    config::ServerConfig,
    core::{
        EngineChunk, EngineError, EngineFinish, EngineOutput, EngineRequest, EngineStream,
        InferenceEngine,
    },
    server::build_router,
};

pub const MODEL_ID: &str = "Qwen/Qwen2.5-VL-7B-Instruct-AWQ";

/// How a [`MockEngine`] call ends.
#[derive(Debug, Clone)]
pub enum Ending {
    Finish(EngineFinish),
    /// Emit this error after all fragments.
    Fail(String),
    /// Close the stream without a finish reason.
    Truncate,
}

/// Scripted engine that plays back fixed fragments and records how it was
/// driven.
pub struct MockEngine {
    fragments: Vec<String>,
    ending: Ending,
    usage: Option<Usage>,
    delay: Duration,
    reject: Option<EngineError>,
    healthy: bool,

    calls: AtomicUsize,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    requests: Mutex<Vec<EngineRequest>>,
}

impl MockEngine {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ending: Ending::Finish(EngineFinish::Stop),
            usage: Some(Usage::new(12, fragments.len() as u32)),
            delay: Duration::ZERO,
            reject: None,
            healthy: true,
            calls: AtomicUsize::new(0),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    /// Pause before every fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every call before producing output.
    pub fn rejecting(mut self, error: EngineError) -> Self {
        self.reject = Some(error);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn text(&self) -> String {
        self.fragments.concat()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.prompt.clone()).collect()
    }

    fn begin(&self, request: EngineRequest) -> Result<RunGuard, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if let Some(e) = &self.reject {
            return Err(clone_error(e));
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        Ok(RunGuard {
            running: Arc::clone(&self.running),
            cancelled: Arc::clone(&self.cancelled),
            finished: false,
        })
    }
}

fn clone_error(e: &EngineError) -> EngineError {
    match e {
        EngineError::Unavailable(m) => EngineError::Unavailable(m.clone()),
        EngineError::Status { status, body } => EngineError::Status {
            status: *status,
            body: body.clone(),
        },
        EngineError::Aborted(m) => EngineError::Aborted(m.clone()),
        EngineError::Protocol(m) => EngineError::Protocol(m.clone()),
        EngineError::Truncated => EngineError::Truncated,
        EngineError::Stalled(d) => EngineError::Stalled(*d),
    }
}

/// Tracks one in-flight generation; counts a cancellation when dropped
/// before the script ran to its end.
struct RunGuard {
    running: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    finished: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        if !self.finished {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    fn model_id(&self) -> &str {
        MODEL_ID
    }

    async fn generate(&self, request: EngineRequest) -> Result<EngineOutput, EngineError> {
        let mut guard = self.begin(request)?;
        for _ in &self.fragments {
            tokio::time::sleep(self.delay).await;
        }
        guard.finished = true;
        match &self.ending {
            Ending::Finish(finish) => Ok(EngineOutput {
                text: self.text(),
                finish: *finish,
                usage: self.usage,
            }),
            Ending::Fail(message) => Err(EngineError::Aborted(message.clone())),
            Ending::Truncate => Err(EngineError::Truncated),
        }
    }

    async fn generate_stream(&self, request: EngineRequest) -> Result<EngineStream, EngineError> {
        let guard = self.begin(request)?;

        let mut script: Vec<Result<EngineChunk, EngineError>> = self
            .fragments
            .iter()
            .map(|f| Ok(EngineChunk::Text(f.clone())))
            .collect();
        match &self.ending {
            Ending::Finish(finish) => script.push(Ok(EngineChunk::Finished {
                finish: *finish,
                usage: self.usage,
            })),
            Ending::Fail(message) => script.push(Err(EngineError::Aborted(message.clone()))),
            Ending::Truncate => {}
        }

        let delay = self.delay;
        let state = (script.into_iter(), guard);
        Ok(Box::pin(stream::unfold(state, move |(mut script, mut guard)| async move {
            let item = script.next();
            match item {
                Some(item) => {
                    tokio::time::sleep(delay).await;
                    if script.as_slice().is_empty() {
                        guard.finished = true;
                    }
                    Some((item, (script, guard)))
                }
                None => {
                    guard.finished = true;
                    None
                }
            }
        })))
    }

    async fn health(&self) -> Result<(), EngineError> {
        if self.healthy {
            Ok(())
        } else {
            Err(EngineError::Unavailable("connection refused".into()))
        }
    }
}

// ============================================================================
// App helpers
// ============================================================================

pub fn test_config() -> ServerConfig {
    ServerConfig::default()
}

pub fn test_context(engine: Arc<MockEngine>, config: ServerConfig) -> Arc<AppContext> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("client");
    let media = llm_multimodal::MediaConnector::new(client, media_config(&config.images))
        .expect("media connector");
    Arc::new(AppContext::new(config, engine, media))
}

pub fn app(ctx: &Arc<AppContext>) -> Router {
    build_router(Arc::clone(ctx))
}

pub fn chat_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize")))
        .expect("request")
}

pub async fn post_chat(app: &Router, body: &Value) -> Response {
    app.clone().oneshot(chat_request(body)).await.expect("response")
}

pub async fn get(app: &Router, uri: &str) -> Response {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    app.clone().oneshot(req).await.expect("response")
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

pub async fn assert_error(response: Response, status: StatusCode, code: &str) -> Value {
    assert_eq!(response.status(), status);
    assert_eq!(
        response
            .headers()
            .get("x-error-code")
            .and_then(|v| v.to_str().ok()),
        Some(code)
    );
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], code);
    body
}

/// Payloads of every `data:` frame, in order.
pub async fn sse_frames(response: Response) -> Vec<String> {
    let body = String::from_utf8(body_bytes(response).await).expect("utf-8 stream");
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode png");
    out
}

pub fn png_data_url(width: u32, height: u32) -> String {
    format!(
        "data:image/png;base64,{}",
        BASE64_STANDARD.encode(png_bytes(width, height))
    )
}

/// Poll `cond` for up to two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
