//! [`InferenceEngine`] over a local SGLang runtime's native `/generate` API.

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use openai_protocol::Usage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    engine::{EngineChunk, EngineFinish, EngineOutput, EngineRequest, EngineStream, InferenceEngine},
    error::EngineError,
};

/// Upper bound on buffered, undelimited SSE bytes from the engine.
const MAX_SSE_BUFFER_SIZE: usize = 1024 * 1024;

/// Largest error body read back from the engine.
const MAX_ERROR_BODY: usize = 4096;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_data: Vec<String>,
    sampling_params: WireSamplingParams<'a>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireSamplingParams<'a> {
    temperature: f32,
    top_p: f32,
    max_new_tokens: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    sampling_seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    text: String,
    #[serde(default)]
    meta_info: Option<MetaInfo>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct MetaInfo {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    finish_reason: Option<WireFinishReason>,
}

#[derive(Debug, Deserialize)]
struct WireFinishReason {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
}

impl MetaInfo {
    fn usage(&self) -> Option<Usage> {
        match (self.prompt_tokens, self.completion_tokens) {
            (Some(prompt), Some(completion)) => Some(Usage::new(prompt, completion)),
            _ => None,
        }
    }

    /// `None` while generation is still running.
    fn finish(&self) -> Option<Result<EngineFinish, EngineError>> {
        let reason = self.finish_reason.as_ref()?;
        Some(match reason.kind.as_str() {
            "stop" => Ok(EngineFinish::Stop),
            "length" => Ok(EngineFinish::Length),
            "abort" => Err(EngineError::Aborted(
                reason
                    .message
                    .clone()
                    .unwrap_or_else(|| "request aborted".to_string()),
            )),
            other => {
                warn!(finish_reason = %other, "Unknown engine finish reason, treating as stop");
                Ok(EngineFinish::Stop)
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpEngine {
    client: Client,
    base_url: String,
    model_id: String,
    request_timeout: Duration,
    /// Longest gap allowed between two reads of a streamed reply.
    stream_idle_timeout: Duration,
}

impl HttpEngine {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        model_id: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_id: model_id.into(),
            request_timeout,
            stream_idle_timeout: request_timeout,
        }
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    fn body<'a>(request: &'a EngineRequest, stream: bool) -> GenerateBody<'a> {
        let image_data = request
            .images
            .iter()
            .map(|frame| {
                format!(
                    "data:image/png;base64,{}",
                    BASE64_STANDARD.encode(frame.png_bytes())
                )
            })
            .collect();
        GenerateBody {
            text: &request.prompt,
            image_data,
            sampling_params: WireSamplingParams {
                temperature: request.sampling.temperature,
                top_p: request.sampling.top_p,
                max_new_tokens: request.sampling.max_tokens,
                stop: &request.sampling.stop,
                sampling_seed: request.sampling.seed,
            },
            stream,
        }
    }

    async fn post(&self, request: &EngineRequest, stream: bool) -> Result<reqwest::Response, EngineError> {
        let url = format!("{}/generate", self.base_url);
        let mut builder = self.client.post(&url).json(&Self::body(request, stream));
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl InferenceEngine for HttpEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: EngineRequest) -> Result<EngineOutput, EngineError> {
        let response = self.post(&request, false).await?;
        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        if let Some(error) = reply.error {
            return Err(EngineError::Aborted(error.to_string()));
        }

        let meta = reply.meta_info.unwrap_or_default();
        let finish = meta
            .finish()
            .ok_or_else(|| EngineError::Protocol("reply carries no finish reason".to_string()))??;
        Ok(EngineOutput {
            text: reply.text,
            finish,
            usage: meta.usage(),
        })
    }

    async fn generate_stream(&self, request: EngineRequest) -> Result<EngineStream, EngineError> {
        let response = self.post(&request, true).await?;
        debug!(engine = %self.base_url, "Engine stream opened");
        Ok(sse_chunks(response.bytes_stream(), self.stream_idle_timeout))
    }

    async fn health(&self) -> Result<(), EngineError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(EngineError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            })
        }
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Turns SGLang's cumulative-text SSE frames into incremental chunks.
struct SseDecoder {
    buffer: Vec<u8>,
    /// Text already forwarded, to diff the next cumulative frame against.
    forwarded: String,
    warned_non_prefix: bool,
    finished: bool,
    ended: bool,
    pending: VecDeque<Result<EngineChunk, EngineError>>,
}

impl SseDecoder {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            forwarded: String::new(),
            warned_non_prefix: false,
            finished: false,
            ended: false,
            pending: VecDeque::new(),
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.process_frame(&frame[..pos]);
            if self.ended {
                return;
            }
        }
        if self.buffer.len() > MAX_SSE_BUFFER_SIZE {
            self.fail(EngineError::Protocol(format!(
                "SSE buffer exceeded maximum size ({MAX_SSE_BUFFER_SIZE} bytes)"
            )));
        }
    }

    /// The byte stream ended.
    fn close(&mut self) {
        if self.ended {
            return;
        }
        let rest = std::mem::take(&mut self.buffer);
        if !rest.iter().all(u8::is_ascii_whitespace) {
            self.process_frame(&rest);
        }
        if !self.ended {
            self.end_of_stream();
        }
    }

    fn process_frame(&mut self, frame: &[u8]) {
        let frame = String::from_utf8_lossy(frame);
        for line in frame.lines() {
            let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.end_of_stream();
                return;
            }
            match serde_json::from_str::<GenerateReply>(data) {
                Ok(reply) => self.process_reply(reply),
                Err(e) => self.fail(EngineError::Protocol(format!("invalid SSE payload: {e}"))),
            }
            if self.ended {
                return;
            }
        }
    }

    fn process_reply(&mut self, reply: GenerateReply) {
        if let Some(error) = reply.error {
            self.fail(EngineError::Aborted(error.to_string()));
            return;
        }

        let delta = match reply.text.strip_prefix(self.forwarded.as_str()) {
            Some(delta) => delta.to_string(),
            None => {
                if !self.warned_non_prefix {
                    warn!("Engine stream text is not cumulative; treating frames as increments");
                    self.warned_non_prefix = true;
                }
                reply.text.clone()
            }
        };
        if !delta.is_empty() {
            self.forwarded.push_str(&delta);
            self.pending.push_back(Ok(EngineChunk::Text(delta)));
        }

        let Some(meta) = reply.meta_info else {
            return;
        };
        match meta.finish() {
            Some(Ok(finish)) => {
                self.finished = true;
                self.pending.push_back(Ok(EngineChunk::Finished {
                    finish,
                    usage: meta.usage(),
                }));
            }
            Some(Err(e)) => self.fail(e),
            None => {}
        }
    }

    fn end_of_stream(&mut self) {
        if !self.finished {
            self.pending.push_back(Err(EngineError::Truncated));
        }
        self.ended = true;
    }

    fn fail(&mut self, error: EngineError) {
        self.pending.push_back(Err(error));
        self.ended = true;
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// A read that stays silent for `idle_timeout` fails the stream, so a stalled
/// engine cannot hold the inference slot forever.
fn sse_chunks<S>(body: S, idle_timeout: Duration) -> EngineStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = (Box::pin(body), SseDecoder::new());
    Box::pin(futures::stream::unfold(state, move |(mut body, mut decoder)| async move {
        loop {
            if let Some(item) = decoder.pending.pop_front() {
                return Some((item, (body, decoder)));
            }
            if decoder.ended || decoder.finished {
                return None;
            }
            match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(Ok(bytes))) => decoder.feed(&bytes),
                Ok(Some(Err(e))) => decoder.fail(EngineError::Unavailable(e.to_string())),
                Ok(None) => decoder.close(),
                Err(_) => {
                    warn!(idle_ms = idle_timeout.as_millis() as u64, "Engine stream stalled");
                    decoder.fail(EngineError::Stalled(idle_timeout));
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    const TEST_IDLE: Duration = Duration::from_secs(30);

    fn frames(parts: &[&str]) -> EngineStream {
        let owned: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        sse_chunks(stream::iter(owned), TEST_IDLE)
    }

    async fn collect(mut s: EngineStream) -> Vec<Result<EngineChunk, EngineError>> {
        let mut out = Vec::new();
        while let Some(item) = s.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_cumulative_frames_become_deltas() {
        let items = collect(frames(&[
            "data: {\"text\":\"Hel\",\"meta_info\":{}}\n\n",
            "data: {\"text\":\"Hello wor\"}\n\ndata: {\"text\":\"Hello world\",",
            "\"meta_info\":{\"prompt_tokens\":5,\"completion_tokens\":3,\"finish_reason\":{\"type\":\"stop\"}}}\n\n",
            "data: [DONE]\n\n",
        ]))
        .await;
        let items: Vec<EngineChunk> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            items,
            vec![
                EngineChunk::Text("Hel".into()),
                EngineChunk::Text("lo wor".into()),
                EngineChunk::Text("ld".into()),
                EngineChunk::Finished {
                    finish: EngineFinish::Stop,
                    usage: Some(Usage::new(5, 3)),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_done_without_finish_is_an_error() {
        let items = collect(frames(&["data: {\"text\":\"partial\"}\n\n", "data: [DONE]\n\n"])).await;
        assert!(matches!(items.last(), Some(Err(EngineError::Truncated))));
    }

    #[tokio::test]
    async fn test_connection_closed_without_finish_is_an_error() {
        let items = collect(frames(&["data: {\"text\":\"partial\"}\n\n"])).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(EngineError::Truncated)));
    }

    #[tokio::test]
    async fn test_abort_is_an_error() {
        let items = collect(frames(&[
            "data: {\"text\":\"a\",\"meta_info\":{\"finish_reason\":{\"type\":\"abort\",\"message\":\"CUDA out of memory\"}}}\n\n",
        ]))
        .await;
        match items.last() {
            Some(Err(EngineError::Aborted(msg))) => assert!(msg.contains("out of memory")),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let payload = "data: {\"text\":\"café\",\"meta_info\":{\"finish_reason\":{\"type\":\"length\"}}}\n\n";
        let bytes = payload.as_bytes();
        let split = payload.find('é').unwrap() + 1;
        let parts: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];
        let items = collect(sse_chunks(stream::iter(parts), TEST_IDLE)).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(EngineChunk::Text(t)) if t == "café"));
        assert!(matches!(
            &items[1],
            Ok(EngineChunk::Finished { finish: EngineFinish::Length, usage: None })
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let request = EngineRequest {
            prompt: "<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n".into(),
            images: Vec::new(),
            sampling: crate::core::request::SamplingParams {
                temperature: 0.0,
                top_p: 1.0,
                max_tokens: 16,
                stop: vec!["END".into()],
                seed: Some(3),
            },
        };
        let body = serde_json::to_value(HttpEngine::body(&request, true)).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["sampling_params"]["max_new_tokens"], 16);
        assert_eq!(body["sampling_params"]["stop"][0], "END");
        assert_eq!(body["sampling_params"]["sampling_seed"], 3);
        assert!(body.get("image_data").is_none());
    }

    #[tokio::test]
    async fn test_stalled_stream_fails() {
        let first: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from_static(b"data: {\"text\":\"Hi\"}\n\n"))];
        let body = stream::iter(first).chain(stream::pending());
        let mut chunks = sse_chunks(body, Duration::from_millis(50));

        assert!(matches!(chunks.next().await, Some(Ok(EngineChunk::Text(t))) if t == "Hi"));
        let stalled = tokio::time::timeout(Duration::from_secs(5), chunks.next())
            .await
            .expect("stream must not hang");
        assert!(matches!(stalled, Some(Err(EngineError::Stalled(_)))));
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn test_engine_that_stops_sending_releases_the_stream() {
        use axum::{body::Body, routing::post, Router};

        let app = Router::new().route(
            "/generate",
            post(|| async {
                let first = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
                    b"data: {\"text\":\"Hi\"}\n\n",
                ))]);
                Body::from_stream(first.chain(stream::pending()))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = Client::builder().no_proxy().build().unwrap();
        let engine = HttpEngine::new(client, format!("http://{addr}/"), "m", Duration::from_secs(30))
            .with_stream_idle_timeout(Duration::from_millis(200));
        let mut chunks = engine.generate_stream(EngineRequest::default()).await.unwrap();

        assert!(matches!(chunks.next().await, Some(Ok(EngineChunk::Text(t))) if t == "Hi"));
        let stalled = tokio::time::timeout(Duration::from_secs(5), chunks.next())
            .await
            .expect("stream must not hang");
        assert!(matches!(stalled, Some(Err(EngineError::Stalled(_)))));
    }
}
