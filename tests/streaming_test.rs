//! Streamed `/v1/chat/completions`: chunk order, parity with the
//! non-streamed text, failure framing and disconnect handling.

mod common;

use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use common::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use vlm_gateway::core::{EngineError, EngineFinish};

fn parse_chunks(frames: &[String]) -> Vec<Value> {
    frames
        .iter()
        .filter(|f| f.as_str() != "[DONE]")
        .map(|f| serde_json::from_str(f).expect("chunk json"))
        .collect()
}

fn content_of(chunks: &[Value]) -> String {
    chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect()
}

#[tokio::test]
async fn test_chunk_sequence_shape() {
    let engine = Arc::new(MockEngine::new(&["The capital", " of France", " is Paris."]));
    let ctx = test_context(engine, test_config());

    let response = post_chat(
        &app(&ctx),
        &json!({
            "messages": [{"role": "user", "content": "What is the capital of France?"}],
            "stream": true
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

    let frames = sse_frames(response).await;
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(frames.iter().filter(|f| f.as_str() == "[DONE]").count(), 1);

    let chunks = parse_chunks(&frames);
    // role, three deltas, finish
    assert_eq!(chunks.len(), 5);
    let id = chunks[0]["id"].as_str().unwrap();
    assert!(chunks.iter().all(|c| c["id"] == id));
    assert!(chunks
        .iter()
        .all(|c| c["object"] == "chat.completion.chunk" && c["model"] == MODEL_ID));

    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "");
    assert!(chunks[0]["choices"][0]["finish_reason"].is_null());
    for chunk in &chunks[1..4] {
        assert!(chunk["choices"][0]["delta"].get("role").is_none());
        assert!(chunk["choices"][0]["finish_reason"].is_null());
    }
    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["delta"], json!({}));
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert!(last.get("usage").is_none());
}

#[tokio::test]
async fn test_streamed_text_matches_non_streamed() {
    let fragments = [
        "Paris <|im",
        "_end|> is ",
        "the capital\u{FFFD}",
        "\u{FFFD} of ",
        "France\u{2605}. <",
        "b>Bold</b> <",
    ];
    let body = |stream: bool| {
        json!({
            "messages": [{"role": "user", "content": "capital?"}],
            "temperature": 0,
            "stream": stream
        })
    };

    let engine = Arc::new(MockEngine::new(&fragments));
    let ctx = test_context(engine, test_config());
    let whole = body_json(post_chat(&app(&ctx), &body(false)).await).await;
    let whole = whole["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .to_string();

    let streamed = content_of(&parse_chunks(&sse_frames(post_chat(&app(&ctx), &body(true)).await).await));
    assert_eq!(streamed, whole);
    assert_eq!(whole, "Paris  is the capital\u{FFFD}\u{FFFD} of France. <b>Bold</b> <");
}

#[tokio::test]
async fn test_stop_sequence_in_stream() {
    let engine = Arc::new(
        MockEngine::new(&["one two ", "thr", "ee four"])
            .with_ending(Ending::Finish(EngineFinish::Length)),
    );
    let ctx = test_context(engine, test_config());

    let frames = sse_frames(
        post_chat(
            &app(&ctx),
            &json!({
                "messages": [{"role": "user", "content": "count"}],
                "stream": true,
                "stop": ["three"]
            }),
        )
        .await,
    )
    .await;
    let chunks = parse_chunks(&frames);
    assert_eq!(content_of(&chunks), "one two ");
    assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "stop");
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    assert!(!ctx.slot.is_busy());
}

#[tokio::test]
async fn test_include_usage_chunk() {
    let engine = Arc::new(MockEngine::new(&["a", "b"]));
    let ctx = test_context(engine, test_config());

    let frames = sse_frames(
        post_chat(
            &app(&ctx),
            &json!({
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
                "stream_options": {"include_usage": true}
            }),
        )
        .await,
    )
    .await;
    let chunks = parse_chunks(&frames);
    let usage_chunk = chunks.last().unwrap();
    assert_eq!(usage_chunk["choices"], json!([]));
    assert_eq!(usage_chunk["usage"]["completion_tokens"], 2);
    assert_eq!(
        chunks[chunks.len() - 2]["choices"][0]["finish_reason"],
        "stop"
    );
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn test_no_usage_chunk_without_engine_usage() {
    let engine = Arc::new(MockEngine::new(&["a"]).with_usage(None));
    let ctx = test_context(engine, test_config());

    let frames = sse_frames(
        post_chat(
            &app(&ctx),
            &json!({
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
                "stream_options": {"include_usage": true}
            }),
        )
        .await,
    )
    .await;
    let chunks = parse_chunks(&frames);
    assert!(chunks.iter().all(|c| c.get("usage").is_none()));
}

#[tokio::test]
async fn test_mid_stream_failure_is_framed_as_error() {
    let engine = Arc::new(
        MockEngine::new(&["Partial", " answer"]).with_ending(Ending::Fail("CUDA out of memory".into())),
    );
    let ctx = test_context(engine, test_config());

    let response = post_chat(
        &app(&ctx),
        &json!({"messages": [{"role": "user", "content": "hi"}], "stream": true}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let frames = sse_frames(response).await;
    let chunks = parse_chunks(&frames);

    let error_pos = chunks
        .iter()
        .position(|c| c.get("error").is_some())
        .expect("error frame");
    assert_eq!(chunks[error_pos]["error"]["code"], "generation_error");
    assert!(chunks[error_pos]["error"]["message"]
        .as_str()
        .unwrap()
        .contains("out of memory"));

    let finish = &chunks[error_pos + 1];
    assert_eq!(finish["choices"][0]["finish_reason"], "error");
    assert_eq!(chunks.len(), error_pos + 2);
    assert!(chunks
        .iter()
        .all(|c| !matches!(c["choices"][0]["finish_reason"].as_str(), Some("stop" | "length"))));
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    assert!(!ctx.slot.is_busy());
}

#[tokio::test]
async fn test_truncated_stream_is_an_error() {
    let engine = Arc::new(MockEngine::new(&["Partial"]).with_ending(Ending::Truncate));
    let ctx = test_context(engine, test_config());

    let frames = sse_frames(
        post_chat(
            &app(&ctx),
            &json!({"messages": [{"role": "user", "content": "hi"}], "stream": true}),
        )
        .await,
    )
    .await;
    let chunks = parse_chunks(&frames);
    assert_eq!(
        chunks.last().unwrap()["choices"][0]["finish_reason"],
        "error"
    );
}

#[tokio::test]
async fn test_engine_rejection_before_output_is_plain_error() {
    let engine = Arc::new(
        MockEngine::new(&["x"]).rejecting(EngineError::Unavailable("connection refused".into())),
    );
    let ctx = test_context(engine, test_config());

    let response = post_chat(
        &app(&ctx),
        &json!({"messages": [{"role": "user", "content": "hi"}], "stream": true}),
    )
    .await;
    assert_error(response, StatusCode::INTERNAL_SERVER_ERROR, "generation_error").await;
    assert!(!ctx.slot.is_busy());
}

#[tokio::test]
async fn test_two_images_streamed() {
    let engine = Arc::new(MockEngine::new(&["Both show", " a blue square."]));
    let ctx = test_context(engine.clone(), test_config());

    let frames = sse_frames(
        post_chat(
            &app(&ctx),
            &json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "image_url", "image_url": {"url": png_data_url(40, 40)}},
                        {"type": "image_url", "image_url": {"url": png_data_url(80, 60)}},
                        {"type": "text", "text": "What do these have in common?"}
                    ]
                }],
                "stream": true
            }),
        )
        .await,
    )
    .await;

    let chunks = parse_chunks(&frames);
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    let finish_pos = chunks
        .iter()
        .position(|c| !c["choices"][0]["finish_reason"].is_null())
        .unwrap();
    assert_eq!(finish_pos, chunks.len() - 1);
    assert!(chunks[finish_pos - 1]["choices"][0]["delta"]["content"].is_string());
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(content_of(&chunks), "Both show a blue square.");
    assert_eq!(engine.requests()[0].images.len(), 2);
}

#[tokio::test]
async fn test_client_disconnect_cancels_and_releases_slot() {
    let fragments: Vec<String> = (0..100).map(|i| format!("token{i} ")).collect();
    let fragment_refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
    let engine = Arc::new(MockEngine::new(&fragment_refs).with_delay(Duration::from_millis(20)));
    let mut config = test_config();
    config.limits.stream_buffer = 2;
    let ctx = test_context(engine.clone(), config);
    let app = app(&ctx);

    let response = post_chat(
        &app,
        &json!({"messages": [{"role": "user", "content": "talk forever"}], "stream": true}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let first = body.frame().await.expect("frame").expect("frame ok");
    assert!(first.is_data());
    assert!(ctx.slot.is_busy());
    drop(body);

    assert!(eventually(|| !ctx.slot.is_busy()).await, "slot was not released");
    assert!(eventually(|| engine.cancelled() == 1).await);
    assert_eq!(engine.running(), 0);

    // the next request gets the slot
    let response = post_chat(
        &app,
        &json!({"messages": [{"role": "user", "content": "hi"}], "stream": false}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ctx.slot.acquisitions(), 2);
}

#[tokio::test]
async fn test_slow_reader_applies_backpressure() {
    let fragments: Vec<String> = (0..50).map(|i| format!("t{i} ")).collect();
    let fragment_refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
    let engine = Arc::new(MockEngine::new(&fragment_refs));
    let mut config = test_config();
    config.limits.stream_buffer = 2;
    let ctx = test_context(engine.clone(), config);

    let response = post_chat(
        &app(&ctx),
        &json!({"messages": [{"role": "user", "content": "hi"}], "stream": true}),
    )
    .await;
    let mut body = response.into_body();
    let _ = body.frame().await;

    // nobody reads: the producer parks on the full channel, the engine
    // stream is not drained and generation stays in flight
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.running(), 1);
    assert!(ctx.slot.is_busy());

    let rest = body.collect().await.unwrap().to_bytes();
    let text = String::from_utf8(rest.to_vec()).unwrap();
    assert!(text.ends_with("data: [DONE]\n\n"));
    assert!(eventually(|| !ctx.slot.is_busy()).await);
}
