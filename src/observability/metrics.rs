//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade so library code never touches
//! the exporter; [`init_metrics`] installs the Prometheus recorder once at
//! startup and the returned handle renders `/metrics`.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Label values shared by call sites, kept as constants so dashboards do
/// not drift from the code.
pub mod metrics_labels {
    pub const ENDPOINT_CHAT: &str = "chat_completions";
    pub const ENDPOINT_MODELS: &str = "models";

    pub const OUTCOME_SUCCESS: &str = "success";
    pub const OUTCOME_CLIENT_ERROR: &str = "client_error";
    pub const OUTCOME_SERVER_ERROR: &str = "server_error";

    pub const GENERATION_COMPLETED: &str = "completed";
    pub const GENERATION_CANCELLED: &str = "cancelled";
    pub const GENERATION_FAILED: &str = "failed";

    pub const IMAGE_RESOLVED: &str = "resolved";
    pub const IMAGE_REJECTED: &str = "rejected";

    pub const TOOL_CALL_PARSED: &str = "parsed";
    pub const TOOL_CALL_TEXT: &str = "text";
}

const REQUESTS_TOTAL: &str = "vlm_requests_total";
const GENERATIONS_TOTAL: &str = "vlm_generations_total";
const GENERATION_DURATION: &str = "vlm_generation_duration_seconds";
const SLOT_WAIT: &str = "vlm_slot_wait_seconds";
const SLOT_QUEUE_DEPTH: &str = "vlm_slot_queue_depth";
const SLOT_BUSY: &str = "vlm_slot_busy";
const IMAGES_TOTAL: &str = "vlm_images_total";
const IMAGE_FETCH_DURATION: &str = "vlm_image_fetch_duration_seconds";
const TOOL_CALLS_TOTAL: &str = "vlm_tool_calls_total";
const GENERATED_TOKENS: &str = "vlm_generated_tokens_total";

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Install the global Prometheus recorder.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), DURATION_BUCKETS)?
        .install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    describe_counter!(REQUESTS_TOTAL, "HTTP API requests by endpoint, mode and outcome");
    describe_counter!(GENERATIONS_TOTAL, "Generation sessions by final state");
    describe_histogram!(GENERATION_DURATION, "Time a session held the inference slot");
    describe_histogram!(SLOT_WAIT, "Time spent queued for the inference slot");
    describe_gauge!(SLOT_QUEUE_DEPTH, "Requests waiting for the inference slot");
    describe_gauge!(SLOT_BUSY, "1 while a generation holds the inference slot");
    describe_counter!(IMAGES_TOTAL, "Images resolved or rejected");
    describe_histogram!(IMAGE_FETCH_DURATION, "Time to resolve all images of a request");
    describe_counter!(TOOL_CALLS_TOTAL, "Completions scanned for tool calls, by result");
    describe_counter!(GENERATED_TOKENS, "Completion tokens reported by the engine");
}

pub struct Metrics;

impl Metrics {
    pub fn record_request(endpoint: &'static str, streaming: bool, outcome: &'static str) {
        counter!(
            REQUESTS_TOTAL,
            "endpoint" => endpoint,
            "stream" => bool_to_static_str(streaming),
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn record_generation(state: &'static str, streaming: bool, duration: Duration) {
        counter!(
            GENERATIONS_TOTAL,
            "state" => state,
            "stream" => bool_to_static_str(streaming)
        )
        .increment(1);
        histogram!(GENERATION_DURATION, "state" => state).record(duration.as_secs_f64());
    }

    pub fn record_completion_tokens(tokens: u32) {
        counter!(GENERATED_TOKENS).increment(u64::from(tokens));
    }

    pub fn record_slot_wait(wait: Duration) {
        histogram!(SLOT_WAIT).record(wait.as_secs_f64());
    }

    pub fn set_slot_queue_depth(depth: usize) {
        gauge!(SLOT_QUEUE_DEPTH).set(depth as f64);
    }

    pub fn set_slot_busy(busy: bool) {
        gauge!(SLOT_BUSY).set(if busy { 1.0 } else { 0.0 });
    }

    pub fn record_images(outcome: &'static str, count: usize, duration: Duration) {
        counter!(IMAGES_TOTAL, "outcome" => outcome).increment(count as u64);
        histogram!(IMAGE_FETCH_DURATION, "outcome" => outcome).record(duration.as_secs_f64());
    }

    pub fn record_tool_call(result: &'static str) {
        counter!(TOOL_CALLS_TOTAL, "result" => result).increment(1);
    }
}

pub fn bool_to_static_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
