//! Shared, per-process state handed to every handler.

use std::sync::Arc;

use llm_multimodal::{ImageLimits, MediaConnector, MediaConnectorConfig, MediaConnectorError};
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tool_parser::{QwenParser, ToolParser};

use crate::{
    config::{ImageConfig, ServerConfig},
    core::{HttpEngine, InferenceEngine, InferenceSlot},
};

#[derive(Debug, Error)]
pub enum AppContextError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid image settings: {0}")]
    Media(#[from] MediaConnectorError),
}

pub struct AppContext {
    pub config: ServerConfig,
    /// Id echoed in responses and checked against `model` in requests.
    pub model_id: String,
    pub engine: Arc<dyn InferenceEngine>,
    pub slot: Arc<InferenceSlot>,
    pub media_connector: Arc<MediaConnector>,
    pub tool_parser: Arc<dyn ToolParser>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppContext {
    /// Wire the production engine and image fetcher from `config`.
    pub fn from_config(config: ServerConfig) -> Result<Self, AppContextError> {
        let engine_client = reqwest::Client::builder()
            .connect_timeout(config.engine.connect_timeout())
            .pool_max_idle_per_host(4)
            .build()?;
        let model_id = config.served_model_id();
        let engine = HttpEngine::new(
            engine_client,
            config.engine.url.trim(),
            model_id,
            config.engine.request_timeout(),
        )
        .with_stream_idle_timeout(config.engine.stream_idle_timeout());

        let media_client = reqwest::Client::builder()
            .connect_timeout(config.images.fetch_timeout())
            .build()?;
        let media_connector = MediaConnector::new(media_client, media_config(&config.images))?;

        Ok(Self::new(config, Arc::new(engine), media_connector))
    }

    /// Build a context around an arbitrary engine.
    pub fn new(
        config: ServerConfig,
        engine: Arc<dyn InferenceEngine>,
        media_connector: MediaConnector,
    ) -> Self {
        let slot = InferenceSlot::new(config.limits.max_queued_requests);
        Self {
            model_id: config.served_model_id(),
            engine,
            slot: Arc::new(slot),
            media_connector: Arc::new(media_connector),
            tool_parser: Arc::new(QwenParser::new()),
            prometheus: None,
            config,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

pub fn media_config(images: &ImageConfig) -> MediaConnectorConfig {
    MediaConnectorConfig {
        allowed_domains: images.allowed_domains.clone(),
        fetch_timeout: images.fetch_timeout(),
        limits: ImageLimits {
            max_bytes: images.max_image_bytes,
            max_source_pixels: images.max_source_pixels,
            min_pixels: images.min_pixels,
            max_pixels: images.max_pixels,
            ..ImageLimits::default()
        },
    }
}
