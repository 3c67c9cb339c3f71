use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::{ConfigError, ConfigResult};

/// Qwen2.5-VL AWQ checkpoints this server knows how to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModelSize {
    #[default]
    #[serde(rename = "7B")]
    Qwen7B,
    #[serde(rename = "32B")]
    Qwen32B,
}

impl ModelSize {
    pub fn model_id(&self) -> &'static str {
        match self {
            ModelSize::Qwen7B => "Qwen/Qwen2.5-VL-7B-Instruct-AWQ",
            ModelSize::Qwen32B => "Qwen/Qwen2.5-VL-32B-Instruct-AWQ",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_size: ModelSize,
    /// Overrides the id derived from `model_size`.
    pub model_id: Option<String>,
    /// When set, `/v1/*` requires `Authorization: Bearer <api_key>`.
    pub api_key: Option<String>,
    pub engine: EngineConfig,
    pub images: ImageConfig,
    pub sampling: SamplingDefaults,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9192,
            model_size: ModelSize::default(),
            model_id: None,
            api_key: None,
            engine: EngineConfig::default(),
            images: ImageConfig::default(),
            sampling: SamplingDefaults::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSize::Qwen7B => f.write_str("7B"),
            ModelSize::Qwen32B => f.write_str("32B"),
        }
    }
}

impl ServerConfig {
    /// The model id this server answers to.
    pub fn served_model_id(&self) -> String {
        self.model_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.model_size.model_id().to_string())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 {
            return Err(invalid("port", "must be greater than zero"));
        }
        if self.host.trim().is_empty() {
            return Err(invalid("host", "must not be empty"));
        }
        if self.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(invalid("api_key", "must not be blank when set"));
        }
        self.engine.validate()?;
        self.images.validate()?;
        self.sampling.validate(self.limits.max_tokens_ceiling)?;
        self.limits.validate()?;
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Connection to the inference runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub url: String,
    /// Upper bound on one non-streamed generation.
    pub request_timeout_secs: u64,
    /// Upper bound on silence between two chunks of a streamed generation.
    pub stream_idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:30000".to_string(),
            request_timeout_secs: 600,
            stream_idle_timeout_secs: 60,
            connect_timeout_secs: 5,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        let url = Url::parse(self.url.trim())
            .map_err(|e| invalid("engine.url", format!("invalid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(
                "engine.url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("engine.request_timeout_secs", "must be greater than zero"));
        }
        if self.stream_idle_timeout_secs == 0 {
            return Err(invalid(
                "engine.stream_idle_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(invalid("engine.connect_timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Image resolution limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    pub max_image_bytes: u64,
    pub max_source_pixels: u64,
    pub min_pixels: u64,
    pub max_pixels: u64,
    pub fetch_timeout_ms: u64,
    pub max_images_per_request: usize,
    /// Restrict remote images to these hosts. `None` allows any host.
    pub allowed_domains: Option<Vec<String>>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 20 * 1024 * 1024,
            max_source_pixels: 32 * 1024 * 1024,
            min_pixels: 4 * 28 * 28,
            max_pixels: 16384 * 28 * 28,
            fetch_timeout_ms: 10_000,
            max_images_per_request: 16,
            allowed_domains: None,
        }
    }
}

impl ImageConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_image_bytes == 0 {
            return Err(invalid("images.max_image_bytes", "must be greater than zero"));
        }
        if self.max_source_pixels == 0 {
            return Err(invalid("images.max_source_pixels", "must be greater than zero"));
        }
        if self.min_pixels == 0 || self.min_pixels > self.max_pixels {
            return Err(invalid(
                "images.min_pixels",
                format!(
                    "must be in 1..={} (max_pixels), got {}",
                    self.max_pixels, self.min_pixels
                ),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(invalid("images.fetch_timeout_ms", "must be greater than zero"));
        }
        if self.max_images_per_request == 0 {
            return Err(invalid(
                "images.max_images_per_request",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Sampling values applied when a request leaves them out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingDefaults {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            max_tokens: 2048,
        }
    }
}

impl SamplingDefaults {
    fn validate(&self, max_tokens_ceiling: u32) -> ConfigResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("sampling.temperature", "must be within [0, 2]"));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(invalid("sampling.top_p", "must be within (0, 1]"));
        }
        if self.max_tokens == 0 || self.max_tokens > max_tokens_ceiling {
            return Err(invalid(
                "sampling.max_tokens",
                format!("must be within [1, {max_tokens_ceiling}]"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest `max_tokens` a request may ask for.
    pub max_tokens_ceiling: u32,
    pub context_window: u32,
    /// Requests allowed to wait for the inference slot. `None` is unbounded.
    pub max_queued_requests: Option<usize>,
    /// SSE frames buffered between the generator and a slow client.
    pub stream_buffer: usize,
    pub max_request_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tokens_ceiling: 8192,
            context_window: 131_072,
            max_queued_requests: None,
            stream_buffer: 8,
            max_request_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl LimitsConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_tokens_ceiling == 0 {
            return Err(invalid("limits.max_tokens_ceiling", "must be greater than zero"));
        }
        if self.stream_buffer == 0 {
            return Err(invalid("limits.stream_buffer", "must be greater than zero"));
        }
        if self.max_request_body_bytes == 0 {
            return Err(invalid(
                "limits.max_request_body_bytes",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Directory for daily-rolling log files, in addition to stdout.
    pub log_dir: Option<String>,
    /// Log request bodies, tool definitions and responses.
    pub log_payloads: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
            log_payloads: false,
        }
    }
}
