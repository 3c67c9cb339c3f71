use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use vlm_gateway::{
    app_context::AppContext,
    config::{ModelSize, ServerConfig},
    observability::{logging::init_logging, metrics::init_metrics},
    server,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SizeArg {
    #[value(name = "7B", alias = "7b")]
    Qwen7B,
    #[value(name = "32B", alias = "32b")]
    Qwen32B,
}

impl From<SizeArg> for ModelSize {
    fn from(size: SizeArg) -> Self {
        match size {
            SizeArg::Qwen7B => ModelSize::Qwen7B,
            SizeArg::Qwen32B => ModelSize::Qwen32B,
        }
    }
}

/// OpenAI-compatible API server for a local Qwen2.5-VL model
#[derive(Parser, Debug)]
#[command(name = "vlm-gateway", version, about)]
struct Cli {
    /// YAML config file; flags below override its values
    #[arg(long, env = "VLM_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long, short)]
    port: Option<u16>,

    /// Model size to serve
    #[arg(long, value_enum)]
    size: Option<SizeArg>,

    /// Override the served model id
    #[arg(long)]
    model_id: Option<String>,

    /// Base URL of the inference engine
    #[arg(long, env = "VLM_ENGINE_URL")]
    engine_url: Option<String>,

    /// Require `Authorization: Bearer <key>` on /v1 routes
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Also write daily-rolling log files here
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log request bodies, rendered tools and responses
    #[arg(long, alias = "log")]
    log_payloads: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_yaml_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(size) = self.size {
            config.model_size = size.into();
        }
        if let Some(model_id) = self.model_id {
            config.model_id = Some(model_id);
        }
        if let Some(url) = self.engine_url {
            config.engine.url = url;
        }
        if let Some(key) = self.api_key {
            config.api_key = Some(key);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.log_json {
            config.logging.json = true;
        }
        if let Some(dir) = self.log_dir {
            config.logging.log_dir = Some(dir.display().to_string());
        }
        if self.log_payloads {
            config.logging.log_payloads = true;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;
    let _log_guard = init_logging(&config.logging)?;

    let prometheus = init_metrics().context("failed to install metrics recorder")?;
    let ctx = AppContext::from_config(config)?.with_prometheus(prometheus);

    info!(
        model = %ctx.model_id,
        engine = %ctx.config.engine.url,
        auth = ctx.config.api_key.is_some(),
        "Starting vlm-gateway"
    );
    if let Err(e) = ctx.engine.health().await {
        warn!(error = %e, "Inference engine is not reachable yet; requests will fail until it is");
    }

    server::serve(ctx).await
}
