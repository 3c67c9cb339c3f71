//! Tracing subscriber setup.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "vlm-gateway.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the non-blocking file writer alive. Dropping it flushes and stops
/// file logging, so `main` holds it for the life of the process.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber and bridge `log` records into it.
///
/// `RUST_LOG` wins over the configured level when set. Output goes to stdout
/// and, when `log_dir` is configured, to a daily-rolling file as well.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);

    let stdout_layer = if config.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(build_filter(&config.level)?)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_filter(build_filter(&config.level)?)
            .boxed()
    };
    layers.push(stdout_layer);

    let file_guard = match &config.log_dir {
        Some(dir) => {
            let (layer, guard) = file_layer(Path::new(dir), config)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry().with(layers);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn build_filter(level: &str) -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
}

fn file_layer(dir: &Path, config: &LoggingConfig) -> anyhow::Result<(BoxedLayer, WorkerGuard)> {
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(build_filter(&config.level)?)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(build_filter(&config.level)?)
            .boxed()
    };
    Ok((layer, guard))
}
