//! Subscriber setup for the host process.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "offsync.log";

/// Keeps the file writer flushing. Hold it until the process exits.
pub struct LoggingGuard {
  _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// `RUST_LOG` wins over the configured level.
fn build_filter(level: &str) -> Result<EnvFilter> {
  match EnvFilter::try_from_default_env() {
    Ok(filter) => Ok(filter),
    Err(_) => EnvFilter::try_new(level).map_err(|e| eyre!("Invalid log level {:?}: {}", level, e)),
  }
}

type Filtered = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

fn build_file_layer(dir: &Path) -> (BoxedLayer, tracing_appender::non_blocking::WorkerGuard) {
  let appender = tracing_appender::rolling::RollingFileAppender::new(
    tracing_appender::rolling::Rotation::DAILY,
    dir,
    LOG_FILE_PREFIX,
  );
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let layer = tracing_subscriber::fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_target(true);
  (Box::new(layer), guard)
}

/// The filter sits directly on the registry so it gates every output layer.
fn build_subscriber(
  filter: EnvFilter,
  layers: Vec<BoxedLayer>,
) -> Layered<Vec<BoxedLayer>, Filtered> {
  Registry::default().with(filter).with(layers)
}

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when `directory` is set.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
  let filter = build_filter(&config.level)?;

  let mut layers: Vec<BoxedLayer> = Vec::new();
  layers.push(Box::new(
    tracing_subscriber::fmt::layer()
      .compact()
      .with_writer(std::io::stderr)
      .with_target(true),
  ));

  let mut guard = None;
  if let Some(dir) = &config.directory {
    std::fs::create_dir_all(dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    let (layer, file_guard) = build_file_layer(dir);
    layers.push(layer);
    guard = Some(file_guard);
  }

  build_subscriber(filter, layers)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(LoggingGuard { _guard: guard })
}
