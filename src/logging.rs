use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::{debug, info};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

const DEFAULT_LOG_FILE: &str = "ground_game.log";

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Parse the `logging.format` setting; anything but "json" is text
    #[must_use]
    pub fn from_setting(format: &str) -> Self {
        if format.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(format: LogFormat) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.with_ansi(true).with_thread_names(true).boxed(),
    }
}

/// Daily-rolling JSON file layer writing next to `log_path`
fn file_layer(log_path: &Path) -> (BoxedLayer, WorkerGuard) {
    let directory = log_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_path
        .file_name()
        .map_or_else(|| DEFAULT_LOG_FILE.to_string(), |n| n.to_string_lossy().into_owned());
    let (writer, guard) = non_blocking(rolling::daily(directory, file_name));

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .boxed();
    (layer, guard)
}

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence over `log_level`. The returned guard must be
/// held for the life of the process when a log file is configured, otherwise
/// buffered file output is lost.
pub fn init_logging(log_level: Option<&str>, log_file: Option<&Path>, format: LogFormat) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.unwrap_or("info")))
        .map_err(|e| anyhow!("Failed to create log filter: {}", e))?;

    let mut layers = vec![console_layer(format)];
    let guard = log_file.map(|path| {
        let (layer, guard) = file_layer(path);
        layers.push(layer);
        guard
    });

    Registry::default()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install subscriber: {}", e))?;

    info!(?format, file = log_file.map(|p| p.display().to_string()), "Logging system initialized");
    Ok(guard)
}

/// Times one pipeline operation.
///
/// `finish` logs the elapsed time at info. A timer dropped without `finish`
/// (an early `?` return) logs at debug instead.
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
    finished: bool,
}

impl OperationTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
            finished: false,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(mut self) -> u128 {
        self.finished = true;
        let duration_ms = self.start.elapsed().as_millis();
        info!(operation = self.operation, duration_ms, "Operation completed");
        duration_ms
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !self.finished && !std::thread::panicking() {
            debug!(
                operation = self.operation,
                duration_ms = self.start.elapsed().as_millis(),
                "Operation ended early"
            );
        }
    }
}
