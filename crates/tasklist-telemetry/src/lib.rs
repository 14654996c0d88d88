mod logging;

pub use logging::{LogQuery, LogRecord, TaskLog, TaskLogLayer};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "tower_http" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit newline-delimited JSON instead of human-readable lines.
    pub json: bool,
    /// Persist warn+ logs to SQLite at this path. `None` disables the sink.
    pub log_db_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            log_db_path: Some(default_log_db_path()),
        }
    }
}

impl TelemetryConfig {
    /// The `EnvFilter` directive string built from the configured levels.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Keeps the task log reachable for querying after startup.
pub struct TelemetryGuard {
    task_log: Option<Arc<TaskLog>>,
}

impl TelemetryGuard {
    /// The persisted log, if it could be opened.
    pub fn logs(&self) -> Option<&TaskLog> {
        self.task_log.as_deref()
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// A log database that cannot be opened disables the SQLite sink with a
/// message on stderr; stdout logging still comes up.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let task_log = match &config.log_db_path {
        Some(path) => match TaskLog::open(path) {
            Ok(log) => Some(Arc::new(log)),
            Err(e) => {
                eprintln!("tasklist-telemetry: failed to open log DB: {e}");
                None
            }
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(task_log.clone().map(TaskLogLayer::new))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    Ok(TelemetryGuard { task_log })
}

pub fn default_log_db_path() -> PathBuf {
    home_dir().join(".tasklist").join("logs.db")
}

/// Fallback home dir for default paths.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
