//! # Logging Utilities
//!
//! Logging infrastructure for memwalk using `tracing`.
//!
//! Walkers emit `debug!`/`trace!` events per traversal step and `warn!` when
//! a consistency check fails. Everything is written to stderr so that report
//! tables on stdout stay machine-readable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memwalk_utils::init_logging;
//!
//! // Reads RUST_LOG, MEMWALK_LOG_FORMAT and MEMWALK_LOG_FILE
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("walking");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: level filter (e.g. `RUST_LOG=debug`, `RUST_LOG=memwalk_core=trace`)
//! - `MEMWALK_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `MEMWALK_LOG_FILE`: optional path to an additional log file
//!
//! The returned [`LoggingGuard`] must be kept alive for as long as file output
//! is wanted; dropping it flushes and stops the background writer.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "MEMWALK_LOG_FORMAT";

/// Environment variable naming an optional log file.
pub const LOG_FILE_ENV: &str = "MEMWALK_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level (default: consistency mismatches only)
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level, one event per node visited
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the non-blocking file writer alive.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    file: Option<WorkerGuard>,
}

impl LoggingGuard
{
    /// Whether a log file is being written.
    pub fn has_file(&self) -> bool
    {
        self.file.is_some()
    }
}

/// Initialize logging from the environment.
///
/// `RUST_LOG` wins when set; otherwise the level defaults to `warn` so that
/// only consistency warnings reach the terminal.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed, if
/// `MEMWALK_LOG_FORMAT` is not recognised, or if the log file directory
/// cannot be created.
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(LOG_FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::default(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::WARN.to_string()));

    init_logging_internal(format, filter)
}

/// Initialize logging with an explicit level, as from `--log-level`.
///
/// The explicit level takes precedence over `RUST_LOG`.
///
/// ```rust,no_run
/// use memwalk_utils::{init_logging_with_level, LogFormat, LogLevel};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_internal(format, EnvFilter::new(Level::from(level).to_string()))
}

fn init_logging_internal(format: LogFormat, filter: EnvFilter) -> Result<LoggingGuard, LoggingError>
{
    let mut layers = vec![console_layer(format)];

    let mut guard = LoggingGuard::default();
    if let Some(path) = env::var_os(LOG_FILE_ENV).map(PathBuf::from) {
        let (layer, worker) = file_layer(format, &path)?;
        layers.push(layer);
        guard.file = Some(worker);
    }

    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(guard)
}

fn console_layer(format: LogFormat) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);

    match format {
        LogFormat::Pretty => layer.with_ansi(true).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn file_layer(format: LogFormat, path: &Path) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let (directory, file_name) = split_log_path(path)?;
    std::fs::create_dir_all(&directory)?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false);

    let layer = match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    };
    Ok((layer, worker))
}

/// Split a log file path into (directory, file name); a bare name lands in `.`.
fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), LoggingError>
{
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidPath(path.to_path_buf()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, PathBuf::from(file_name)))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// Log file path has no file name
    #[error("Invalid log file path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
