//! # memwalk Utilities
//!
//! Logging infrastructure shared by the memwalk workspace, built on
//! `tracing` and `tracing-subscriber`.

pub mod logging;

pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
