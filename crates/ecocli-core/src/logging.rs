//! Logging initialization for ecocli.
//!
//! Thin wrapper over the observability crate: structured JSONL goes to the
//! log file, and events at or above the configured level are echoed to stderr.

use std::path::PathBuf;

use observability::LogConfig;

/// Initialize the logging system.
///
/// # Arguments
///
/// * `level` - Default log level (trace, debug, info, warn, error); `RUST_LOG`
///   takes precedence when set.
/// * `log_path` - JSONL file to append to; the observability default when `None`.
///
/// # Example
///
/// ```ignore
/// init_logging("info", Some(paths.log_file()));
/// tracing::info!("ecocli started");
/// ```
pub fn init_logging(level: &str, log_path: Option<PathBuf>) {
    observability::init_with_config(
        LogConfig::new("ecocli")
            .level(level)
            .log_path(log_path)
            .stderr(true),
    );
}
