//! # Observability
//!
//! Tracing setup shared by the ecocli crates.
//!
//! Library crates only emit events through the `tracing` macros. The binary
//! calls [`init_with_config`] once at startup, which installs a JSONL layer
//! appending to the log file and, when asked, a compact stderr layer.
//!
//! Credential-looking fields (`access_token`, `refresh_token`, `code`, ...)
//! are scrubbed before they are written.
//!
//! ```rust,ignore
//! observability::init_with_config(
//!     observability::LogConfig::new("ecocli")
//!         .level("debug")
//!         .stderr(true),
//! );
//! ```

mod json_layer;
mod writer;

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogLine};
pub use writer::{LogFileWriter, WriterFactory};

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written into every line as `service`.
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_level: String,
    /// JSONL destination; [`default_log_path`] when `None`.
    pub log_path: Option<PathBuf>,
    pub also_stderr: bool,
}

impl LogConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn log_path(mut self, path: Option<PathBuf>) -> Self {
        self.log_path = path;
        self
    }

    pub fn stderr(mut self, enabled: bool) -> Self {
        self.also_stderr = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }
}

/// `~/.config/ecocli/logs/ecocli.jsonl`, if a home directory exists.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/ecocli/logs/ecocli.jsonl"))
}

/// Install the global subscriber.
///
/// An unwritable log file drops the file layer with a warning on stderr
/// instead of failing. Later calls are no-ops.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let file_layer = log_path
        .as_deref()
        .and_then(|path| match LogFileWriter::new(path) {
            Ok(writer) => Some(
                JsonLayer::new(config.service_name.as_str(), WriterFactory::new(writer))
                    .with_filter(config.filter()),
            ),
            Err(e) => {
                eprintln!("warning: cannot open log file {}: {}", path.display(), e);
                None
            }
        });

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(config.filter())
    });

    if tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok()
    {
        tracing::debug!(service = %config.service_name, log_path = ?log_path, "logging ready");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_and_overrides() {
        let config = LogConfig::new("ecocli");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);

        let config = config
            .level("debug")
            .stderr(true)
            .log_path(Some(PathBuf::from("/tmp/x.jsonl")));
        assert_eq!(config.service_name, "ecocli");
        assert_eq!(config.default_level, "debug");
        assert!(config.also_stderr);
        assert_eq!(config.log_path, Some(PathBuf::from("/tmp/x.jsonl")));
    }

    #[test]
    fn test_default_log_path_is_under_ecocli_logs() {
        if let Some(path) = default_log_path() {
            assert!(path.ends_with(".config/ecocli/logs/ecocli.jsonl"));
        }
    }
}
