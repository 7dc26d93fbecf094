//! File system paths for ecocli.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory name under `~/.config`.
const APP_DIR_NAME: &str = "ecocli";

/// Resolves where ecocli keeps its files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.config/ecocli)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.config/ecocli`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".config").join(APP_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.config/ecocli/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the persisted credentials path (~/.config/ecocli/credentials.json).
    pub fn credentials_file(&self) -> PathBuf {
        self.base_dir.join("credentials.json")
    }

    /// Get the logs directory (~/.config/ecocli/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.config/ecocli/logs/ecocli.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("ecocli.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
