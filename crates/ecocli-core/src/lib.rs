//! Core types, configuration, and utilities for ecocli.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, ScopeDelimiter, DEFAULT_API_BASE_URL, DEFAULT_AUTHORIZE_URL, DEFAULT_LOG_LEVEL,
    DEFAULT_PORTAL_URL, DEFAULT_SCOPES, DEFAULT_TOKEN_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
