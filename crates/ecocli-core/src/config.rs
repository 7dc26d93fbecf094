//! Configuration management for ecocli.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Authorization (PIN initiation) endpoint.
pub const DEFAULT_AUTHORIZE_URL: &str = "https://api.ecobee.com/authorize";

/// Token endpoint used for both the PIN exchange and refreshes.
pub const DEFAULT_TOKEN_URL: &str = "https://api.ecobee.com/token";

/// Base URL of the versioned thermostat API.
pub const DEFAULT_API_BASE_URL: &str = "https://api.ecobee.com/1";

/// Consumer portal page where the PIN is registered.
pub const DEFAULT_PORTAL_URL: &str =
    "https://www.ecobee.com/consumerportal/index.html#/my-apps/add/new";

/// Scopes requested when the config file names none.
pub const DEFAULT_SCOPES: &[&str] = &["smartWrite"];

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// How multiple scopes are joined into the single `scope` parameter.
///
/// The thermostat service documents space separation, but older clients sent
/// a comma-joined list; both are accepted when parsing server responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeDelimiter {
    #[default]
    Space,
    Comma,
}

impl ScopeDelimiter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeDelimiter::Space => " ",
            ScopeDelimiter::Comma => ",",
        }
    }

    /// Join scopes with this delimiter, skipping empty entries.
    pub fn join<I, S>(&self, scopes: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        scopes
            .into_iter()
            .filter_map(|s| {
                let trimmed = s.as_ref().trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect::<Vec<_>>()
            .join(self.as_str())
    }

    /// Split a scope string as returned by the server.
    ///
    /// Splits on whitespace and commas regardless of the configured delimiter.
    pub fn parse(raw: &str) -> Vec<String> {
        raw.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Main ecocli configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Application key registered in the developer portal.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Scopes requested during authorization and refresh.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Delimiter used when sending `scopes` on the wire.
    #[serde(default)]
    pub scope_delimiter: ScopeDelimiter,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Where the user registers the PIN.
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    /// Thermostat identifier to target. All registered thermostats when unset.
    #[serde(default)]
    pub thermostat_id: Option<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_portal_url() -> String {
    DEFAULT_PORTAL_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            client_id: None,
            scopes: default_scopes(),
            scope_delimiter: ScopeDelimiter::default(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            portal_url: default_portal_url(),
            thermostat_id: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Some(log_level) = non_empty_env("ECOCLI_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(client_id) = non_empty_env("ECOCLI_CLIENT_ID") {
            self.client_id = Some(client_id);
        }
    }

    /// Check that endpoints parse and at least one scope is requested.
    pub fn validate(&self) -> CoreResult<()> {
        self.authorize_url()?;
        self.token_url()?;
        self.api_base_url()?;

        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(CoreError::Config(
                "at least one scope must be configured".to_string(),
            ));
        }

        Ok(())
    }

    pub fn authorize_url(&self) -> CoreResult<Url> {
        Url::parse(&self.authorize_url).map_err(CoreError::from)
    }

    pub fn token_url(&self) -> CoreResult<Url> {
        Url::parse(&self.token_url).map_err(CoreError::from)
    }

    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.authorize_url, DEFAULT_AUTHORIZE_URL);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.scopes, vec!["smartWrite".to_string()]);
        assert_eq!(config.scope_delimiter, ScopeDelimiter::Space);
        assert!(config.client_id.is_none());
    }

    #[test]
    fn test_config_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "client_id": "app-key-123",
            "scope_delimiter": "comma",
            "thermostat_id": "511876645706"
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.client_id.as_deref(), Some("app-key-123"));
        assert_eq!(config.scope_delimiter, ScopeDelimiter::Comma);
        assert_eq!(config.thermostat_id.as_deref(), Some("511876645706"));
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            scopes: vec!["openid".to_string(), "smartWrite".to_string()],
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.scopes, config.scopes);
        assert_eq!(loaded.portal_url, DEFAULT_PORTAL_URL);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
    }

    #[test]
    fn test_config_invalid_url() {
        let config = Config {
            token_url: "not a valid url".to_string(),
            ..Config::default()
        };

        assert!(config.token_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_empty_scopes() {
        let config = Config {
            scopes: vec!["  ".to_string()],
            ..Config::default()
        };

        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_scope_delimiter_join() {
        let scopes = ["openid", "smartWrite", "offline_access"];
        assert_eq!(
            ScopeDelimiter::Space.join(scopes),
            "openid smartWrite offline_access"
        );
        assert_eq!(
            ScopeDelimiter::Comma.join(scopes),
            "openid,smartWrite,offline_access"
        );
        assert_eq!(ScopeDelimiter::Space.join(["", "smartRead"]), "smartRead");
    }

    #[test]
    fn test_scope_delimiter_parse_accepts_both_forms() {
        assert_eq!(
            ScopeDelimiter::parse("openid,smartWrite offline_access"),
            vec!["openid", "smartWrite", "offline_access"]
        );
        assert!(ScopeDelimiter::parse("").is_empty());
    }
}
