//! CLI command implementations.

mod auth;
mod thermostat;

pub use auth::{auth_status, login, logout, refresh};
pub use thermostat::{resume, set_mode, set_temp, status};

use std::sync::Arc;

use anyhow::{Context, Result};
use credential_store::{CredentialStore, FileCredentialStore};
use ecocli_core::{Config, Paths};
use pin_auth::{AuthError, SessionContext, SessionManager};
use tracing::debug;

use crate::output::OutputFormat;
use crate::thermostat::ThermostatError;

/// Everything a command needs, resolved once in `main`.
pub struct AppContext {
    pub paths: Paths,
    pub config: Config,
    pub format: OutputFormat,
    /// `--client-id` override.
    pub client_id: Option<String>,
    /// `--thermostat` override.
    pub thermostat_id: Option<String>,
}

impl AppContext {
    fn credential_store(&self) -> Arc<FileCredentialStore> {
        Arc::new(FileCredentialStore::new(self.paths.credentials_file()))
    }

    /// Client id from the flag, then the config (and its env override), then
    /// the stored record.
    fn resolve_client_id(&self, store: &dyn CredentialStore) -> Result<String> {
        if let Some(id) = non_empty(self.client_id.as_deref()) {
            return Ok(id);
        }
        if let Some(id) = non_empty(self.config.client_id.as_deref()) {
            return Ok(id);
        }
        if let Some(record) = store.load()? {
            if let Some(id) = non_empty(Some(&record.client_id)) {
                debug!("Using client id from stored credentials");
                return Ok(id);
            }
        }
        anyhow::bail!(
            "No client id configured. Pass --client-id, set ECOCLI_CLIENT_ID, \
             or add \"client_id\" to {}",
            self.paths.config_file().display()
        )
    }

    /// Build the session manager over the credentials file. Nothing is
    /// restored yet.
    pub fn session(&self) -> Result<Arc<SessionManager>> {
        let store = self.credential_store();
        let client_id = self.resolve_client_id(store.as_ref())?;
        let context = SessionContext::from_config(&self.config, client_id)
            .context("invalid endpoint configuration")?;
        Ok(Arc::new(SessionManager::new(context, store)))
    }

    pub fn thermostat_id(&self) -> Option<&str> {
        self.thermostat_id
            .as_deref()
            .or(self.config.thermostat_id.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn auth_error(err: &anyhow::Error) -> Option<&AuthError> {
    err.chain().find_map(|cause| {
        cause
            .downcast_ref::<AuthError>()
            .or_else(|| match cause.downcast_ref::<ThermostatError>() {
                Some(ThermostatError::Auth(inner)) => Some(inner),
                _ => None,
            })
    })
}

/// What the operator should do about `err`, if there is something specific.
pub fn guidance(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(auth) = auth_error(err) {
        let hint = match auth {
            AuthError::GrantExpired => {
                "The PIN expired before it was registered. Run `ecocli login` and enter the new PIN promptly."
            }
            AuthError::ExchangeRejected { .. } => {
                "The PIN was not accepted. Add it under My Apps in the ecobee portal, then run `ecocli login` again."
            }
            e if e.requires_reauthorization() => {
                "Run `ecocli login` to authorize this application again."
            }
            AuthError::InitiationFailed(_) => {
                "Check the client id (application key) and the network connection, then retry."
            }
            AuthError::PersistenceFailure(_) => {
                "Credentials could not be written. Check permissions on the ecocli config directory."
            }
            AuthError::ConfirmationAborted(_) => "Run `ecocli login` when ready to register the PIN.",
            e if e.is_transient() => "Temporary network problem. Retry the command.",
            AuthError::Transport(_) => "The request did not complete. Retry the command.",
            _ => return None,
        };
        return Some(hint);
    }

    let thermostat = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ThermostatError>())?;
    match thermostat {
        ThermostatError::NotFound => {
            Some("Check the thermostat identifier (--thermostat or \"thermostat_id\" in the config).")
        }
        ThermostatError::Transport(_) => Some("The request did not complete. Retry the command."),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credential_store::PersistedRecord;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn app(base: PathBuf) -> AppContext {
        AppContext {
            paths: Paths::with_base_dir(base),
            config: Config::default(),
            format: OutputFormat::Text,
            client_id: None,
            thermostat_id: None,
        }
    }

    #[test]
    fn test_client_id_precedence() {
        let dir = tempdir().unwrap();
        let mut ctx = app(dir.path().to_path_buf());
        let store = ctx.credential_store();
        store.save(&PersistedRecord::new("from-record")).unwrap();

        assert_eq!(ctx.resolve_client_id(store.as_ref()).unwrap(), "from-record");

        ctx.config.client_id = Some("from-config".to_string());
        assert_eq!(ctx.resolve_client_id(store.as_ref()).unwrap(), "from-config");

        ctx.client_id = Some("from-flag".to_string());
        assert_eq!(ctx.resolve_client_id(store.as_ref()).unwrap(), "from-flag");
    }

    #[test]
    fn test_missing_client_id_is_an_error() {
        let dir = tempdir().unwrap();
        let ctx = app(dir.path().to_path_buf());
        let store = ctx.credential_store();
        let err = ctx.resolve_client_id(store.as_ref()).unwrap_err();
        assert!(err.to_string().contains("--client-id"));
    }

    #[test]
    fn test_guidance_distinguishes_kinds() {
        let reauth = anyhow::Error::from(AuthError::RefreshRejected {
            error: "invalid_grant".to_string(),
            description: "revoked".to_string(),
        });
        assert!(guidance(&reauth).unwrap().contains("ecocli login"));

        let expired = anyhow::Error::from(AuthError::GrantExpired);
        assert!(guidance(&expired).unwrap().contains("expired"));

        let missing = anyhow::Error::from(AuthError::MissingDeviceCode);
        assert!(guidance(&missing).unwrap().contains("ecocli login"));

        let wrapped = anyhow::Error::from(ThermostatError::Auth(AuthError::NotAuthorized));
        assert!(guidance(&wrapped).unwrap().contains("ecocli login"));

        let persistence = anyhow::Error::from(AuthError::PersistenceFailure(
            credential_store::StorageError::Backend("disk full".to_string()),
        ));
        assert!(guidance(&persistence).unwrap().contains("permissions"));

        let api = anyhow::Error::from(ThermostatError::Api {
            code: 3,
            message: "bad".to_string(),
        });
        assert!(guidance(&api).is_none());
    }

    #[test]
    fn test_thermostat_override_wins() {
        let dir = tempdir().unwrap();
        let mut ctx = app(dir.path().to_path_buf());
        assert_eq!(ctx.thermostat_id(), None);

        ctx.config.thermostat_id = Some("111".to_string());
        assert_eq!(ctx.thermostat_id(), Some("111"));

        ctx.thermostat_id = Some("222".to_string());
        assert_eq!(ctx.thermostat_id(), Some("222"));
    }
}
