//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The PIN initiation request failed or returned an unusable response.
    #[error("Authorization initiation failed: {0}")]
    InitiationFailed(String),

    /// The PIN was not confirmed within its lifetime.
    #[error("Authorization PIN expired before it was confirmed; run the login again")]
    GrantExpired,

    /// The token endpoint refused the PIN exchange.
    #[error("PIN exchange rejected ({error}): {description}")]
    ExchangeRejected { error: String, description: String },

    /// The refresh token was refused; the session has been cleared.
    #[error("Token refresh rejected ({error}): {description}; re-authorization required")]
    RefreshRejected { error: String, description: String },

    /// Credentials could not be persisted.
    #[error("Credential persistence failed: {0}")]
    PersistenceFailure(#[from] credential_store::StorageError),

    /// Network or HTTP protocol failure.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No session is held; authorization is required first.
    #[error("Not authorized")]
    NotAuthorized,

    /// Exchange requested without a pending grant.
    #[error("No device code available: no authorization grant is pending")]
    MissingDeviceCode,

    /// Refresh requested without a refresh token.
    #[error("No refresh token held")]
    MissingRefreshToken,

    /// Refresh requested with neither requested nor granted scopes.
    #[error("No scope available for the refresh request")]
    MissingScope,

    /// The user aborted the confirmation step.
    #[error("Authorization was not confirmed: {0}")]
    ConfirmationAborted(String),

    /// Invalid state transition in the auth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// The server answered with something that is neither a result nor an OAuth error.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Connection failures and timeouts
    /// - HTTP errors with 5xx status codes
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Transport(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// Returns true if the user has to run the PIN authorization again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            AuthError::GrantExpired
                | AuthError::ExchangeRejected { .. }
                | AuthError::RefreshRejected { .. }
                | AuthError::NotAuthorized
                | AuthError::MissingRefreshToken
                | AuthError::MissingDeviceCode
        )
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_rejected_requires_reauthorization() {
        let err = AuthError::RefreshRejected {
            error: "invalid_grant".to_string(),
            description: "refresh token revoked".to_string(),
        };
        assert!(err.requires_reauthorization());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_grant_expired_requires_reauthorization() {
        assert!(AuthError::GrantExpired.requires_reauthorization());
    }

    #[test]
    fn test_persistence_failure_is_neither() {
        let err = AuthError::PersistenceFailure(credential_store::StorageError::Backend(
            "disk full".to_string(),
        ));
        assert!(!err.requires_reauthorization());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_initiation_failure_is_not_reauthorization() {
        assert!(!AuthError::InitiationFailed("HTTP 503".to_string()).requires_reauthorization());
    }

    #[test]
    fn test_exchange_rejected_message_includes_description() {
        let err = AuthError::ExchangeRejected {
            error: "authorization_pending".to_string(),
            description: "Waiting for user to authorize application.".to_string(),
        };
        assert!(err.to_string().contains("Waiting for user"));
    }
}
