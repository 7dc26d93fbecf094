//! Token endpoint responses and conversion into persisted tokens.

use chrono::{DateTime, TimeDelta, Utc};
use credential_store::Token;
use ecocli_core::ScopeDelimiter;
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::{AuthError, AuthResult};

const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Successful token endpoint body.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body (`error`, `error_description`).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorResponse {
    pub fn description(&self) -> String {
        self.error_description
            .clone()
            .unwrap_or_else(|| self.error.clone())
    }
}

impl TokenResponse {
    fn expires_at(&self, now: DateTime<Utc>) -> AuthResult<DateTime<Utc>> {
        TimeDelta::try_seconds(self.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::UnexpectedResponse(format!(
                    "token lifetime out of range: expires_in={}",
                    self.expires_in
                ))
            })
    }

    fn token_type(&self) -> String {
        self.token_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string())
    }

    fn scope_set(&self) -> Option<BTreeSet<String>> {
        self.scope
            .as_deref()
            .map(ScopeDelimiter::parse)
            .map(|s| s.into_iter().collect::<BTreeSet<_>>())
            .filter(|s| !s.is_empty())
    }

    /// Build the first token of a session from an exchange response.
    ///
    /// The response must carry a refresh token; without one the session could
    /// never be renewed. Scopes fall back to `requested` when the server does
    /// not echo them.
    pub fn into_issued_token(
        self,
        requested: &[String],
        now: DateTime<Utc>,
    ) -> AuthResult<Token> {
        let refresh_token = self
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuthError::UnexpectedResponse(
                    "token response carried no refresh_token".to_string(),
                )
            })?;
        let scope = self
            .scope_set()
            .unwrap_or_else(|| requested.iter().cloned().collect());

        self.finish(refresh_token, scope, now)
    }

    /// Build the successor of `previous` from a refresh response.
    ///
    /// The prior refresh token and scopes are retained when the server omits
    /// them.
    pub fn into_refreshed_token(self, previous: &Token, now: DateTime<Utc>) -> AuthResult<Token> {
        let refresh_token = self
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| previous.refresh_token.clone());
        let scope = self.scope_set().unwrap_or_else(|| previous.scope.clone());

        self.finish(refresh_token, scope, now)
    }

    fn finish(
        self,
        refresh_token: String,
        scope: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> AuthResult<Token> {
        let token = Token {
            token_type: self.token_type(),
            expires_at: self.expires_at(now)?,
            access_token: self.access_token,
            refresh_token,
            scope,
        };
        token
            .validate()
            .map_err(|e| AuthError::UnexpectedResponse(e.to_string()))?;
        Ok(token)
    }
}
