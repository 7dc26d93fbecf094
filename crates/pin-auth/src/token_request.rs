//! Token endpoint request bodies.
//!
//! The PIN grant and its refresh companion share one endpoint and one wire
//! shape (`application/x-www-form-urlencoded`). Each request kind is a
//! [`TokenRequestStrategy`]; the session manager picks the strategy and the
//! [`TokenRequestFormatter`] adds the client identifier, merges caller extras
//! and encodes the result.

use std::collections::BTreeSet;

use ecocli_core::ScopeDelimiter;
use url::form_urlencoded;

use crate::{AuthError, AuthResult};

/// `grant_type` for redeeming a confirmed PIN.
pub const PIN_GRANT_TYPE: &str = "ecobeePin";

/// `grant_type` for refreshing an access token.
pub const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Content type of every token request body.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Builds the grant-specific fields of a token request.
pub trait TokenRequestStrategy {
    /// Value of the `grant_type` field.
    fn grant_type(&self) -> &'static str;

    /// Ordered fields for this request, including `grant_type` and `client_id`.
    fn build_params(
        &self,
        client_id: &str,
        delimiter: ScopeDelimiter,
    ) -> AuthResult<Vec<(String, String)>>;
}

/// Redeems the device code of a confirmed PIN.
#[derive(Debug, Clone, Default)]
pub struct ExchangeStrategy {
    device_code: Option<String>,
}

impl ExchangeStrategy {
    pub fn new(device_code: Option<String>) -> Self {
        Self { device_code }
    }
}

impl TokenRequestStrategy for ExchangeStrategy {
    fn grant_type(&self) -> &'static str {
        PIN_GRANT_TYPE
    }

    fn build_params(
        &self,
        client_id: &str,
        _delimiter: ScopeDelimiter,
    ) -> AuthResult<Vec<(String, String)>> {
        let code = self
            .device_code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingDeviceCode)?;

        Ok(vec![
            ("grant_type".to_string(), self.grant_type().to_string()),
            ("code".to_string(), code.to_string()),
            ("client_id".to_string(), client_id.to_string()),
        ])
    }
}

/// Trades a refresh token for a new access token.
///
/// The refresh token travels in the `code` field. The requested scopes are
/// sent when present, otherwise the scopes granted with the current token.
#[derive(Debug, Clone, Default)]
pub struct RefreshStrategy {
    refresh_token: Option<String>,
    requested_scopes: Vec<String>,
    granted_scopes: BTreeSet<String>,
}

impl RefreshStrategy {
    pub fn new(refresh_token: Option<String>) -> Self {
        Self {
            refresh_token,
            ..Self::default()
        }
    }

    pub fn requested_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn granted_scopes(mut self, scopes: BTreeSet<String>) -> Self {
        self.granted_scopes = scopes;
        self
    }
}

impl TokenRequestStrategy for RefreshStrategy {
    fn grant_type(&self) -> &'static str {
        REFRESH_GRANT_TYPE
    }

    fn build_params(
        &self,
        client_id: &str,
        delimiter: ScopeDelimiter,
    ) -> AuthResult<Vec<(String, String)>> {
        let refresh_token = self
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingRefreshToken)?;

        let mut scope = delimiter.join(&self.requested_scopes);
        if scope.is_empty() {
            scope = delimiter.join(&self.granted_scopes);
        }
        if scope.is_empty() {
            return Err(AuthError::MissingScope);
        }

        Ok(vec![
            ("grant_type".to_string(), self.grant_type().to_string()),
            ("code".to_string(), refresh_token.to_string()),
            ("scope".to_string(), scope),
            ("client_id".to_string(), client_id.to_string()),
        ])
    }
}

/// An encoded token request body.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRequestBody {
    pub params: Vec<(String, String)>,
    pub encoded: String,
}

impl TokenRequestBody {
    /// First value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl std::fmt::Debug for TokenRequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.params.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("TokenRequestBody")
            .field("params", &names)
            .finish()
    }
}

/// Formats token requests for one client against one token endpoint.
#[derive(Debug, Clone)]
pub struct TokenRequestFormatter {
    client_id: String,
    delimiter: ScopeDelimiter,
}

impl TokenRequestFormatter {
    pub fn new(client_id: impl Into<String>, delimiter: ScopeDelimiter) -> Self {
        Self {
            client_id: client_id.into(),
            delimiter,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn delimiter(&self) -> ScopeDelimiter {
        self.delimiter
    }

    /// Build and encode the body for `strategy`.
    ///
    /// `extra` pairs are appended after the fixed fields. A pair whose name is
    /// already set by the strategy is dropped.
    pub fn format(
        &self,
        strategy: &dyn TokenRequestStrategy,
        extra: &[(&str, &str)],
    ) -> AuthResult<TokenRequestBody> {
        let mut params = strategy.build_params(&self.client_id, self.delimiter)?;

        let fixed: BTreeSet<String> = params.iter().map(|(k, _)| k.clone()).collect();
        for (name, value) in extra {
            if fixed.contains(*name) {
                tracing::debug!(
                    param = %name,
                    grant_type = strategy.grant_type(),
                    "Ignoring extra token parameter that collides with a fixed field"
                );
                continue;
            }
            params.push((name.to_string(), value.to_string()));
        }

        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();

        Ok(TokenRequestBody { params, encoded })
    }
}
