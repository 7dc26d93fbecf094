//! PIN authorization initiation: request construction and the issued grant.

use chrono::{DateTime, TimeDelta, Utc};
use ecocli_core::ScopeDelimiter;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AuthError, AuthResult};

/// Grant indicator sent as `response_type` on the initiation request.
pub const PIN_RESPONSE_TYPE: &str = "ecobeePin";

/// Builds the authorization-initiation URL for the PIN grant.
#[derive(Debug, Clone)]
pub struct GrantRequestBuilder {
    authorize_url: Url,
    client_id: String,
    scopes: Vec<String>,
    delimiter: ScopeDelimiter,
}

impl GrantRequestBuilder {
    pub fn new(authorize_url: Url, client_id: impl Into<String>) -> Self {
        Self {
            authorize_url,
            client_id: client_id.into(),
            scopes: Vec::new(),
            delimiter: ScopeDelimiter::default(),
        }
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn delimiter(mut self, delimiter: ScopeDelimiter) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Produce the initiation URL. Existing query parameters on the endpoint
    /// are preserved; the grant parameters are appended after them.
    pub fn build(&self) -> AuthResult<Url> {
        let mut url = self.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", PIN_RESPONSE_TYPE);
            query.append_pair("client_id", &self.client_id);
            let scope = self.delimiter.join(&self.scopes);
            if !scope.is_empty() {
                query.append_pair("scope", &scope);
            }
        }
        Ok(url)
    }
}

/// Initiation response body.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantResponse {
    #[serde(alias = "ecobeePin")]
    pub pin: String,
    /// Device code, redeemed in the exchange request.
    pub code: String,
    #[serde(default)]
    pub interval: u64,
    pub expires_in: i64,
    #[serde(default)]
    pub user_code: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// A pending PIN authorization.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub pin: String,
    pub user_code: String,
    pub device_code: String,
    pub interval_seconds: u64,
    pub expires_in_seconds: i64,
    pub issued_at: DateTime<Utc>,
}

impl AuthorizationGrant {
    /// Fails when `expires_in` does not describe a representable deadline.
    pub fn from_response(response: GrantResponse, issued_at: DateTime<Utc>) -> AuthResult<Self> {
        if deadline(issued_at, response.expires_in).is_none() {
            return Err(AuthError::InitiationFailed(format!(
                "PIN lifetime out of range: expires_in={}",
                response.expires_in
            )));
        }
        let user_code = response
            .user_code
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| response.pin.clone());
        Ok(Self {
            pin: response.pin,
            user_code,
            device_code: response.code,
            interval_seconds: response.interval,
            expires_in_seconds: response.expires_in,
            issued_at,
        })
    }

    /// Saturates at the last representable instant.
    pub fn expires_at(&self) -> DateTime<Utc> {
        deadline(self.issued_at, self.expires_in_seconds).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before the PIN lapses, zero once expired.
    pub fn remaining(&self) -> std::time::Duration {
        (self.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

fn deadline(issued_at: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(seconds).and_then(|lifetime| issued_at.checked_add_signed(lifetime))
}

impl std::fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("pin", &self.pin)
            .field("user_code", &self.user_code)
            .field("device_code", &"[REDACTED]")
            .field("interval_seconds", &self.interval_seconds)
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// What the user needs to see to finish authorization.
#[derive(Debug, Clone, Serialize)]
pub struct PinPrompt {
    pub pin: String,
    pub portal_url: String,
    pub expires_at: DateTime<Utc>,
    pub instructions: String,
}

impl PinPrompt {
    pub fn new(grant: &AuthorizationGrant, portal_url: &str) -> Self {
        let minutes = grant.expires_in_seconds.saturating_add(59) / 60;
        let instructions = format!(
            "Log in to {} and go to My Apps > Add Application. Enter the PIN {} \
             within {} minute(s), then confirm here.",
            portal_url, grant.user_code, minutes
        );
        Self {
            pin: grant.user_code.clone(),
            portal_url: portal_url.to_string(),
            expires_at: grant.expires_at(),
            instructions,
        }
    }
}
