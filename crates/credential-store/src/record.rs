//! Persisted credential types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::{StorageError, StorageResult};

/// OAuth token set issued by the token endpoint.
///
/// Access tokens are opaque. `expires_at` is computed locally at issuance
/// (issue time + reported lifetime) and stored as Unix seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scope: BTreeSet<String>,
}

impl Token {
    /// True once `expires_at` has been reached.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check that every field a session needs is populated.
    pub fn validate(&self) -> StorageResult<()> {
        if self.access_token.is_empty() {
            return Err(StorageError::IncompleteToken("access_token"));
        }
        if self.refresh_token.is_empty() {
            return Err(StorageError::IncompleteToken("refresh_token"));
        }
        if self.token_type.is_empty() {
            return Err(StorageError::IncompleteToken("token_type"));
        }
        Ok(())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Durable form of the session: who the token was issued to, and the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub client_id: String,
    #[serde(default)]
    pub token: Option<Token>,
}

impl PersistedRecord {
    /// Record for a client that has no session yet.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            token: None,
        }
    }

    pub fn with_token(client_id: impl Into<String>, token: Token) -> Self {
        Self {
            client_id: client_id.into(),
            token: Some(token),
        }
    }

    /// Reject records that would persist a partial token.
    pub fn validate(&self) -> StorageResult<()> {
        match &self.token {
            Some(token) => token.validate(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample_token() -> Token {
        Token {
            access_token: "AT1".to_string(),
            refresh_token: "RT1".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap(),
            scope: ["smartWrite".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn test_token_expiry_boundaries() {
        let token = sample_token();
        assert!(!token.is_expired_at(token.expires_at - Duration::seconds(1)));
        assert!(token.is_expired_at(token.expires_at));
        assert!(token.is_expired_at(token.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_token_serializes_expiry_as_unix_seconds() {
        let json = serde_json::to_value(sample_token()).unwrap();
        assert_eq!(json["expires_at"], 1_893_499_200);
        assert_eq!(json["scope"], serde_json::json!(["smartWrite"]));
    }

    #[test]
    fn test_token_debug_redacts_secrets() {
        let debug = format!("{:?}", sample_token());
        assert!(!debug.contains("AT1"));
        assert!(!debug.contains("RT1"));
        assert!(debug.contains("Bearer"));
    }

    #[test]
    fn test_incomplete_token_is_rejected() {
        let mut token = sample_token();
        token.refresh_token.clear();
        let record = PersistedRecord::with_token("client", token);
        assert!(matches!(
            record.validate(),
            Err(StorageError::IncompleteToken("refresh_token"))
        ));
    }

    #[test]
    fn test_record_missing_token_field_deserializes() {
        let record: PersistedRecord = serde_json::from_str(r#"{"client_id":"abc"}"#).unwrap();
        assert_eq!(record, PersistedRecord::new("abc"));
    }
}
