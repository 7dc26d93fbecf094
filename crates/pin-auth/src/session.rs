//! Session management for the PIN grant using FSM-based state tracking.
//!
//! `SessionManager` owns the in-memory token for the lifetime of the process.
//! It restores the persisted record at startup, runs the PIN authorization
//! when no session exists, and wraps outgoing API requests with the bearer
//! token, refreshing it when it has expired or when the server rejects it.
//! Every token change is written through the [`CredentialStore`] before the
//! in-memory copy is replaced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use credential_store::{CredentialStore, PersistedRecord, Token};
use ecocli_core::{Config, ScopeDelimiter};
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth_fsm::{
    SessionMachine, SessionMachineInput, SessionState, SessionStateChangedPayload,
};
use crate::grant::{AuthorizationGrant, GrantRequestBuilder, GrantResponse, PinPrompt};
use crate::response::{OAuthErrorResponse, TokenResponse};
use crate::token_request::{
    ExchangeStrategy, RefreshStrategy, TokenRequestBody, TokenRequestFormatter,
    FORM_CONTENT_TYPE,
};
use crate::{AuthError, AuthResult, UserConfirmation};

/// OAuth error codes meaning the PIN lapsed before it was confirmed.
const EXPIRED_GRANT_ERRORS: &[&str] = &["authorization_expired", "expired_token"];

/// Everything the session needs to know about the client and the endpoints.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub delimiter: ScopeDelimiter,
    pub authorize_url: Url,
    pub token_url: Url,
    pub portal_url: String,
}

impl SessionContext {
    /// Build a context from the loaded configuration and a resolved client id.
    pub fn from_config(config: &Config, client_id: impl Into<String>) -> AuthResult<Self> {
        Ok(Self {
            client_id: client_id.into(),
            scopes: config.scopes.clone(),
            delimiter: config.scope_delimiter,
            authorize_url: Url::parse(&config.authorize_url)?,
            token_url: Url::parse(&config.token_url)?,
            portal_url: config.portal_url.clone(),
        })
    }
}

/// A domain request to be sent with the session's bearer token.
///
/// Cloned and replayed once if the first attempt is rejected as unauthorized.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
}

impl AuthenticatedRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            json: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }
}

/// Snapshot of the session for status output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub client_id: String,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub scope: Vec<String>,
}

/// Callback type for session state change notifications.
pub type SessionStateCallback = Box<dyn Fn(SessionStateChangedPayload) + Send + Sync>;

/// Outcome of a token endpoint call that reached the server.
enum TokenReply {
    Granted(TokenResponse),
    Denied(OAuthErrorResponse),
}

/// Session manager for the PIN grant with FSM-based state tracking.
pub struct SessionManager {
    context: SessionContext,
    store: Arc<dyn CredentialStore>,
    http_client: Client,
    formatter: TokenRequestFormatter,
    /// Internal FSM for tracking session state transitions.
    fsm: Mutex<SessionMachine>,
    /// Held across a refresh so concurrent callers wait for its result.
    token: tokio::sync::Mutex<Option<Token>>,
    pending_grant: Mutex<Option<AuthorizationGrant>>,
    state_callback: Mutex<Option<SessionStateCallback>>,
}

impl SessionManager {
    pub fn new(context: SessionContext, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_http_client(context, store, Client::new())
    }

    pub fn with_http_client(
        context: SessionContext,
        store: Arc<dyn CredentialStore>,
        http_client: Client,
    ) -> Self {
        let formatter = TokenRequestFormatter::new(context.client_id.clone(), context.delimiter);
        Self {
            context,
            store,
            http_client,
            formatter,
            fsm: Mutex::new(SessionMachine::new()),
            token: tokio::sync::Mutex::new(None),
            pending_grant: Mutex::new(None),
            state_callback: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Set a callback to be notified of session state changes.
    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        *self.state_callback.lock() = Some(callback);
    }

    /// Get the current FSM state.
    pub fn state(&self) -> SessionState {
        SessionState::from(self.fsm.lock().state())
    }

    /// Transition the FSM and notify callback if state changed.
    fn transition(&self, input: &SessionMachineInput) -> AuthResult<SessionState> {
        let mut fsm = self.fsm.lock();
        let old_state = SessionState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input, old_state
            ))
        })?;

        let new_state = SessionState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Session state transition"
            );
            if let Some(callback) = self.state_callback.lock().as_ref() {
                callback(SessionStateChangedPayload {
                    previous: old_state,
                    state: new_state,
                });
            }
        }

        Ok(new_state)
    }

    fn expect_state(&self, expected: SessionState) -> AuthResult<()> {
        let current = self.state();
        if current != expected {
            return Err(AuthError::InvalidStateTransition(format!(
                "Expected session state {:?}, found {:?}",
                expected, current
            )));
        }
        Ok(())
    }

    /// Adopt the persisted token, if there is one for this client.
    pub async fn restore(&self) -> AuthResult<SessionState> {
        let current = self.state();
        if current != SessionState::NoSession {
            return Ok(current);
        }

        let mut slot = self.token.lock().await;
        let record = self.store.load()?;

        match record {
            Some(PersistedRecord {
                client_id,
                token: Some(token),
            }) if client_id == self.context.client_id => {
                info!(
                    expires_at = %token.expires_at,
                    expired = token.is_expired(),
                    "Restored stored session"
                );
                *slot = Some(token);
                self.transition(&SessionMachineInput::TokenLoaded)
            }
            Some(PersistedRecord {
                client_id,
                token: Some(_),
            }) => {
                warn!(
                    stored_client_id = %client_id,
                    client_id = %self.context.client_id,
                    "Stored session belongs to a different client, ignoring it"
                );
                Ok(SessionState::NoSession)
            }
            _ => {
                info!("No stored session found");
                Ok(SessionState::NoSession)
            }
        }
    }

    /// Start the PIN grant: request a PIN and return what to show the user.
    pub async fn begin_authorization(&self) -> AuthResult<PinPrompt> {
        self.expect_state(SessionState::NoSession)?;

        let grant = match self.request_grant().await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(error = %e, "PIN initiation failed");
                self.transition(&SessionMachineInput::InitiationFailed)?;
                return Err(e);
            }
        };

        let prompt = PinPrompt::new(&grant, &self.context.portal_url);
        info!(
            pin = %grant.user_code,
            expires_in = grant.expires_in_seconds,
            "PIN issued, awaiting user confirmation"
        );
        *self.pending_grant.lock() = Some(grant);
        self.transition(&SessionMachineInput::GrantIssued)?;

        Ok(prompt)
    }

    async fn request_grant(&self) -> AuthResult<AuthorizationGrant> {
        let url = GrantRequestBuilder::new(
            self.context.authorize_url.clone(),
            self.context.client_id.clone(),
        )
        .scopes(self.context.scopes.iter().cloned())
        .delimiter(self.context.delimiter)
        .build()?;

        debug!(url = %self.context.authorize_url, "Requesting authorization PIN");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::InitiationFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::InitiationFailed(e.to_string()))?;

        if !status.is_success() {
            warn!(status = %status, body = %body, "Authorization request failed");
            return Err(AuthError::InitiationFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let parsed: GrantResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::InitiationFailed(format!("malformed authorization response: {}", e))
        })?;

        AuthorizationGrant::from_response(parsed, Utc::now())
    }

    /// The grant waiting for confirmation, if any.
    pub fn pending_grant(&self) -> Option<AuthorizationGrant> {
        self.pending_grant.lock().clone()
    }

    /// Exchange the confirmed PIN for a token and persist it.
    ///
    /// Any failure moves the session to `Invalid`; the device code is single
    /// use, so the exchange is never retried.
    pub async fn complete_authorization(&self) -> AuthResult<()> {
        self.expect_state(SessionState::AwaitingUserConfirmation)?;
        let grant = self.pending_grant.lock().take();

        let mut slot = self.token.lock().await;
        let result = match self.exchange(grant.as_ref()).await {
            Ok(token) => self.persist(&token).map(|_| token),
            Err(e) => Err(e),
        };

        match result {
            Ok(token) => {
                let expires_at = token.expires_at;
                *slot = Some(token);
                self.transition(&SessionMachineInput::ExchangeSucceeded)?;
                info!(expires_at = %expires_at, "PIN authorization complete");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "PIN exchange failed");
                self.transition(&SessionMachineInput::ExchangeFailed)?;
                Err(e)
            }
        }
    }

    async fn exchange(&self, grant: Option<&AuthorizationGrant>) -> AuthResult<Token> {
        if grant.is_some_and(|g| g.is_expired()) {
            return Err(AuthError::GrantExpired);
        }

        let strategy = ExchangeStrategy::new(grant.map(|g| g.device_code.clone()));
        let body = self.formatter.format(&strategy, &[])?;

        match self.request_token(&body).await? {
            TokenReply::Granted(response) => {
                response.into_issued_token(&self.context.scopes, Utc::now())
            }
            TokenReply::Denied(err) if EXPIRED_GRANT_ERRORS.contains(&err.error.as_str()) => {
                Err(AuthError::GrantExpired)
            }
            TokenReply::Denied(err) => Err(AuthError::ExchangeRejected {
                description: err.description(),
                error: err.error,
            }),
        }
    }

    /// Run the whole PIN grant: request a PIN, wait for `confirmation` for at
    /// most the PIN lifetime, then exchange it.
    pub async fn authorize(&self, confirmation: &dyn UserConfirmation) -> AuthResult<()> {
        let prompt = self.begin_authorization().await?;
        let remaining = self
            .pending_grant
            .lock()
            .as_ref()
            .map(|g| g.remaining())
            .unwrap_or_default();

        let outcome = tokio::time::timeout(remaining, confirmation.confirm(&prompt)).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(AuthError::GrantExpired),
        };

        if let Some(e) = failure {
            warn!(error = %e, "PIN was not confirmed");
            self.pending_grant.lock().take();
            self.transition(&SessionMachineInput::ExchangeFailed)?;
            return Err(e);
        }

        self.complete_authorization().await
    }

    /// Restore the stored session, authorizing from scratch when there is none.
    pub async fn ensure_session(&self, confirmation: &dyn UserConfirmation) -> AuthResult<()> {
        match self.restore().await? {
            SessionState::Authorized => Ok(()),
            SessionState::NoSession => self.authorize(confirmation).await,
            other => Err(AuthError::InvalidStateTransition(format!(
                "Cannot establish a session from state {:?}",
                other
            ))),
        }
    }

    /// Current access token, refreshed first if it has expired.
    pub async fn access_token(&self) -> AuthResult<String> {
        let mut slot = self.token.lock().await;
        if !self.state().is_authorized() {
            return Err(AuthError::NotAuthorized);
        }

        let expired = match slot.as_ref() {
            Some(token) => token.is_expired(),
            None => return Err(AuthError::NotAuthorized),
        };

        if expired {
            info!("Access token expired, refreshing");
            self.transition(&SessionMachineInput::TokenExpired)?;
            self.refresh_locked(&mut slot).await?;
        }

        slot.as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(AuthError::NotAuthorized)
    }

    /// Refresh the access token now, whether or not it has expired.
    pub async fn refresh(&self) -> AuthResult<()> {
        let mut slot = self.token.lock().await;
        if slot.is_none() || !self.state().is_authorized() {
            return Err(AuthError::NotAuthorized);
        }

        self.transition(&SessionMachineInput::TokenExpired)?;
        self.refresh_locked(&mut slot).await
    }

    /// Refresh after the server rejected `rejected_access_token`.
    ///
    /// Skipped when the held token already differs, which means another caller
    /// refreshed while this request was in flight. Callers that detect an
    /// expired token in a response body use this with the token returned by
    /// [`send_with_token`](Self::send_with_token).
    pub async fn refresh_rejected(&self, rejected_access_token: &str) -> AuthResult<()> {
        let mut slot = self.token.lock().await;
        match slot.as_ref() {
            None => return Err(AuthError::NotAuthorized),
            Some(token) if token.access_token != rejected_access_token => {
                debug!("Access token already rotated, skipping refresh");
                return Ok(());
            }
            Some(_) => {}
        }
        if !self.state().is_authorized() {
            return Err(AuthError::NotAuthorized);
        }

        self.transition(&SessionMachineInput::AuthorizationRejected)?;
        self.refresh_locked(&mut slot).await
    }

    /// Perform the refresh. The FSM must already be in `Refreshing` and the
    /// caller must hold the token lock.
    async fn refresh_locked(&self, slot: &mut Option<Token>) -> AuthResult<()> {
        let current = match slot.as_ref() {
            Some(token) => token.clone(),
            None => {
                self.transition(&SessionMachineInput::RefreshFailed)?;
                return Err(AuthError::MissingRefreshToken);
            }
        };

        let strategy = RefreshStrategy::new(Some(current.refresh_token.clone()))
            .requested_scopes(self.context.scopes.iter().cloned())
            .granted_scopes(current.scope.clone());

        let reply = match self.formatter.format(&strategy, &[]) {
            Ok(body) => self.request_token(&body).await,
            Err(e) => Err(e),
        };

        let response = match reply {
            Ok(TokenReply::Granted(response)) => response,
            Ok(TokenReply::Denied(err)) => {
                warn!(
                    error = %err.error,
                    description = %err.description(),
                    "Refresh token rejected, clearing session"
                );
                *slot = None;
                let cleared = self.store.clear_token(&self.context.client_id);
                self.transition(&SessionMachineInput::RefreshFailed)?;
                if let Err(e) = cleared {
                    error!(error = %e, "Failed to clear stored token after rejected refresh");
                    return Err(e.into());
                }
                return Err(AuthError::RefreshRejected {
                    description: err.description(),
                    error: err.error,
                });
            }
            Err(e) => {
                warn!(error = %e, "Token refresh interrupted, keeping current token");
                self.transition(&SessionMachineInput::RefreshInterrupted)?;
                return Err(e);
            }
        };

        let next = match response.into_refreshed_token(&current, Utc::now()) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Token refresh returned an unusable token");
                self.transition(&SessionMachineInput::RefreshInterrupted)?;
                return Err(e);
            }
        };

        if let Err(e) = self.persist(&next) {
            error!(error = %e, "Failed to persist refreshed token");
            self.transition(&SessionMachineInput::PersistenceFailed)?;
            return Err(e);
        }

        let expires_at = next.expires_at;
        let rotated = next.refresh_token != current.refresh_token;
        *slot = Some(next);
        self.transition(&SessionMachineInput::RefreshSucceeded)?;
        info!(
            expires_at = %expires_at,
            refresh_token_rotated = rotated,
            "Token refreshed successfully"
        );

        Ok(())
    }

    /// POST a token request and classify the reply.
    async fn request_token(&self, body: &TokenRequestBody) -> AuthResult<TokenReply> {
        debug!(
            url = %self.context.token_url,
            grant_type = body.get("grant_type").unwrap_or_default(),
            "Requesting token"
        );

        let response = self
            .http_client
            .post(self.context.token_url.clone())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body.encoded.clone())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let parsed: TokenResponse = serde_json::from_str(&text).map_err(|e| {
                AuthError::UnexpectedResponse(format!("malformed token response: {}", e))
            })?;
            return Ok(TokenReply::Granted(parsed));
        }

        match serde_json::from_str::<OAuthErrorResponse>(&text) {
            Ok(err) => {
                warn!(status = %status, error = %err.error, "Token endpoint returned an error");
                Ok(TokenReply::Denied(err))
            }
            Err(_) => {
                warn!(status = %status, body = %text, "Token request failed");
                Err(AuthError::UnexpectedResponse(format!(
                    "HTTP {}: {}",
                    status, text
                )))
            }
        }
    }

    fn persist(&self, token: &Token) -> AuthResult<()> {
        self.store.save(&PersistedRecord::with_token(
            self.context.client_id.clone(),
            token.clone(),
        ))?;
        Ok(())
    }

    /// Send `request` with the bearer token.
    ///
    /// An expired token is refreshed first. A 401 reply triggers one refresh
    /// and one replay of the request; any other reply is returned unchanged.
    pub async fn send(&self, request: AuthenticatedRequest) -> AuthResult<Response> {
        let (response, _) = self.send_with_token(request).await?;
        Ok(response)
    }

    /// [`send`](Self::send), also returning the access token the final reply
    /// was answered for.
    pub async fn send_with_token(
        &self,
        request: AuthenticatedRequest,
    ) -> AuthResult<(Response, String)> {
        let access_token = self.access_token().await?;
        let response = self.dispatch(&request, &access_token).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok((response, access_token));
        }

        info!(url = %request.url, "Request rejected as unauthorized, refreshing token");
        self.refresh_rejected(&access_token).await?;

        let access_token = self.access_token().await?;
        let response = self.dispatch(&request, &access_token).await?;
        Ok((response, access_token))
    }

    async fn dispatch(
        &self,
        request: &AuthenticatedRequest,
        access_token: &str,
    ) -> AuthResult<Response> {
        let mut url = request.url.clone();
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }

        debug!(method = %request.method, url = %request.url, "Sending authenticated request");

        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .bearer_auth(access_token);
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }

    /// Drop the session: clear the stored token (the client id stays) and
    /// return to `NoSession`.
    pub async fn logout(&self) -> AuthResult<()> {
        let mut slot = self.token.lock().await;
        self.store.clear_token(&self.context.client_id)?;
        *slot = None;
        self.pending_grant.lock().take();

        match self.state() {
            SessionState::Authorized => {
                self.transition(&SessionMachineInput::LogoutRequested)?;
            }
            SessionState::AwaitingUserConfirmation => {
                self.transition(&SessionMachineInput::ExchangeFailed)?;
                self.transition(&SessionMachineInput::Reset)?;
            }
            SessionState::Invalid => {
                self.transition(&SessionMachineInput::Reset)?;
            }
            SessionState::NoSession | SessionState::Refreshing => {}
        }

        info!("Logged out");
        Ok(())
    }

    /// Leave `Invalid` so the authorization can be started again.
    pub fn reset(&self) -> AuthResult<()> {
        self.expect_state(SessionState::Invalid)?;
        self.transition(&SessionMachineInput::Reset)?;
        Ok(())
    }

    pub async fn status(&self) -> SessionStatus {
        let slot = self.token.lock().await;
        let token = slot.as_ref();
        SessionStatus {
            state: self.state(),
            client_id: self.context.client_id.clone(),
            token_type: token.map(|t| t.token_type.clone()),
            expires_at: token.map(|t| t.expires_at),
            expired: token.is_some_and(|t| t.is_expired()),
            scope: token
                .map(|t| t.scope.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }
}
