//! OAuth2 PIN-grant authentication for ecocli.
//!
//! This crate provides:
//! - Construction of the PIN initiation request
//! - Token request bodies for the PIN exchange and refresh
//! - Session management with transparent token refresh
//! - An explicit FSM for the session lifecycle
//! - An injectable user-confirmation seam

mod auth_fsm;
mod confirmation;
mod error;
mod grant;
mod response;
mod session;
mod token_request;

pub use auth_fsm::session_machine;
pub use auth_fsm::{
    SessionMachine, SessionMachineInput, SessionMachineState, SessionState,
    SessionStateChangedPayload,
};
pub use confirmation::{ChannelConfirmation, UserConfirmation};
pub use error::{AuthError, AuthResult};
pub use grant::{
    AuthorizationGrant, GrantRequestBuilder, GrantResponse, PinPrompt, PIN_RESPONSE_TYPE,
};
pub use response::{OAuthErrorResponse, TokenResponse};
pub use session::{
    AuthenticatedRequest, SessionContext, SessionManager, SessionStateCallback, SessionStatus,
};
pub use token_request::{
    ExchangeStrategy, RefreshStrategy, TokenRequestBody, TokenRequestFormatter,
    TokenRequestStrategy, FORM_CONTENT_TYPE, PIN_GRANT_TYPE, REFRESH_GRANT_TYPE,
};
