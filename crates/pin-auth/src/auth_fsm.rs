//! PIN-grant session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐  TokenLoaded
//! │    NoSession    │ ─────────────────────────────────┐
//! └────────┬────────┘                                  │
//!          │ GrantIssued              InitiationFailed │
//!          ▼                          ──► Invalid      │
//! ┌──────────────────────────┐                         │
//! │ AwaitingUserConfirmation │ ── ExchangeFailed ──► Invalid
//! └────────┬─────────────────┘                         │
//!          │ ExchangeSucceeded                         │
//!          ▼                                           ▼
//! ┌─────────────────┐  TokenExpired /        ┌─────────────────┐
//! │   Authorized    │  AuthorizationRejected │   Refreshing    │
//! │                 │ ─────────────────────► │                 │
//! │                 │ ◄───────────────────── │                 │
//! └────────┬────────┘  RefreshSucceeded /    └────────┬────────┘
//!          │           RefreshInterrupted             │
//!          │ LogoutRequested          RefreshFailed   │ PersistenceFailed
//!          ▼                          ──► NoSession   ▼
//!      NoSession                                   Invalid ── Reset ──► NoSession
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(NoSession)

    NoSession => {
        TokenLoaded => Authorized,
        GrantIssued => AwaitingUserConfirmation,
        InitiationFailed => Invalid
    },
    AwaitingUserConfirmation => {
        ExchangeSucceeded => Authorized,
        ExchangeFailed => Invalid
    },
    Authorized => {
        TokenExpired => Refreshing,
        AuthorizationRejected => Refreshing,
        LogoutRequested => NoSession
    },
    Refreshing => {
        RefreshSucceeded => Authorized,
        // Transport failure: the held token is unchanged
        RefreshInterrupted => Authorized,
        RefreshFailed => NoSession,
        PersistenceFailed => Invalid
    },
    Invalid => {
        Reset => NoSession
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state for external consumption (status output, callbacks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No token held.
    NoSession,
    /// PIN issued, waiting for the user to register it.
    AwaitingUserConfirmation,
    /// Holding a usable token.
    Authorized,
    /// Refresh request in flight.
    Refreshing,
    /// Authorization failed; the flow must be restarted.
    Invalid,
}

impl SessionState {
    pub fn is_authorized(&self) -> bool {
        matches!(self, SessionState::Authorized)
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::NoSession => SessionState::NoSession,
            SessionMachineState::AwaitingUserConfirmation => {
                SessionState::AwaitingUserConfirmation
            }
            SessionMachineState::Authorized => SessionState::Authorized,
            SessionMachineState::Refreshing => SessionState::Refreshing,
            SessionMachineState::Invalid => SessionState::Invalid,
        }
    }
}

/// Payload for session state change notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChangedPayload {
    pub previous: SessionState,
    pub state: SessionState,
}
