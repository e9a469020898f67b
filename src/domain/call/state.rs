/// Call session state and its transition table

use crate::domain::call::value_object::{CallRole, EndReason, TimeoutKind};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use serde::{Deserialize, Serialize};

/// Client-side call state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum CallState {
    /// No call
    Idle,
    /// We invited someone and wait for their response
    Outgoing,
    /// Someone invited us; waiting for the user
    Ringing,
    /// Offer/answer in progress
    Negotiating(CallRole),
    /// Remote media has arrived
    Active,
    /// Terminal; cleanup runs before returning to `Idle`
    Ended(EndReason),
}

/// Everything that can move the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    UserInitiatesCall,
    IncomingCall,
    UserAccepts,
    UserRejects,
    InviteAccepted,
    InviteDeclined,
    RemoteCandidate,
    RemoteTrack,
    UserHangsUp,
    RemoteCallEnded,
    TimedOut(TimeoutKind),
    MediaFailed,
    NegotiationFailed,
    TransportLost,
    CleanupComplete,
}

impl CallState {
    /// Apply a trigger, returning the next state
    ///
    /// Rejected triggers yield `InvalidStateTransition` and leave the caller's
    /// state untouched.
    pub fn on(&self, trigger: &Trigger) -> Result<CallState> {
        use CallState::*;
        use Trigger::*;

        let next = match (self, trigger) {
            // From Idle
            (Idle, UserInitiatesCall) => Outgoing,
            (Idle, IncomingCall) => Ringing,

            // Callee decision
            (Ringing, UserAccepts) => Negotiating(CallRole::Callee),
            (Ringing, UserRejects) => Ended(EndReason::Rejected),
            (Ringing, TimedOut(TimeoutKind::Ringing)) => Ended(EndReason::TimedOut(TimeoutKind::Ringing)),

            // Caller waiting for the response
            (Outgoing, InviteAccepted) => Negotiating(CallRole::Caller),
            (Outgoing, InviteDeclined) => Ended(EndReason::Declined),
            (Outgoing, TimedOut(TimeoutKind::InviteResponse)) => {
                Ended(EndReason::TimedOut(TimeoutKind::InviteResponse))
            }

            // Candidates may trickle in before the answer is processed and
            // keep arriving after media starts
            (Outgoing, RemoteCandidate) => Outgoing,
            (Negotiating(role), RemoteCandidate) => Negotiating(*role),
            (Active, RemoteCandidate) => Active,

            (Negotiating(_), RemoteTrack) => Active,
            (Active, RemoteTrack) => Active,
            (Negotiating(_), TimedOut(TimeoutKind::FirstMedia)) => {
                Ended(EndReason::TimedOut(TimeoutKind::FirstMedia))
            }

            // Terminal triggers valid from any in-call state
            (Outgoing | Negotiating(_) | Active, UserHangsUp) => Ended(EndReason::LocalHangup),
            (Ringing, UserHangsUp) => Ended(EndReason::Rejected),
            (Outgoing | Ringing | Negotiating(_) | Active, RemoteCallEnded) => Ended(EndReason::RemoteEnded),
            (Outgoing | Ringing | Negotiating(_) | Active, MediaFailed) => Ended(EndReason::MediaFailure),
            (Outgoing | Ringing | Negotiating(_) | Active, NegotiationFailed) => {
                Ended(EndReason::NegotiationFailure)
            }
            (Outgoing | Ringing | Negotiating(_) | Active, TransportLost) => Ended(EndReason::TransportLost),

            (Ended(_), CleanupComplete) => Idle,

            _ => {
                return Err(DomainError::InvalidStateTransition(format!(
                    "{:?} is not accepted in state {:?}",
                    trigger, self
                )))
            }
        };

        Ok(next)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    /// Non-idle and not yet ended
    pub fn is_in_call(&self) -> bool {
        !matches!(self, CallState::Idle | CallState::Ended(_))
    }

    pub fn role(&self) -> Option<CallRole> {
        match self {
            CallState::Outgoing => Some(CallRole::Caller),
            CallState::Ringing => Some(CallRole::Callee),
            CallState::Negotiating(role) => Some(*role),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Outgoing => "outgoing",
            CallState::Ringing => "ringing",
            CallState::Negotiating(_) => "negotiating",
            CallState::Active => "active",
            CallState::Ended(_) => "ended",
        }
    }
}

impl Default for CallState {
    fn default() -> Self {
        CallState::Idle
    }
}
