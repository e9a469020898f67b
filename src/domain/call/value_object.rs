//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the call this client is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    Caller,
    Callee,
}

/// Bounded waits added on top of the bare protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// Caller waiting for `inviteResponse`
    InviteResponse,
    /// Callee ringing without a user decision
    Ringing,
    /// Negotiation started but no remote track arrived
    FirstMedia,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutKind::InviteResponse => "no answer",
            TimeoutKind::Ringing => "not answered",
            TimeoutKind::FirstMedia => "media did not connect",
        };
        write!(f, "{}", s)
    }
}

/// Reason a call session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// This user hung up
    LocalHangup,
    /// The other party (or the relay) ended the call
    RemoteEnded,
    /// This user rejected an incoming call
    Rejected,
    /// The callee declined our invitation
    Declined,
    TimedOut(TimeoutKind),
    /// Camera/microphone could not be acquired
    MediaFailure,
    /// Offer/answer exchange failed
    NegotiationFailure,
    /// Relay connection dropped mid-call
    TransportLost,
}

impl EndReason {
    /// Whether the remote side has to be told with `endCall`
    pub fn notifies_remote(&self) -> bool {
        matches!(
            self,
            EndReason::LocalHangup
                | EndReason::MediaFailure
                | EndReason::NegotiationFailure
                | EndReason::TimedOut(TimeoutKind::FirstMedia)
        )
    }

    /// User-facing notice text; `None` for ordinary endings
    pub fn notice(&self) -> Option<String> {
        match self {
            EndReason::LocalHangup | EndReason::RemoteEnded | EndReason::Rejected => None,
            EndReason::Declined => Some("Call declined".to_string()),
            EndReason::TimedOut(kind) => Some(format!("Call ended: {}", kind)),
            EndReason::MediaFailure => Some("Could not access camera or microphone".to_string()),
            EndReason::NegotiationFailure => Some("Could not establish the call".to_string()),
            EndReason::TransportLost => Some("Connection to the server was lost".to_string()),
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::LocalHangup => write!(f, "local hangup"),
            EndReason::RemoteEnded => write!(f, "remote ended"),
            EndReason::Rejected => write!(f, "rejected"),
            EndReason::Declined => write!(f, "declined"),
            EndReason::TimedOut(kind) => write!(f, "timed out ({:?})", kind),
            EndReason::MediaFailure => write!(f, "media failure"),
            EndReason::NegotiationFailure => write!(f, "negotiation failure"),
            EndReason::TransportLost => write!(f, "transport lost"),
        }
    }
}
