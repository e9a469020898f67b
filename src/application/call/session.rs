//! Call session record
//!
//! Owned exclusively by the controller actor. Everything here is reset on
//! every terminal transition; only the epoch survives, and it is bumped so
//! completions from the previous call are recognizably stale.

use crate::domain::call::{CallState, EndReason};
use crate::domain::shared::value_objects::{RoomId, UserId};
use crate::domain::signaling::{IceCandidate, SessionDescription};
use crate::infrastructure::media::MediaStream;
use chrono::{DateTime, Utc};

/// Asynchronous work the controller is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    /// Caller: peer connection, local media and offer
    PreparingOffer,
    /// Callee: peer connection and local media
    PreparingMedia,
    /// Callee: applying the offer and creating the answer
    CreatingAnswer,
    /// Caller: applying the remote answer
    ApplyingAnswer,
}

#[derive(Debug, Default)]
pub struct CallSession {
    pub state: CallState,
    pub epoch: u64,
    pub other_user_id: Option<UserId>,
    pub room_id: Option<RoomId>,
    /// This client sent `joinRoom` for `room_id`
    pub joined_room: bool,
    /// Caller only: `inviteToCall` went out
    pub invite_sent: bool,
    /// The remote side is in the room, local candidates may be trickled
    pub peer_in_room: bool,
    pub remote_description_set: bool,
    /// Local media is attached to the peer connection
    pub media_ready: bool,
    /// Callee: offer received with the invite or by signal
    pub remote_offer: Option<SessionDescription>,
    /// Caller: answer that arrived before `inviteResponse`
    pub early_answer: Option<SessionDescription>,
    pub pending_local_candidates: Vec<IceCandidate>,
    pub pending_remote_candidates: Vec<IceCandidate>,
    pub pending_op: Option<PendingOp>,
    /// The OS call UI is showing this call
    pub call_ui_shown: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Start a fresh session in `state` under a new epoch
    pub fn begin(&mut self, state: CallState, other_user_id: UserId, room_id: RoomId) -> u64 {
        let epoch = self.epoch + 1;
        *self = CallSession {
            state,
            epoch,
            other_user_id: Some(other_user_id),
            room_id: Some(room_id),
            ..Default::default()
        };
        epoch
    }

    /// Drop all call data and move past the current epoch
    pub fn reset(&mut self) {
        let epoch = self.epoch + 1;
        *self = CallSession {
            epoch,
            ..Default::default()
        };
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// True when `room_id` is the room of the running call
    pub fn in_room(&self, room_id: &RoomId) -> bool {
        self.room_id.as_ref() == Some(room_id)
    }
}

/// Read-only view of the client for presentation layers
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub state: CallState,
    pub room_id: Option<RoomId>,
    pub other_user_id: Option<UserId>,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    pub has_peer_connection: bool,
    pub last_end_reason: Option<EndReason>,
    pub started_at: Option<DateTime<Utc>>,
    pub foreground: bool,
    pub transport_connected: bool,
}
