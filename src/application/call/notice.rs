//! Presentation notices
//!
//! The only channel through which call events reach a UI. Errors arrive as
//! user-facing text in `Failed`, never as raw error values.

use crate::domain::call::CallState;
use crate::domain::shared::value_objects::{RoomId, UserId};
use crate::infrastructure::media::{CameraFacing, TrackKind};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CallNotice {
    StateChanged { state: CallState },
    /// Foreground incoming call; the UI should offer accept/reject
    IncomingCall { caller_id: UserId, room_id: RoomId },
    /// The answer went out; switch to the in-call view
    ShowActiveCall { room_id: RoomId },
    MediaToggled { kind: TrackKind, enabled: bool },
    CameraSwitched { facing: CameraFacing },
    Failed { message: String },
    TransportStatus { connected: bool },
}

/// Notice broadcaster
#[derive(Clone)]
pub struct NoticeBroadcaster {
    tx: broadcast::Sender<CallNotice>,
}

impl NoticeBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn publish(&self, notice: CallNotice) {
        // No subscribers is fine
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallNotice> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NoticeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
