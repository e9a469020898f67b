/// OS-level call UI port
///
/// Mirrors what a native incoming-call surface offers: show a ringing call
/// while the app is in the background, dismiss it, and bring the app back to
/// the foreground after the user answered from it. Answer/end actions taken on
/// that surface come back through `CallHandle::call_ui_answered` and
/// `CallHandle::call_ui_ended`.

use crate::domain::shared::value_objects::RoomId;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

#[cfg_attr(test, mockall::automock)]
pub trait CallUi: Send + Sync {
    fn display_incoming_call(&self, room_id: &RoomId, caller_label: &str, kind: CallKind);

    fn end_call(&self, room_id: &RoomId);

    fn back_to_foreground(&self);
}

/// Call UI for hosts without a native surface; only logs
#[derive(Debug, Clone, Default)]
pub struct LogCallUi;

impl CallUi for LogCallUi {
    fn display_incoming_call(&self, room_id: &RoomId, caller_label: &str, kind: CallKind) {
        info!("Incoming {:?} call from {} (room {})", kind, caller_label, room_id);
    }

    fn end_call(&self, room_id: &RoomId) {
        info!("Call UI dismissed for room {}", room_id);
    }

    fn back_to_foreground(&self) {
        info!("Bringing app to foreground");
    }
}
