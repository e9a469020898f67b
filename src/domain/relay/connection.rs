/// Connection record held by the relay for one live client socket

use crate::domain::shared::value_objects::{ConnectionId, UserId};
use crate::domain::signaling::ServerMessage;
use tokio::sync::mpsc;

/// Handle to one live connection
///
/// Cloning is cheap; every clone feeds the same ordered outbound queue, which
/// a single writer task drains onto the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            tx,
        }
    }

    /// Create a handle together with the receiving end of its queue
    pub fn open(user_id: UserId) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(user_id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Queue a message for this connection; false once the socket is gone
    pub fn deliver(&self, message: ServerMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}
