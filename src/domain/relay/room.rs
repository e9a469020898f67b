/// Room membership: groups of at most two connections under a room id

use crate::domain::relay::connection::ConnectionHandle;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ConnectionId, RoomId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Two-party calls only
pub const ROOM_CAPACITY: usize = 2;

/// Outcome of a join request
#[derive(Debug)]
pub enum JoinOutcome {
    /// Newly added; carries the members that were already present
    Joined { existing: Vec<ConnectionHandle> },
    /// Connection was already a member, nothing changed
    AlreadyMember,
}

pub struct RoomMembership {
    rooms: RwLock<HashMap<RoomId, Vec<ConnectionHandle>>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub async fn join(&self, room_id: &RoomId, handle: ConnectionHandle) -> Result<JoinOutcome> {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room_id.clone()).or_default();

        if members.iter().any(|m| m.id() == handle.id()) {
            return Ok(JoinOutcome::AlreadyMember);
        }
        if members.len() >= ROOM_CAPACITY {
            return Err(DomainError::Conflict(format!("Room {} is full", room_id)));
        }

        let existing = members.clone();
        members.push(handle);
        Ok(JoinOutcome::Joined { existing })
    }

    /// Remove a connection from a room; the room is dropped once empty
    pub async fn leave(&self, room_id: &RoomId, connection_id: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room_id) else {
            return false;
        };

        let before = members.len();
        members.retain(|m| m.id() != connection_id);
        let removed = members.len() != before;
        if members.is_empty() {
            rooms.remove(room_id);
        }
        removed
    }

    /// Remove a connection from every room it belongs to
    ///
    /// Returns, per affected room, the members still present.
    pub async fn leave_all(&self, connection_id: ConnectionId) -> Vec<(RoomId, Vec<ConnectionHandle>)> {
        let mut rooms = self.rooms.write().await;
        let mut affected = Vec::new();

        rooms.retain(|room_id, members| {
            let before = members.len();
            members.retain(|m| m.id() != connection_id);
            if members.len() != before {
                affected.push((room_id.clone(), members.clone()));
            }
            !members.is_empty()
        });

        affected
    }

    /// Destroy a room, returning everyone who was in it
    pub async fn close(&self, room_id: &RoomId) -> Vec<ConnectionHandle> {
        let mut rooms = self.rooms.write().await;
        rooms.remove(room_id).unwrap_or_default()
    }

    pub async fn is_member(&self, room_id: &RoomId, connection_id: ConnectionId) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|members| members.iter().any(|m| m.id() == connection_id))
            .unwrap_or(false)
    }

    /// Members of a room other than `connection_id`
    pub async fn others(&self, room_id: &RoomId, connection_id: ConnectionId) -> Vec<ConnectionHandle> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.id() != connection_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn member_count(&self, room_id: &RoomId) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(Vec::len).unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomMembership {
    fn default() -> Self {
        Self::new()
    }
}
