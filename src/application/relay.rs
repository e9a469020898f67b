/// Signaling relay service
///
/// One instance per process, shared by reference with every connection
/// handler. Forwarding is best-effort: the sender never gets a delivery
/// acknowledgment, and an unreachable callee is dropped silently.

use crate::domain::relay::{ConnectionHandle, JoinOutcome, PresenceRegistry, RoomMembership};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{RoomId, UserId};
use crate::domain::signaling::{ClientMessage, ServerMessage, SessionDescription, SignalKind};
use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the presence registry and room membership for the whole relay
pub struct SignalingRelay {
    presence: PresenceRegistry,
    rooms: RoomMembership,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self {
            presence: PresenceRegistry::new(),
            rooms: RoomMembership::new(),
        }
    }

    /// Register a new connection for `user_id`
    ///
    /// Returns the handle plus the queue a writer task must drain.
    pub async fn connect(&self, user_id: UserId) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (handle, rx) = ConnectionHandle::open(user_id);
        if let Some(old) = self.presence.register(handle.clone()).await {
            info!(
                "User {} reconnected, connection {} supersedes {}",
                handle.user_id(),
                handle.id(),
                old.id()
            );
        } else {
            info!("User connected: {} (connection {})", handle.user_id(), handle.id());
        }
        self.update_gauges().await;
        (handle, rx)
    }

    /// Tear down everything tied to a closed connection
    ///
    /// Remaining room members get `callEnded` so their call does not hang.
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        self.presence
            .unregister_connection(handle.user_id(), handle.id())
            .await;

        for (room_id, remaining) in self.rooms.leave_all(handle.id()).await {
            debug!("Connection {} left room {} on disconnect", handle.id(), room_id);
            for member in remaining {
                member.deliver(ServerMessage::CallEnded {
                    room_id: Some(room_id.clone()),
                });
            }
        }

        info!("User disconnected: {} (connection {})", handle.user_id(), handle.id());
        self.update_gauges().await;
    }

    /// Dispatch one inbound message from `sender`
    pub async fn handle(&self, sender: &ConnectionHandle, message: ClientMessage) {
        counter!("relay_messages_total", "kind" => message.name()).increment(1);

        match message {
            ClientMessage::InviteToCall { callee_id, room_id, offer } => {
                // Unreachable callees are silently dropped
                let _ = self.invite_to_call(sender, &callee_id, room_id, offer).await;
            }
            ClientMessage::InviteResponse { caller_id, accepted, room_id } => {
                self.invite_response(&caller_id, accepted, room_id).await;
            }
            ClientMessage::JoinRoom { room_id } => self.join_room(sender, room_id).await,
            ClientMessage::LeaveRoom { room_id } => self.leave_room(sender, &room_id).await,
            ClientMessage::Signal { room_id, kind, data } => {
                self.signal(sender, room_id, kind, data).await
            }
            ClientMessage::EndCall { room_id } => self.end_call(sender, room_id).await,
        }
    }

    /// Forward `incomingCall` to the callee if it is online
    pub async fn invite_to_call(
        &self,
        sender: &ConnectionHandle,
        callee_id: &UserId,
        room_id: RoomId,
        offer: Option<SessionDescription>,
    ) -> Result<(), DomainError> {
        let Some(callee) = self.presence.resolve(callee_id).await else {
            debug!("Callee {} is offline, invite for room {} dropped", callee_id, room_id);
            counter!("relay_messages_dropped_total", "reason" => "unreachable").increment(1);
            return Err(DomainError::Unreachable(callee_id.to_string()));
        };

        info!("Invite {} -> {} (room {})", sender.user_id(), callee_id, room_id);
        callee.deliver(ServerMessage::IncomingCall {
            caller_id: sender.user_id().clone(),
            room_id,
            offer,
        });
        Ok(())
    }

    pub async fn invite_response(&self, caller_id: &UserId, accepted: bool, room_id: RoomId) {
        let Some(caller) = self.presence.resolve(caller_id).await else {
            debug!("Caller {} is offline, invite response dropped", caller_id);
            counter!("relay_messages_dropped_total", "reason" => "unreachable").increment(1);
            return;
        };

        info!("Invite response to {}: accepted={} (room {})", caller_id, accepted, room_id);
        caller.deliver(ServerMessage::InviteResponse { accepted, room_id });
    }

    /// Add the sender to a room and tell the members already present
    pub async fn join_room(&self, sender: &ConnectionHandle, room_id: RoomId) {
        match self.rooms.join(&room_id, sender.clone()).await {
            Ok(JoinOutcome::Joined { existing }) => {
                info!("{} joined room {}", sender.user_id(), room_id);
                for member in existing {
                    member.deliver(ServerMessage::RoomJoined {
                        room_id: room_id.clone(),
                    });
                }
            }
            Ok(JoinOutcome::AlreadyMember) => {
                debug!("{} already in room {}, join ignored", sender.user_id(), room_id);
            }
            Err(e) => {
                warn!("{} could not join room {}: {}", sender.user_id(), room_id, e);
                counter!("relay_messages_dropped_total", "reason" => "room_full").increment(1);
                sender.deliver(ServerMessage::error("ROOM_FULL", e.to_string()));
            }
        }
        self.update_gauges().await;
    }

    pub async fn leave_room(&self, sender: &ConnectionHandle, room_id: &RoomId) {
        if self.rooms.leave(room_id, sender.id()).await {
            info!("{} left room {}", sender.user_id(), room_id);
        }
        self.update_gauges().await;
    }

    /// Relay negotiation data verbatim to the other room members
    pub async fn signal(&self, sender: &ConnectionHandle, room_id: RoomId, kind: SignalKind, data: Value) {
        if data.is_null() {
            warn!("Dropping {} signal without data from {}", kind.as_str(), sender.user_id());
            counter!("relay_messages_dropped_total", "reason" => "malformed").increment(1);
            sender.deliver(ServerMessage::error("PARSE_ERROR", "signal data must not be null"));
            return;
        }

        if !self.rooms.is_member(&room_id, sender.id()).await {
            warn!("{} signaled into room {} without joining", sender.user_id(), room_id);
            counter!("relay_messages_dropped_total", "reason" => "not_in_room").increment(1);
            sender.deliver(ServerMessage::error(
                "NOT_IN_ROOM",
                format!("join room {} before signaling", room_id),
            ));
            return;
        }

        debug!("SIGNAL {} {} from {}", room_id, kind.as_str(), sender.user_id());
        for member in self.rooms.others(&room_id, sender.id()).await {
            member.deliver(ServerMessage::Signal {
                room_id: room_id.clone(),
                kind,
                data: data.clone(),
            });
        }
    }

    /// Broadcast `callEnded` to every member, then destroy the room
    pub async fn end_call(&self, sender: &ConnectionHandle, room_id: RoomId) {
        let members = self.rooms.close(&room_id).await;
        for member in &members {
            member.deliver(ServerMessage::CallEnded {
                room_id: Some(room_id.clone()),
            });
        }
        info!(
            "Call ended by {} and room {} closed ({} members)",
            sender.user_id(),
            room_id,
            members.len()
        );
        self.update_gauges().await;
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomMembership {
        &self.rooms
    }

    async fn update_gauges(&self) {
        gauge!("relay_connected_users").set(self.presence.len().await as f64);
        gauge!("relay_open_rooms").set(self.rooms.room_count().await as f64);
    }
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new()
    }
}
