/// Signaling wire messages
///
/// Every frame on the relay socket is a JSON object of the form
/// `{"event": "<name>", "payload": {...}}`. Client and server directions are
/// separate enums so that a client can never forge a server-only event.

use crate::domain::shared::value_objects::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of negotiation payload carried by a `signal` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "ice-candidate")]
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }
}

/// SDP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP session description, `{type, sdp}` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

/// Messages sent by a client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    InviteToCall {
        callee_id: UserId,
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offer: Option<SessionDescription>,
    },
    #[serde(rename_all = "camelCase")]
    InviteResponse {
        caller_id: UserId,
        accepted: bool,
        room_id: RoomId,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    Signal {
        room_id: RoomId,
        #[serde(rename = "type")]
        kind: SignalKind,
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    EndCall { room_id: RoomId },
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::InviteToCall { .. } => "inviteToCall",
            ClientMessage::InviteResponse { .. } => "inviteResponse",
            ClientMessage::JoinRoom { .. } => "joinRoom",
            ClientMessage::LeaveRoom { .. } => "leaveRoom",
            ClientMessage::Signal { .. } => "signal",
            ClientMessage::EndCall { .. } => "endCall",
        }
    }

    pub fn answer_signal(room_id: RoomId, answer: &SessionDescription) -> Self {
        Self::signal(room_id, SignalKind::Answer, answer)
    }

    pub fn candidate_signal(room_id: RoomId, candidate: &IceCandidate) -> Self {
        Self::signal(room_id, SignalKind::IceCandidate, candidate)
    }

    fn signal<T: Serialize>(room_id: RoomId, kind: SignalKind, data: &T) -> Self {
        ClientMessage::Signal {
            room_id,
            kind,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }
}

/// Messages sent by the relay to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        caller_id: UserId,
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offer: Option<SessionDescription>,
    },
    #[serde(rename_all = "camelCase")]
    InviteResponse { accepted: bool, room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    Signal {
        room_id: RoomId,
        #[serde(rename = "type")]
        kind: SignalKind,
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    CallEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::IncomingCall { .. } => "incomingCall",
            ServerMessage::InviteResponse { .. } => "inviteResponse",
            ServerMessage::RoomJoined { .. } => "roomJoined",
            ServerMessage::Signal { .. } => "signal",
            ServerMessage::CallEnded { .. } => "callEnded",
            ServerMessage::Error { .. } => "error",
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
