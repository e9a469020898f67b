//! Client side of the relay connection

pub mod websocket;

use crate::domain::shared::result::Result;
use crate::domain::signaling::{ClientMessage, ServerMessage};
use std::sync::Arc;

pub use websocket::{ReconnectPolicy, WsTransport};

/// Connectivity changes and inbound messages
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message(ServerMessage),
}

pub type TransportEventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Outbound half of the relay connection
///
/// `send` never blocks; it fails with `TransportDisconnected` instead of
/// queueing while the connection is down.
#[cfg_attr(test, mockall::automock)]
pub trait SignalingTransport: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<()>;

    fn is_connected(&self) -> bool;
}
