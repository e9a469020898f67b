//! Signaling protocol - wire messages exchanged through the relay

pub mod message;

pub use message::{
    ClientMessage, IceCandidate, SdpType, ServerMessage, SessionDescription, SignalKind,
};
