//! PeerCall - peer-to-peer audio/video calling
//!
//! A signaling relay that pairs two users in a room and forwards their
//! offer/answer and ICE candidates, plus the client-side call controller that
//! drives a WebRTC session through that relay.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
