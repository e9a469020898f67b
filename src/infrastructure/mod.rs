//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Media devices and streams
//! - The WebRTC peer connection adapter
//! - The reconnecting relay transport
//! - Platform ports (OS call UI, durable key-value store)

pub mod media;
pub mod platform;
pub mod protocols;
pub mod transport;
