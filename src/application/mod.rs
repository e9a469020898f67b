//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases:
//! - The signaling relay that routes messages between connected users
//! - The client call controller that drives one call at a time

pub mod call;
pub mod relay;

pub use relay::SignalingRelay;
