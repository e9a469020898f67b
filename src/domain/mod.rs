//! Domain layer - Core rules of the calling system
//!
//! This layer contains:
//! - Shared value objects and the error taxonomy
//! - The signaling wire protocol
//! - Relay presence and room registries
//! - The call state transition table

pub mod call;
pub mod relay;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{DomainError, Result};
