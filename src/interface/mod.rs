//! Interface layer - External interfaces
//!
//! This layer handles:
//! - The relay WebSocket endpoint
//! - Health and Prometheus endpoints

pub mod api;
