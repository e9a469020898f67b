//! API interface implementations

pub mod metrics_handler;
pub mod router;
pub mod ws_handler;

pub use metrics_handler::init_metrics;
pub use router::build_router;
