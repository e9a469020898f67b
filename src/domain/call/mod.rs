//! Call bounded context - client-side call lifecycle

pub mod state;
pub mod value_object;

pub use state::{CallState, Trigger};
pub use value_object::{CallRole, EndReason, TimeoutKind};
