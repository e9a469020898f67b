//! Host platform collaborators: OS call UI and durable key-value store

pub mod call_ui;
pub mod identity;
pub mod store;

pub use call_ui::{CallKind, CallUi, LogCallUi};
pub use identity::load_or_create_identifier;
pub use store::{FileStore, KeyValueStore, MemoryStore, PENDING_CALL_KEY, SELF_IDENTIFIER_KEY};
