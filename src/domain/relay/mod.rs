//! Relay bounded context - presence registry and room membership
//!
//! Pure in-memory, process-lifetime state. Mutations never perform I/O while
//! holding a lock; delivery only pushes onto a connection's outbound queue.

pub mod connection;
pub mod presence;
pub mod room;

pub use connection::ConnectionHandle;
pub use presence::PresenceRegistry;
pub use room::{JoinOutcome, RoomMembership, ROOM_CAPACITY};
