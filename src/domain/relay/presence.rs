/// Presence registry: user identifier -> live connection

use crate::domain::relay::connection::ConnectionHandle;
use crate::domain::shared::value_objects::{ConnectionId, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Maps each identifier to at most one live connection
pub struct PresenceRegistry {
    entries: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection, superseding any previous record for the same id
    ///
    /// Returns the superseded handle, if any.
    pub async fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(handle.user_id().clone(), handle);
        if let Some(ref old) = previous {
            debug!("Presence for {} superseded (old connection {})", old.user_id(), old.id());
        }
        previous
    }

    pub async fn resolve(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        let entries = self.entries.read().await;
        entries.get(user_id).cloned()
    }

    /// Remove the record for an identifier unconditionally
    pub async fn unregister(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        let mut entries = self.entries.write().await;
        entries.remove(user_id)
    }

    /// Remove the record only while it still belongs to `connection_id`
    ///
    /// A superseded connection closing late must not evict its replacement.
    pub async fn unregister_connection(&self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(user_id) {
            Some(current) if current.id() == connection_id => {
                entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
