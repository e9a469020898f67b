/// Installation identifier

use super::store::{KeyValueStore, SELF_IDENTIFIER_KEY};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::UserId;
use tracing::{info, warn};

/// Return the persisted identifier, generating and storing one on first use
///
/// A stored value that no longer validates is replaced.
pub fn load_or_create_identifier(store: &dyn KeyValueStore) -> Result<UserId> {
    if let Some(stored) = store.get(SELF_IDENTIFIER_KEY) {
        match UserId::parse(stored) {
            Ok(id) => return Ok(id),
            Err(e) => warn!("Discarding invalid stored identifier: {}", e),
        }
    }

    let id = UserId::generate();
    store.set(SELF_IDENTIFIER_KEY, id.as_str())?;
    info!("Generated installation identifier {}", id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::platform::store::{MemoryStore, MockKeyValueStore};

    #[test]
    fn test_identifier_is_stable() {
        let store = MemoryStore::new();
        let first = load_or_create_identifier(&store).unwrap();
        let second = load_or_create_identifier(&store).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_existing_identifier_is_not_rewritten() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .withf(|key| key == SELF_IDENTIFIER_KEY)
            .returning(|_| Some("alice".to_string()));
        store.expect_set().never();

        let id = load_or_create_identifier(&store).unwrap();
        assert_eq!(id.as_str(), "alice");
    }
}
