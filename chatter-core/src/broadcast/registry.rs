//! Channel id to [`ChannelState`] map

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

use super::ChannelState;
use crate::metrics::{record_gauge, CHANNELS_MATERIALIZED};
use crate::model::{Channel, ChannelId};
use crate::store::{ChatStore, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("channel {0} does not exist")]
    NotFound(ChannelId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Process-wide cache of channel states
///
/// States are created on first reference and kept until the registry is
/// dropped. At most one state exists per channel id.
pub struct ChannelRegistry {
    store: Arc<dyn ChatStore>,
    channels: RwLock<HashMap<ChannelId, Arc<ChannelState>>>,
}

impl ChannelRegistry {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Already materialized state, without touching the store
    pub fn get(&self, id: ChannelId) -> Option<Arc<ChannelState>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// State for `id`, loading the channel from the store on first use
    ///
    /// Blocks on the store when the channel is not cached yet.
    pub fn resolve(&self, id: ChannelId) -> Result<Arc<ChannelState>, RegistryError> {
        if let Some(state) = self.get(id) {
            return Ok(state);
        }

        // no lock held across the store call; racing resolvers may both look
        // the channel up, but only the first insert wins
        let channel = self.store.channel(id)?.ok_or(RegistryError::NotFound(id))?;
        Ok(self.register(channel))
    }

    /// Materialize `channel` eagerly, returning the state that ends up cached
    pub fn register(&self, channel: Channel) -> Arc<ChannelState> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);

        let mut created = false;
        let state = channels
            .entry(channel.id)
            .or_insert_with(|| {
                created = true;
                Arc::new(ChannelState::new(channel))
            })
            .clone();

        if created {
            record_gauge(CHANNELS_MATERIALIZED, channels.len() as f64);
            debug!(channel = %state.id(), name = %state.channel().name, "Materialized channel state");
        }
        state
    }

    pub fn len(&self) -> usize {
        self.channels.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seeded() -> (Arc<dyn ChatStore>, Channel) {
        let store = MemoryStore::new();
        let admin = store.create_user("admin1", "t", true).unwrap();
        let community = store.create_community("c", admin, true).unwrap();
        let channel = store.create_channel("general", community.id, admin, false).unwrap();
        (Arc::new(store), channel)
    }

    #[test]
    fn test_resolve_unknown_channel() {
        let (store, _) = seeded();
        let registry = ChannelRegistry::new(store);

        assert!(matches!(registry.resolve(ChannelId(999)), Err(RegistryError::NotFound(ChannelId(999)))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_caches_state() {
        let (store, channel) = seeded();
        let registry = ChannelRegistry::new(store);

        assert!(registry.get(channel.id).is_none());
        let first = registry.resolve(channel.id).unwrap();
        let second = registry.resolve(channel.id).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.channel(), &channel);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_keeps_existing_state() {
        let (store, channel) = seeded();
        let registry = ChannelRegistry::new(store);

        let resolved = registry.resolve(channel.id).unwrap();
        let registered = registry.register(channel);
        assert!(Arc::ptr_eq(&resolved, &registered));
    }

    #[test]
    fn test_concurrent_resolve_yields_one_instance() {
        let (store, channel) = seeded();
        let registry = ChannelRegistry::new(store);

        let states: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| registry.resolve(channel.id).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(states.iter().all(|s| Arc::ptr_eq(s, &states[0])));
        assert_eq!(registry.len(), 1);
    }
}
