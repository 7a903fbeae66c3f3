//! Read-only views over the cache.

use enticache_model::{ChangeState, Entity, EntityCache, EntityCollection, EntityKey};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Decides whether an entity passes the collection's filter value.
pub type EntityFilterFn = Arc<dyn Fn(&Entity, &Value) -> bool + Send + Sync>;

/// Selectors for one entity type.
///
/// Every selector reads the cache and never mutates it. A missing
/// collection reads as empty and unloaded.
#[derive(Clone)]
pub struct EntitySelectors {
    entity_name: String,
    filter_fn: Option<EntityFilterFn>,
}

impl EntitySelectors {
    /// Creates selectors for an entity type.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            filter_fn: None,
        }
    }

    /// Sets the function applied by [`EntitySelectors::filtered_entities`].
    pub fn with_filter_fn<F>(mut self, filter_fn: F) -> Self
    where
        F: Fn(&Entity, &Value) -> bool + Send + Sync + 'static,
    {
        self.filter_fn = Some(Arc::new(filter_fn));
        self
    }

    /// The collection.
    pub fn collection<'a>(&self, cache: &'a EntityCache) -> Option<&'a EntityCollection> {
        cache.get(&self.entity_name)
    }

    /// Entities in `ids` order.
    pub fn entities(&self, cache: &EntityCache) -> Vec<Entity> {
        self.collection(cache)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys in order.
    pub fn keys(&self, cache: &EntityCache) -> Vec<EntityKey> {
        self.collection(cache)
            .map(|c| c.ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entities.
    pub fn count(&self, cache: &EntityCache) -> usize {
        self.collection(cache).map_or(0, EntityCollection::len)
    }

    /// Entity by key.
    pub fn by_key<'a>(&self, cache: &'a EntityCache, key: &EntityKey) -> Option<&'a Entity> {
        self.collection(cache).and_then(|c| c.get(key))
    }

    /// Entities passing the collection's filter.
    ///
    /// Without a filter value or a filter function every entity passes.
    pub fn filtered_entities(&self, cache: &EntityCache) -> Vec<Entity> {
        let Some(collection) = self.collection(cache) else {
            return Vec::new();
        };
        match (&collection.filter, &self.filter_fn) {
            (Some(filter), Some(filter_fn)) => collection
                .iter()
                .filter(|entity| filter_fn(entity, filter))
                .cloned()
                .collect(),
            _ => collection.iter().cloned().collect(),
        }
    }

    /// Tracked changes, ordered by key.
    pub fn changes(&self, cache: &EntityCache) -> Vec<(EntityKey, ChangeState)> {
        let mut changes: Vec<(EntityKey, ChangeState)> = self
            .collection(cache)
            .map(|c| {
                c.change_state
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        changes
    }

    /// Returns true if the collection has unsaved changes.
    pub fn has_changes(&self, cache: &EntityCache) -> bool {
        self.collection(cache).is_some_and(EntityCollection::has_changes)
    }

    /// Loading flag.
    pub fn loading(&self, cache: &EntityCache) -> bool {
        self.collection(cache).is_some_and(|c| c.loading)
    }

    /// Loaded flag.
    pub fn loaded(&self, cache: &EntityCache) -> bool {
        self.collection(cache).is_some_and(|c| c.loaded)
    }

    /// Filter value.
    pub fn filter<'a>(&self, cache: &'a EntityCache) -> Option<&'a Value> {
        self.collection(cache).and_then(|c| c.filter.as_ref())
    }
}

impl fmt::Debug for EntitySelectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySelectors")
            .field("entity_name", &self.entity_name)
            .finish_non_exhaustive()
    }
}
