//! Cached collections and the entity cache.
//!
//! All containers are persistent (`im`) structures: cloning a collection is
//! cheap and every mutation produces a new value that shares the untouched
//! branches with the old one.

use crate::change::{ChangeState, ChangeStateMap, ChangeType};
use crate::entity::{Entity, EntityKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cached entities of one type plus loading and change metadata.
///
/// # Invariants
///
/// - `ids` holds each key at most once, in insertion or sort order
/// - `entities` holds exactly the keys in `ids`
/// - `change_state` only holds keys with unsaved local mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "CollectionSnapshot", from = "CollectionSnapshot")]
pub struct EntityCollection {
    /// Entity type name.
    pub entity_name: String,
    /// Ordered keys.
    pub ids: im::Vector<EntityKey>,
    /// Entities by key.
    pub entities: im::HashMap<EntityKey, Entity>,
    /// Unsaved local mutations.
    pub change_state: ChangeStateMap,
    /// Opaque client-side filter value.
    pub filter: Option<Value>,
    /// True once the collection has been fully loaded.
    pub loaded: bool,
    /// True while a request for this collection is in flight.
    pub loading: bool,
}

impl EntityCollection {
    /// Creates an empty, unloaded collection.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ids: im::Vector::new(),
            entities: im::HashMap::new(),
            change_state: ChangeStateMap::new(),
            filter: None,
            loaded: false,
            loading: false,
        }
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no entity is cached.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Looks up an entity by key.
    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    /// Returns true if an entity with this key is cached.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Iterates entities in `ids` order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.ids.iter().filter_map(move |id| self.entities.get(id))
    }

    /// Returns the tracked change for a key.
    pub fn change_of(&self, key: &EntityKey) -> Option<&ChangeState> {
        self.change_state.get(key)
    }

    /// Returns the change type of a key, `Unchanged` when untracked.
    pub fn change_type_of(&self, key: &EntityKey) -> ChangeType {
        self.change_state
            .get(key)
            .map(|change| change.change_type)
            .unwrap_or(ChangeType::Unchanged)
    }

    /// Returns true if any local mutation is unsaved.
    pub fn has_changes(&self) -> bool {
        !self.change_state.is_empty()
    }

    /// Captures the collection in its serialisable form.
    pub fn snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot::from(self.clone())
    }
}

/// Serialisable form of an `EntityCollection`.
///
/// `loading` is not captured: a restored collection has nothing in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot {
    /// Entity type name.
    pub entity_name: String,
    /// Ordered keys.
    pub ids: Vec<EntityKey>,
    /// Entities in `ids` order.
    pub entities: Vec<Entity>,
    /// Tracked changes.
    pub change_state: Vec<(EntityKey, ChangeState)>,
    /// Filter value.
    #[serde(default)]
    pub filter: Option<Value>,
    /// Whether the collection had been loaded.
    #[serde(default)]
    pub loaded: bool,
}

impl From<EntityCollection> for CollectionSnapshot {
    fn from(collection: EntityCollection) -> Self {
        let entities = collection
            .ids
            .iter()
            .filter_map(|id| collection.entities.get(id).cloned())
            .collect();
        let mut change_state: Vec<(EntityKey, ChangeState)> =
            collection.change_state.into_iter().collect();
        change_state.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            entity_name: collection.entity_name,
            ids: collection.ids.into_iter().collect(),
            entities,
            change_state,
            filter: collection.filter,
            loaded: collection.loaded,
        }
    }
}

impl From<CollectionSnapshot> for EntityCollection {
    fn from(snapshot: CollectionSnapshot) -> Self {
        let mut collection = EntityCollection::new(snapshot.entity_name);
        for (id, entity) in snapshot.ids.into_iter().zip(snapshot.entities) {
            if collection.entities.insert(id.clone(), entity).is_none() {
                collection.ids.push_back(id);
            }
        }
        collection.change_state = snapshot.change_state.into_iter().collect();
        collection.filter = snapshot.filter;
        collection.loaded = snapshot.loaded;
        collection
    }
}

/// The whole cache: one collection per entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityCache {
    collections: im::HashMap<String, EntityCollection>,
}

impl EntityCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collection for an entity type.
    pub fn get(&self, entity_name: &str) -> Option<&EntityCollection> {
        self.collections.get(entity_name)
    }

    /// Returns true if a collection exists for the entity type.
    pub fn contains(&self, entity_name: &str) -> bool {
        self.collections.contains_key(entity_name)
    }

    /// Returns a cache with `collection` stored under its entity name.
    pub fn with_collection(mut self, collection: EntityCollection) -> Self {
        self.collections
            .insert(collection.entity_name.clone(), collection);
        self
    }

    /// Names of all cached entity types, sorted.
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Iterates all collections.
    pub fn iter(&self) -> impl Iterator<Item = &EntityCollection> + '_ {
        self.collections.values()
    }

    /// Number of collections.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// Returns true if no collection exists.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> EntityCollection {
        let mut collection = EntityCollection::new("Hero");
        for (id, name) in [(2, "B"), (1, "A")] {
            let key = EntityKey::Num(id);
            collection.ids.push_back(key.clone());
            collection
                .entities
                .insert(key, json!({"id": id, "name": name}));
        }
        collection.change_state.insert(
            EntityKey::Num(1),
            ChangeState::updated(json!({"id": 1, "name": "Old"})),
        );
        collection.loaded = true;
        collection.loading = true;
        collection
    }

    #[test]
    fn iterates_in_id_order() {
        let names: Vec<_> = sample().iter().map(|e| e["name"].clone()).collect();
        assert_eq!(names, vec![json!("B"), json!("A")]);
    }

    #[test]
    fn change_type_defaults_to_unchanged() {
        let collection = sample();
        assert_eq!(collection.change_type_of(&EntityKey::Num(1)), ChangeType::Updated);
        assert_eq!(collection.change_type_of(&EntityKey::Num(2)), ChangeType::Unchanged);
        assert!(collection.has_changes());
    }

    #[test]
    fn snapshot_restores_everything_but_loading() {
        let collection = sample();
        let json = serde_json::to_value(&collection).unwrap();
        assert_eq!(json["ids"], json!([2, 1]));

        let restored: EntityCollection = serde_json::from_value(json).unwrap();
        assert_eq!(restored.ids, collection.ids);
        assert_eq!(restored.entities, collection.entities);
        assert_eq!(restored.change_state, collection.change_state);
        assert!(restored.loaded);
        assert!(!restored.loading);
    }

    #[test]
    fn cache_holds_collections_by_name() {
        let cache = EntityCache::new()
            .with_collection(EntityCollection::new("Villain"))
            .with_collection(sample());
        assert_eq!(cache.entity_names(), vec!["Hero".to_string(), "Villain".to_string()]);
        assert_eq!(cache.get("Hero").map(|c| c.len()), Some(2));
        assert!(cache.get("Sidekick").is_none());
    }
}
