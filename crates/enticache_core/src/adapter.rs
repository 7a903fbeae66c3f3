//! Ordered id/entity storage primitives.
//!
//! The adapter owns the `ids` and `entities` halves of a collection and
//! never touches `change_state`; tracking is the change tracker's job.

use enticache_model::{merge_changes, Entity, EntityCollection, EntityKey, IdSelector, Update};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Orders two entities for sorted collections.
pub type SortComparer = Arc<dyn Fn(&Entity, &Entity) -> Ordering + Send + Sync>;

/// Storage primitives over a collection's `ids` and `entities`.
///
/// Every operation takes the collection by value and returns the new one.
/// Entities whose key cannot be selected are skipped.
#[derive(Clone)]
pub struct EntityAdapter {
    select_id: IdSelector,
    sort_comparer: Option<SortComparer>,
}

impl EntityAdapter {
    /// Creates an adapter.
    pub fn new(select_id: IdSelector, sort_comparer: Option<SortComparer>) -> Self {
        Self {
            select_id,
            sort_comparer,
        }
    }

    /// Selects the key of an entity.
    pub fn select_id(&self, entity: &Entity) -> Option<EntityKey> {
        (self.select_id)(entity)
    }

    /// Adds an entity unless its key is already present.
    pub fn add_one(&self, entity: &Entity, collection: EntityCollection) -> EntityCollection {
        self.add_many(std::slice::from_ref(entity), collection)
    }

    /// Adds entities whose keys are not yet present.
    pub fn add_many(&self, entities: &[Entity], mut collection: EntityCollection) -> EntityCollection {
        let mut changed = false;
        for entity in entities {
            let Some(id) = self.select_id(entity) else {
                continue;
            };
            if collection.entities.contains_key(&id) {
                continue;
            }
            collection.entities.insert(id.clone(), entity.clone());
            collection.ids.push_back(id);
            changed = true;
        }
        if changed {
            self.sort(collection)
        } else {
            collection
        }
    }

    /// Replaces all entities.
    pub fn set_all(&self, entities: &[Entity], collection: EntityCollection) -> EntityCollection {
        self.add_many(entities, self.remove_all(collection))
    }

    /// Removes an entity by key.
    pub fn remove_one(&self, key: &EntityKey, collection: EntityCollection) -> EntityCollection {
        self.remove_many(std::slice::from_ref(key), collection)
    }

    /// Removes entities by key; absent keys are ignored.
    pub fn remove_many(&self, keys: &[EntityKey], mut collection: EntityCollection) -> EntityCollection {
        let mut removed = false;
        for key in keys {
            removed |= collection.entities.remove(key).is_some();
        }
        if removed {
            let entities = &collection.entities;
            collection.ids = collection
                .ids
                .iter()
                .filter(|id| entities.contains_key(*id))
                .cloned()
                .collect();
        }
        collection
    }

    /// Removes every entity.
    pub fn remove_all(&self, mut collection: EntityCollection) -> EntityCollection {
        collection.ids = im::Vector::new();
        collection.entities = im::HashMap::new();
        collection
    }

    /// Applies an update; see [`EntityAdapter::update_many`].
    pub fn update_one(&self, update: &Update, collection: EntityCollection) -> EntityCollection {
        self.update_many(std::slice::from_ref(update), collection)
    }

    /// Shallow-merges each update's changes over the stored entity.
    ///
    /// Updates for absent keys are ignored. When the merged entity selects a
    /// different key, the entity and its tracked change move to that key in
    /// place.
    pub fn update_many(&self, updates: &[Update], mut collection: EntityCollection) -> EntityCollection {
        let mut changed = false;
        for update in updates {
            let Some(current) = collection.entities.get(&update.id) else {
                continue;
            };
            let merged = merge_changes(current, &update.changes);
            let new_id = self.select_id(&merged).unwrap_or_else(|| update.id.clone());
            changed = true;

            if new_id == update.id {
                collection.entities.insert(new_id, merged);
                continue;
            }

            collection.entities.remove(&update.id);
            if let Some(change) = collection.change_state.remove(&update.id) {
                collection.change_state.insert(new_id.clone(), change);
            }
            let collided = collection.entities.insert(new_id.clone(), merged).is_some();
            collection.ids = collection
                .ids
                .iter()
                .filter(|id| !(collided && **id == new_id))
                .map(|id| {
                    if *id == update.id {
                        new_id.clone()
                    } else {
                        id.clone()
                    }
                })
                .collect();
        }
        if changed {
            self.sort(collection)
        } else {
            collection
        }
    }

    /// Adds or replaces an entity.
    pub fn upsert_one(&self, entity: &Entity, collection: EntityCollection) -> EntityCollection {
        self.upsert_many(std::slice::from_ref(entity), collection)
    }

    /// Adds absent entities and replaces present ones.
    pub fn upsert_many(&self, entities: &[Entity], mut collection: EntityCollection) -> EntityCollection {
        let mut changed = false;
        for entity in entities {
            let Some(id) = self.select_id(entity) else {
                continue;
            };
            if collection.entities.insert(id.clone(), entity.clone()).is_none() {
                collection.ids.push_back(id);
            }
            changed = true;
        }
        if changed {
            self.sort(collection)
        } else {
            collection
        }
    }

    fn sort(&self, mut collection: EntityCollection) -> EntityCollection {
        let Some(compare) = &self.sort_comparer else {
            return collection;
        };
        let entities = &collection.entities;
        let mut ids: Vec<EntityKey> = collection.ids.iter().cloned().collect();
        ids.sort_by(|a, b| match (entities.get(a), entities.get(b)) {
            (Some(x), Some(y)) => compare(x, y),
            _ => Ordering::Equal,
        });
        collection.ids = ids.into_iter().collect();
        collection
    }
}

impl fmt::Debug for EntityAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAdapter")
            .field("sorted", &self.sort_comparer.is_some())
            .finish_non_exhaustive()
    }
}
