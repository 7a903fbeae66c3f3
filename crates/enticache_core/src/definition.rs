//! Entity type definitions.

use crate::adapter::{EntityAdapter, SortComparer};
use crate::error::{CoreError, CoreResult};
use enticache_model::{
    default_select_id, Entity, EntityActionGuard, EntityCollection, IdSelector,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything the cache needs to know about one entity type.
#[derive(Clone)]
pub struct EntityDefinition {
    /// Entity type name.
    pub entity_name: String,
    /// Primary key selector.
    pub select_id: IdSelector,
    /// Keeps `ids` sorted when set.
    pub sort_comparer: Option<SortComparer>,
    /// Disables change tracking for the type.
    pub no_change_tracking: bool,
}

impl EntityDefinition {
    /// Creates a definition keyed by the `id` field, unsorted, tracked.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            select_id: default_select_id(),
            sort_comparer: None,
            no_change_tracking: false,
        }
    }

    /// Sets the key selector.
    pub fn with_select_id(mut self, select_id: IdSelector) -> Self {
        self.select_id = select_id;
        self
    }

    /// Keeps `ids` ordered by `compare`.
    pub fn with_sort_comparer<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Entity, &Entity) -> Ordering + Send + Sync + 'static,
    {
        self.sort_comparer = Some(Arc::new(compare));
        self
    }

    /// Turns change tracking off.
    pub fn without_change_tracking(mut self) -> Self {
        self.no_change_tracking = true;
        self
    }

    /// Storage adapter for the type.
    pub fn adapter(&self) -> EntityAdapter {
        EntityAdapter::new(self.select_id.clone(), self.sort_comparer.clone())
    }

    /// Payload guard for the type.
    pub fn guard(&self) -> EntityActionGuard {
        EntityActionGuard::new(self.entity_name.clone(), self.select_id.clone())
    }

    /// Empty, unloaded collection for the type.
    pub fn initial_collection(&self) -> EntityCollection {
        EntityCollection::new(self.entity_name.clone())
    }
}

impl fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("entity_name", &self.entity_name)
            .field("sorted", &self.sort_comparer.is_some())
            .field("no_change_tracking", &self.no_change_tracking)
            .finish()
    }
}

/// Registry of entity definitions by type name.
#[derive(Debug, Clone, Default)]
pub struct EntityDefinitionService {
    definitions: HashMap<String, Arc<EntityDefinition>>,
}

impl EntityDefinitionService {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition, replacing any previous one for the type.
    pub fn register(&mut self, definition: EntityDefinition) {
        self.definitions
            .insert(definition.entity_name.clone(), Arc::new(definition));
    }

    /// Registers a definition, builder style.
    pub fn with(mut self, definition: EntityDefinition) -> Self {
        self.register(definition);
        self
    }

    /// Looks up a definition.
    pub fn get(&self, entity_name: &str) -> Option<Arc<EntityDefinition>> {
        self.definitions.get(entity_name).cloned()
    }

    /// Looks up a definition, failing for unknown types.
    pub fn definition(&self, entity_name: &str) -> CoreResult<Arc<EntityDefinition>> {
        self.get(entity_name)
            .ok_or_else(|| CoreError::unknown_entity_type(entity_name))
    }

    /// Iterates all definitions.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDefinition>> + '_ {
        self.definitions.values()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enticache_model::{select_id_by_field, EntityKey};
    use serde_json::json;

    #[test]
    fn registry_lookup() {
        let service = EntityDefinitionService::new()
            .with(EntityDefinition::new("Hero"))
            .with(EntityDefinition::new("City").with_select_id(select_id_by_field("code")));

        assert_eq!(service.len(), 2);
        let city = service.definition("City").unwrap();
        assert_eq!(
            (city.select_id)(&json!({"code": "NYC"})),
            Some(EntityKey::from("NYC"))
        );
        assert!(matches!(
            service.definition("Sidekick"),
            Err(CoreError::UnknownEntityType { .. })
        ));
    }

    #[test]
    fn builder_flags() {
        let def = EntityDefinition::new("Hero")
            .with_sort_comparer(|a, b| a["name"].as_str().cmp(&b["name"].as_str()))
            .without_change_tracking();
        assert!(def.no_change_tracking);
        assert!(def.sort_comparer.is_some());
        assert_eq!(def.initial_collection().entity_name, "Hero");
    }
}
