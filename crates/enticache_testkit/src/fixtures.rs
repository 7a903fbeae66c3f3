//! Entity fixtures and store helpers.
//!
//! Provides the `Hero` and `Villain` types used across the test suites and
//! a store wired to an in-memory data service.

use enticache_core::{EntityCollectionReducer, EntityDefinition};
use enticache_model::{Entity, EntityCollection};
use enticache_persist::{EntityDispatcher, EntityStore, InMemoryDataService, StoreConfig};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Entity type name of heroes.
pub const HERO: &str = "Hero";
/// Entity type name of villains.
pub const VILLAIN: &str = "Villain";

/// Creates a hero entity.
pub fn hero(id: i64, name: &str) -> Entity {
    json!({ "id": id, "name": name })
}

/// Creates a villain entity.
pub fn villain(id: i64, name: &str) -> Entity {
    json!({ "id": id, "name": name })
}

/// Heroes, kept sorted by name.
pub fn hero_definition() -> EntityDefinition {
    EntityDefinition::new(HERO).with_sort_comparer(|a, b| a["name"].as_str().cmp(&b["name"].as_str()))
}

/// Villains, in insertion order.
pub fn villain_definition() -> EntityDefinition {
    EntityDefinition::new(VILLAIN)
}

/// A collection reducer for `definition`.
pub fn reducer_for(definition: EntityDefinition) -> EntityCollectionReducer {
    EntityCollectionReducer::new(Arc::new(definition))
}

/// A collection holding `entities` as unchanged server state.
pub fn collection_with(reducer: &EntityCollectionReducer, entities: &[Entity]) -> EntityCollection {
    let adapter = reducer.definition().adapter();
    adapter.add_many(entities, reducer.initial_collection())
}

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A store over an in-memory data service, with heroes and villains
/// registered.
///
/// Must be created inside a Tokio runtime.
pub struct TestStore {
    /// The store.
    pub store: EntityStore,
    /// The data service behind it, shared by both types.
    pub server: InMemoryDataService,
}

impl TestStore {
    /// Creates a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a store with `config`.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_server(InMemoryDataService::new(), config)
    }

    /// Creates a store over a prepared data service.
    pub fn with_server(server: InMemoryDataService, config: StoreConfig) -> Self {
        let store = EntityStore::builder()
            .with_definition(hero_definition())
            .with_definition(villain_definition())
            .with_data_service(HERO, Arc::new(server.for_entity(HERO)))
            .with_data_service(VILLAIN, Arc::new(server.for_entity(VILLAIN)))
            .with_cache_data_service(Arc::new(server.clone()))
            .with_config(config)
            .build()
            .expect("Failed to build test store");
        Self { store, server }
    }

    /// Dispatcher for heroes.
    pub fn heroes(&self) -> EntityDispatcher {
        self.store.dispatcher(HERO).expect("Hero is registered")
    }

    /// Dispatcher for villains.
    pub fn villains(&self) -> EntityDispatcher {
        self.store.dispatcher(VILLAIN).expect("Villain is registered")
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = EntityStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enticache_model::EntityKey;

    #[test]
    fn collection_with_sorts_heroes() {
        let reducer = reducer_for(hero_definition());
        let collection = collection_with(&reducer, &[hero(1, "Zed"), hero(2, "Ann")]);
        assert_eq!(collection.ids.iter().cloned().collect::<Vec<_>>(), vec![EntityKey::Num(2), EntityKey::Num(1)]);
        assert!(collection.change_state.is_empty());
    }

    #[tokio::test]
    async fn test_store_loads_seeded_heroes() {
        init_tracing();
        let store = TestStore::new();
        store.server.seed(HERO, vec![hero(1, "Zed"), hero(2, "Ann")]);

        let loaded = store.heroes().load(Default::default()).await.unwrap();
        assert_eq!(loaded, vec![hero(2, "Ann"), hero(1, "Zed")]);
        assert!(store.heroes().loaded());
        assert_eq!(store.villains().count(), 0);
    }
}
