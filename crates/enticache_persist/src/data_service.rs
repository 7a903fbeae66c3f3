//! Data service contracts: the transport collaborators of the orchestrators.

use crate::error::{PersistError, PersistResult};
use async_trait::async_trait;
use enticache_model::{
    DataServiceError, Entity, EntityKey, QueryParams, Update, WireChangeSet,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Result type returned by data services.
pub type DataServiceResult<T> = Result<T, DataServiceError>;

/// Remote operations for one entity type.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process, in-memory for tests). Each method
/// resolves exactly once, to data or to a `DataServiceError`.
#[async_trait]
pub trait EntityDataService: Send + Sync {
    /// Fetches every entity.
    async fn get_all(&self) -> DataServiceResult<Vec<Entity>>;

    /// Fetches one entity. `None` when the server has no such entity.
    async fn get_by_id(&self, key: EntityKey) -> DataServiceResult<Option<Entity>>;

    /// Fetches the entities matching the query parameters.
    async fn get_with_query(&self, params: QueryParams) -> DataServiceResult<Vec<Entity>>;

    /// Inserts an entity. Returns the stored entity, or `None` when the
    /// server replies without a body.
    async fn add(&self, entity: Entity) -> DataServiceResult<Option<Entity>>;

    /// Deletes an entity.
    async fn delete(&self, key: EntityKey) -> DataServiceResult<()>;

    /// Applies an update. Returns the entity as stored when the server sends
    /// it back.
    async fn update(&self, update: Update) -> DataServiceResult<Option<Entity>>;

    /// Inserts or replaces an entity.
    async fn upsert(&self, entity: Entity) -> DataServiceResult<Option<Entity>>;
}

/// Remote batch saves across entity types.
#[async_trait]
pub trait EntityCacheDataService: Send + Sync {
    /// Saves a flattened change set. `None` when the server replies without
    /// a body.
    async fn save_entities(
        &self,
        change_set: WireChangeSet,
        url: &str,
    ) -> DataServiceResult<Option<WireChangeSet>>;
}

/// Data services by entity type, plus the batch service.
///
/// Services may be registered after the store is built; lookups happen per
/// request.
#[derive(Default)]
pub struct DataServiceRegistry {
    services: RwLock<HashMap<String, Arc<dyn EntityDataService>>>,
    cache_service: RwLock<Option<Arc<dyn EntityCacheDataService>>>,
}

impl DataServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the service for an entity type, replacing any previous one.
    pub fn register_service(&self, entity_name: impl Into<String>, service: Arc<dyn EntityDataService>) {
        self.services.write().insert(entity_name.into(), service);
    }

    /// Looks up the service for an entity type.
    pub fn service(&self, entity_name: &str) -> PersistResult<Arc<dyn EntityDataService>> {
        self.services
            .read()
            .get(entity_name)
            .cloned()
            .ok_or_else(|| PersistError::no_data_service(entity_name))
    }

    /// Returns true if a service is registered for the entity type.
    pub fn has_service(&self, entity_name: &str) -> bool {
        self.services.read().contains_key(entity_name)
    }

    /// Sets the batch service.
    pub fn set_cache_service(&self, service: Arc<dyn EntityCacheDataService>) {
        *self.cache_service.write() = Some(service);
    }

    /// Returns the batch service.
    pub fn cache_service(&self) -> PersistResult<Arc<dyn EntityCacheDataService>> {
        self.cache_service
            .read()
            .clone()
            .ok_or(PersistError::NoCacheDataService)
    }
}

impl fmt::Debug for DataServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("DataServiceRegistry")
            .field("services", &names)
            .field("cache_service", &self.cache_service.read().is_some())
            .finish()
    }
}
