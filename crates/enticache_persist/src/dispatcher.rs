//! Per-entity-type convenience handle over the store.

use crate::config::DispatcherOptions;
use crate::error::{PersistError, PersistResult};
use crate::store::EntityStore;
use enticache_core::{EntityDefinition, EntitySelectors};
use enticache_model::{
    Action, ActionData, ActionError, ChangeState, CorrelationId, Entity, EntityAction,
    EntityActionOptions, EntityKey, EntityOp, QueryParams, Update, UpdateResponseData,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Issues actions for one entity type and reads its collection.
///
/// Persistence methods dispatch a request and wait for its outcome. When
/// the caller leaves `is_optimistic` unset, the configured
/// [`DispatcherOptions`] decide. Cache-only methods apply synchronously and
/// report a rejected payload as `PersistError::Action`.
#[derive(Clone)]
pub struct EntityDispatcher {
    store: EntityStore,
    definition: Arc<EntityDefinition>,
    options: DispatcherOptions,
    selectors: EntitySelectors,
}

impl EntityDispatcher {
    /// Creates a dispatcher. See [`EntityStore::dispatcher`].
    pub fn new(store: EntityStore, definition: Arc<EntityDefinition>, options: DispatcherOptions) -> Self {
        let selectors = EntitySelectors::new(definition.entity_name.clone());
        Self {
            store,
            definition,
            options,
            selectors,
        }
    }

    /// Entity type name.
    pub fn entity_name(&self) -> &str {
        &self.definition.entity_name
    }

    /// Selectors over this type's collection.
    pub fn selectors(&self) -> &EntitySelectors {
        &self.selectors
    }

    /// Key of an entity.
    pub fn select_id(&self, entity: &Entity) -> Option<EntityKey> {
        (self.definition.select_id)(entity)
    }

    /// Creates an action for this entity type.
    pub fn create_action(
        &self,
        op: EntityOp,
        data: Option<ActionData>,
        options: EntityActionOptions,
    ) -> PersistResult<EntityAction> {
        Ok(self
            .store
            .factory()
            .create(self.entity_name(), op, data, options)?)
    }

    /// Converts an entity into an update sending the whole entity.
    pub fn to_update(&self, entity: Entity) -> PersistResult<Update> {
        Update::from_entity(entity, &self.definition.select_id).ok_or_else(|| {
            ActionError::invalid_action(format!("{} update requires a key", self.entity_name())).into()
        })
    }

    // Persistence

    /// Saves a new entity. Resolves to the entity as stored by the server.
    ///
    /// An optimistic add needs the key up front and fails with
    /// `InvalidAction` when the entity has none.
    pub async fn add(&self, entity: Entity, options: EntityActionOptions) -> PersistResult<Entity> {
        let options = self.with_default_optimism(options, self.options.optimistic_add);
        if options.is_optimistic == Some(true) && self.select_id(&entity).is_none() {
            return Err(ActionError::invalid_action(format!(
                "{} entity requires a key for an optimistic add",
                self.entity_name()
            ))
            .into());
        }
        let sent = entity.clone();
        let action = self.create_action(EntityOp::SaveAddOne, Some(ActionData::Entity(entity)), options)?;
        match self.store.dispatch_and_await(action).await? {
            Some(ActionData::Entity(saved)) => Ok(saved),
            _ => Ok(sent),
        }
    }

    /// Deletes an entity by key.
    pub async fn delete(&self, key: EntityKey, options: EntityActionOptions) -> PersistResult<EntityKey> {
        let options = self.with_default_optimism(options, self.options.optimistic_delete);
        let action = self.create_action(EntityOp::SaveDeleteOne, Some(ActionData::Key(key.clone())), options)?;
        self.store.dispatch_and_await(action).await?;
        Ok(key)
    }

    /// Queries every entity. Resolves to the collection after the merge.
    pub async fn get_all(&self, options: EntityActionOptions) -> PersistResult<Vec<Entity>> {
        let action = self.create_action(EntityOp::QueryAll, None, options)?;
        self.store.dispatch_and_await(action).await?;
        Ok(self.entities())
    }

    /// Queries one entity. Resolves to what the server returned.
    pub async fn get_by_key(&self, key: EntityKey, options: EntityActionOptions) -> PersistResult<Option<Entity>> {
        let action = self.create_action(EntityOp::QueryByKey, Some(ActionData::Key(key)), options)?;
        match self.store.dispatch_and_await(action).await? {
            Some(ActionData::Entity(entity)) => Ok(Some(entity)),
            _ => Ok(None),
        }
    }

    /// Queries with parameters. Resolves to what the server returned.
    pub async fn get_with_query(&self, params: QueryParams, options: EntityActionOptions) -> PersistResult<Vec<Entity>> {
        let action = self.create_action(EntityOp::QueryMany, Some(ActionData::Query(params)), options)?;
        match self.store.dispatch_and_await(action).await? {
            Some(ActionData::Entities(entities)) => Ok(entities),
            _ => Ok(Vec::new()),
        }
    }

    /// Replaces the collection with every entity from the server, discarding
    /// tracked changes.
    pub async fn load(&self, options: EntityActionOptions) -> PersistResult<Vec<Entity>> {
        let action = self.create_action(EntityOp::QueryLoad, None, options)?;
        self.store.dispatch_and_await(action).await?;
        Ok(self.entities())
    }

    /// Saves changes to an existing entity. The entity must carry its key.
    ///
    /// Resolves to the server's answer, with `changed` set when the server
    /// returned the entity.
    pub async fn update(&self, entity: Entity, options: EntityActionOptions) -> PersistResult<UpdateResponseData> {
        let update = self.to_update(entity)?;
        let options = self.with_default_optimism(options, self.options.optimistic_update);
        let action = self.create_action(EntityOp::SaveUpdateOne, Some(ActionData::Update(update.clone())), options)?;
        match self.store.dispatch_and_await(action).await? {
            Some(ActionData::UpdateResponse(response)) => Ok(response),
            _ => Ok(UpdateResponseData::from_update(update, false)),
        }
    }

    /// Saves an entity, inserting or replacing it.
    pub async fn upsert(&self, entity: Entity, options: EntityActionOptions) -> PersistResult<Entity> {
        let options = self.with_default_optimism(options, self.options.optimistic_upsert);
        let sent = entity.clone();
        let action = self.create_action(EntityOp::SaveUpsertOne, Some(ActionData::Entity(entity)), options)?;
        match self.store.dispatch_and_await(action).await? {
            Some(ActionData::Entity(saved)) => Ok(saved),
            _ => Ok(sent),
        }
    }

    /// Cancels the in-flight request with this correlation id.
    ///
    /// An optimistic change already applied stays; undo it separately.
    pub fn cancel(&self, correlation_id: CorrelationId, reason: Option<String>) -> PersistResult<()> {
        let action = self.create_action(
            EntityOp::CancelPersist,
            Some(ActionData::Canceled { reason }),
            EntityActionOptions::new().with_correlation_id(correlation_id),
        )?;
        self.apply(action)
    }

    // Cache only

    /// Adds an entity to the cache, tracked as added.
    pub fn add_one_to_cache(&self, entity: Entity) -> PersistResult<()> {
        self.cache_op(EntityOp::AddOne, Some(ActionData::Entity(entity)))
    }

    /// Adds entities to the cache, tracked as added.
    pub fn add_many_to_cache(&self, entities: Vec<Entity>) -> PersistResult<()> {
        self.cache_op(EntityOp::AddMany, Some(ActionData::Entities(entities)))
    }

    /// Replaces the cached entities without tracking.
    pub fn add_all_to_cache(&self, entities: Vec<Entity>) -> PersistResult<()> {
        self.cache_op(EntityOp::AddAll, Some(ActionData::Entities(entities)))
    }

    /// Removes an entity from the cache, tracked as deleted.
    pub fn remove_one_from_cache(&self, key: EntityKey) -> PersistResult<()> {
        self.cache_op(EntityOp::RemoveOne, Some(ActionData::Key(key)))
    }

    /// Removes entities from the cache, tracked as deleted.
    pub fn remove_many_from_cache(&self, keys: Vec<EntityKey>) -> PersistResult<()> {
        self.cache_op(EntityOp::RemoveMany, Some(ActionData::Keys(keys)))
    }

    /// Merges an entity's fields into the cached one, tracked as updated.
    pub fn update_one_in_cache(&self, entity: Entity) -> PersistResult<()> {
        let update = self.to_update(entity)?;
        self.cache_op(EntityOp::UpdateOne, Some(ActionData::Update(update)))
    }

    /// Applies updates to cached entities.
    pub fn update_many_in_cache(&self, updates: Vec<Update>) -> PersistResult<()> {
        self.cache_op(EntityOp::UpdateMany, Some(ActionData::Updates(updates)))
    }

    /// Inserts or replaces a cached entity.
    pub fn upsert_one_in_cache(&self, entity: Entity) -> PersistResult<()> {
        self.cache_op(EntityOp::UpsertOne, Some(ActionData::Entity(entity)))
    }

    /// Inserts or replaces cached entities.
    pub fn upsert_many_in_cache(&self, entities: Vec<Entity>) -> PersistResult<()> {
        self.cache_op(EntityOp::UpsertMany, Some(ActionData::Entities(entities)))
    }

    /// Reverts the tracked change of one key.
    pub fn undo_one(&self, key: EntityKey) -> PersistResult<()> {
        self.cache_op(EntityOp::UndoOne, Some(ActionData::Key(key)))
    }

    /// Reverts the tracked changes of several keys.
    pub fn undo_many(&self, keys: Vec<EntityKey>) -> PersistResult<()> {
        self.cache_op(EntityOp::UndoMany, Some(ActionData::Keys(keys)))
    }

    /// Reverts every tracked change.
    pub fn undo_all(&self) -> PersistResult<()> {
        self.cache_op(EntityOp::UndoAll, None)
    }

    /// Accepts the current value of one key as saved.
    pub fn commit_one(&self, key: EntityKey) -> PersistResult<()> {
        self.cache_op(EntityOp::CommitOne, Some(ActionData::Key(key)))
    }

    /// Accepts every current value as saved.
    pub fn commit_all(&self) -> PersistResult<()> {
        self.cache_op(EntityOp::CommitAll, None)
    }

    /// Sets the filter value. `Value::Null` clears it.
    pub fn set_filter(&self, filter: Value) -> PersistResult<()> {
        self.cache_op(EntityOp::SetFilter, Some(ActionData::Filter(filter)))
    }

    /// Sets the loaded flag.
    pub fn set_loaded(&self, loaded: bool) -> PersistResult<()> {
        self.cache_op(EntityOp::SetLoaded, Some(ActionData::Flag(loaded)))
    }

    /// Sets the loading flag.
    pub fn set_loading(&self, loading: bool) -> PersistResult<()> {
        self.cache_op(EntityOp::SetLoading, Some(ActionData::Flag(loading)))
    }

    /// Empties the collection and resets its flags and tracking.
    pub fn clear_cache(&self) -> PersistResult<()> {
        self.cache_op(EntityOp::RemoveAll, None)
    }

    // Views

    /// Cached entities in order.
    pub fn entities(&self) -> Vec<Entity> {
        self.selectors.entities(&self.store.cache())
    }

    /// Cached entity by key.
    pub fn by_key(&self, key: &EntityKey) -> Option<Entity> {
        self.selectors.by_key(&self.store.cache(), key).cloned()
    }

    /// Number of cached entities.
    pub fn count(&self) -> usize {
        self.selectors.count(&self.store.cache())
    }

    /// Tracked changes by key.
    pub fn changes(&self) -> Vec<(EntityKey, ChangeState)> {
        self.selectors.changes(&self.store.cache())
    }

    /// Returns true while a request is in flight.
    pub fn loading(&self) -> bool {
        self.selectors.loading(&self.store.cache())
    }

    /// Returns true once the collection has been loaded.
    pub fn loaded(&self) -> bool {
        self.selectors.loaded(&self.store.cache())
    }

    fn with_default_optimism(&self, mut options: EntityActionOptions, default: bool) -> EntityActionOptions {
        options.is_optimistic.get_or_insert(default);
        options
    }

    fn cache_op(&self, op: EntityOp, data: Option<ActionData>) -> PersistResult<()> {
        let action = self.create_action(op, data, EntityActionOptions::new())?;
        self.apply(action)
    }

    fn apply(&self, action: EntityAction) -> PersistResult<()> {
        match self.store.dispatch(action) {
            Action::Entity(reduced) => match reduced.payload.error {
                Some(error) => Err(PersistError::Action(error)),
                None => Ok(()),
            },
            Action::Cache(_) => Ok(()),
        }
    }
}

impl fmt::Debug for EntityDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDispatcher")
            .field("entity_name", &self.definition.entity_name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
