//! The cache-level reducer: routes entity actions to their collection and
//! folds batch saves across collections.

use crate::collection_reducer::EntityCollectionReducers;
use enticache_model::{
    Action, ActionData, ActionError, ActionResult, ChangeSetItem, EntityAction,
    EntityActionFactory, EntityActionOptions, EntityCache, EntityCacheAction, EntityCollection,
    EntityOp, MergeStrategy, QuerySet, SaveEntitiesPayload, UpdateResponseData,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reduces every [`Action`] against the whole cache.
///
/// Collections are created lazily the first time an action targets them.
#[derive(Debug, Clone)]
pub struct EntityCacheReducer {
    reducers: Arc<EntityCollectionReducers>,
    factory: EntityActionFactory,
}

impl EntityCacheReducer {
    /// Creates a cache reducer.
    pub fn new(reducers: Arc<EntityCollectionReducers>, factory: EntityActionFactory) -> Self {
        Self { reducers, factory }
    }

    /// The collection reducers.
    pub fn reducers(&self) -> &Arc<EntityCollectionReducers> {
        &self.reducers
    }

    /// Applies an action and returns the new cache.
    ///
    /// Errors are recorded on the action, never returned.
    pub fn reduce(&self, cache: EntityCache, action: &mut Action) -> EntityCache {
        match action {
            Action::Entity(action) => self.apply_collection_reducer(cache, action),
            Action::Cache(action) => self.reduce_cache_action(cache, action),
        }
    }

    /// Applies an entity action to its collection.
    ///
    /// Unknown entity types and invalid payloads leave the cache unchanged
    /// and set `payload.error`.
    pub fn apply_collection_reducer(&self, cache: EntityCache, action: &mut EntityAction) -> EntityCache {
        let reducer = match self.reducers.reducer(action.entity_name()) {
            Ok(reducer) => reducer,
            Err(error) => {
                warn!(entity_name = %action.entity_name(), op = %action.op(), %error, "no reducer for action");
                action.payload.error = Some(error.into());
                return cache;
            }
        };
        let collection = cache
            .get(action.entity_name())
            .cloned()
            .unwrap_or_else(|| reducer.initial_collection());
        let next = reducer.reduce(collection, action);
        if action.error().is_some() {
            cache
        } else {
            cache.with_collection(next)
        }
    }

    fn reduce_cache_action(&self, cache: EntityCache, action: &mut EntityCacheAction) -> EntityCache {
        match action {
            EntityCacheAction::ClearCollections { collections, .. } => {
                let names = collections.clone().unwrap_or_else(|| cache.entity_names());
                names.iter().fold(cache, |cache, name| {
                    cache.with_collection(self.initial_collection(name))
                })
            }
            EntityCacheAction::LoadCollections { collections, tag } => {
                self.apply_query_set(cache, collections, EntityOp::AddAll, None, tag.clone())
            }
            EntityCacheAction::MergeQuerySet {
                query_set,
                merge_strategy,
                tag,
            } => self.apply_query_set(
                cache,
                query_set,
                EntityOp::QueryManySuccess,
                *merge_strategy,
                tag.clone(),
            ),
            EntityCacheAction::SetEntityCache { cache: replacement, .. } => replacement.clone(),
            EntityCacheAction::SaveEntities(payload) => self.save_entities(cache, payload),
            EntityCacheAction::SaveEntitiesCancel { entity_names, .. }
            | EntityCacheAction::SaveEntitiesCanceled { entity_names, .. } => {
                clear_loading_flags(cache, entity_names)
            }
            EntityCacheAction::SaveEntitiesSuccess(payload) => {
                self.save_entities_success(cache, payload)
            }
            EntityCacheAction::SaveEntitiesError { original, .. } => {
                clear_loading_flags(cache, &original.change_set.entity_names())
            }
        }
    }

    /// Folds a batch through the collection reducers in item order.
    ///
    /// The first item that fails stops the fold and its error is recorded
    /// on the batch. Items applied before it stay applied.
    fn save_entities(&self, mut cache: EntityCache, payload: &mut SaveEntitiesPayload) -> EntityCache {
        let mut failure = None;
        for index in 0..payload.change_set.changes.len() {
            let item = &payload.change_set.changes[index];
            let entity_name = item.entity_name().to_string();
            let (op, data) = match item {
                ChangeSetItem::Add { entities, .. } => {
                    (EntityOp::SaveAddMany, ActionData::Entities(entities.clone()))
                }
                ChangeSetItem::Delete { keys, .. } => {
                    (EntityOp::SaveDeleteMany, ActionData::Keys(keys.clone()))
                }
                ChangeSetItem::Update { updates, .. } => {
                    (EntityOp::SaveUpdateMany, ActionData::Updates(updates.clone()))
                }
                ChangeSetItem::Upsert { entities, .. } => {
                    (EntityOp::SaveUpsertMany, ActionData::Entities(entities.clone()))
                }
            };
            let error = match self.item_action(payload, &entity_name, op, data) {
                Ok(mut action) => {
                    cache = self.apply_collection_reducer(cache, &mut action);
                    // The reducer drops keys that were never saved from a delete.
                    if let (
                        ChangeSetItem::Delete { keys, .. },
                        Some(ActionData::Keys(kept)),
                    ) = (&mut payload.change_set.changes[index], action.data())
                    {
                        if keys.len() != kept.len() {
                            *keys = kept.clone();
                        }
                    }
                    action.payload.error
                }
                Err(error) => Some(error),
            };
            if let Some(error) = error {
                failure = Some((index, error));
                break;
            }
        }

        if let Some((index, error)) = failure {
            warn!(
                correlation_id = %payload.correlation_id,
                item = index + 1,
                %error,
                "batch save stopped at failing item"
            );
            payload.error = Some(error);
        }
        cache
    }

    /// Replays a confirmed batch as per-collection `_MANY_SUCCESS` actions.
    ///
    /// A skip-marked success means the cache already reflects the batch.
    fn save_entities_success(&self, mut cache: EntityCache, payload: &SaveEntitiesPayload) -> EntityCache {
        if payload.skip {
            debug!(correlation_id = %payload.correlation_id, "batch success already reflected in cache");
            return cache;
        }
        for item in &payload.change_set.changes {
            let (op, data) = match item {
                ChangeSetItem::Add { entities, .. } => {
                    (EntityOp::SaveAddManySuccess, ActionData::Entities(entities.clone()))
                }
                ChangeSetItem::Delete { keys, .. } => {
                    (EntityOp::SaveDeleteManySuccess, ActionData::Keys(keys.clone()))
                }
                ChangeSetItem::Update { updates, .. } => (
                    EntityOp::SaveUpdateManySuccess,
                    ActionData::UpdateResponses(
                        updates
                            .iter()
                            .cloned()
                            .map(|u| UpdateResponseData::from_update(u, true))
                            .collect(),
                    ),
                ),
                ChangeSetItem::Upsert { entities, .. } => {
                    (EntityOp::SaveUpsertManySuccess, ActionData::Entities(entities.clone()))
                }
            };
            match self.item_action(payload, item.entity_name(), op, data) {
                Ok(mut action) => cache = self.apply_collection_reducer(cache, &mut action),
                Err(error) => {
                    warn!(correlation_id = %payload.correlation_id, %error, "skipping batch success item")
                }
            }
        }
        cache
    }

    fn apply_query_set(
        &self,
        mut cache: EntityCache,
        query_set: &QuerySet,
        op: EntityOp,
        merge_strategy: Option<MergeStrategy>,
        tag: Option<String>,
    ) -> EntityCache {
        for (entity_name, entities) in query_set {
            let mut options = EntityActionOptions::new();
            options.merge_strategy = merge_strategy;
            options.tag = tag.clone();
            match self.factory.create(
                entity_name.clone(),
                op,
                Some(ActionData::Entities(entities.clone())),
                options,
            ) {
                Ok(mut action) => cache = self.apply_collection_reducer(cache, &mut action),
                Err(error) => warn!(%entity_name, %error, "skipping query set entry"),
            }
        }
        cache
    }

    fn item_action(
        &self,
        payload: &SaveEntitiesPayload,
        entity_name: &str,
        op: EntityOp,
        data: ActionData,
    ) -> ActionResult<EntityAction> {
        let options = EntityActionOptions {
            correlation_id: Some(payload.correlation_id.clone()),
            is_optimistic: Some(payload.is_optimistic),
            merge_strategy: payload.merge_strategy,
            tag: payload.tag.clone(),
        };
        self.factory.create(entity_name, op, Some(data), options)
    }

    fn initial_collection(&self, entity_name: &str) -> EntityCollection {
        self.reducers
            .get(entity_name)
            .map(|reducer| reducer.initial_collection())
            .unwrap_or_else(|| EntityCollection::new(entity_name))
    }
}

fn clear_loading_flags(cache: EntityCache, entity_names: &[String]) -> EntityCache {
    entity_names.iter().fold(cache, |cache, name| {
        match cache.get(name).filter(|c| c.loading).cloned() {
            Some(collection) => cache.with_collection(EntityCollection {
                loading: false,
                ..collection
            }),
            None => cache,
        }
    })
}

/// Returns the error a batch fold recorded, if any.
pub fn batch_error(action: &Action) -> Option<&ActionError> {
    match action {
        Action::Cache(EntityCacheAction::SaveEntities(payload)) => payload.error.as_ref(),
        Action::Entity(action) => action.error(),
        Action::Cache(_) => None,
    }
}
