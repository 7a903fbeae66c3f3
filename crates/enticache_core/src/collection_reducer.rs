//! The per-entity-type collection state machine.

use crate::adapter::EntityAdapter;
use crate::definition::{EntityDefinition, EntityDefinitionService};
use crate::error::{CoreError, CoreResult};
use crate::tracker::EntityChangeTracker;
use enticache_model::{
    ActionData, ActionError, ChangeStateMap, ChangeType, Entity, EntityAction, EntityActionGuard,
    EntityCollection, EntityKey, EntityOp, MergeStrategy,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Applies entity actions to the collection of one entity type.
///
/// Request ops (`QUERY_*`, `SAVE_*`) set `loading`; optimistic saves also
/// apply their mutation right away. Success ops merge the server result
/// through the change tracker and clear `loading`; error ops only clear
/// `loading`. Cache-only ops apply the tracker and the adapter together.
///
/// An action that fails validation leaves the collection unchanged and
/// carries the error in `payload.error`.
#[derive(Debug)]
pub struct EntityCollectionReducer {
    definition: Arc<EntityDefinition>,
    adapter: EntityAdapter,
    tracker: EntityChangeTracker,
    guard: EntityActionGuard,
}

impl EntityCollectionReducer {
    /// Creates the reducer for a definition.
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        let adapter = definition.adapter();
        Self {
            tracker: EntityChangeTracker::new(definition.entity_name.clone(), adapter.clone()),
            guard: definition.guard(),
            adapter,
            definition,
        }
    }

    /// Entity type name.
    pub fn entity_name(&self) -> &str {
        &self.definition.entity_name
    }

    /// The type's definition.
    pub fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    /// The type's change tracker.
    pub fn tracker(&self) -> &EntityChangeTracker {
        &self.tracker
    }

    /// Empty, unloaded collection for the type.
    pub fn initial_collection(&self) -> EntityCollection {
        self.definition.initial_collection()
    }

    /// Applies `action` to `collection`.
    ///
    /// May set `payload.skip` (delete of a key never saved) or
    /// `payload.error` (invalid payload) on the action.
    pub fn reduce(&self, collection: EntityCollection, action: &mut EntityAction) -> EntityCollection {
        match self.apply(collection.clone(), action) {
            Ok(next) => next,
            Err(error) => {
                let error = ActionError::from(error);
                warn!(
                    entity_name = %self.definition.entity_name,
                    op = %action.op(),
                    error = %error,
                    "collection reducer rejected action"
                );
                action.payload.error = Some(error);
                collection
            }
        }
    }

    fn apply(&self, c: EntityCollection, action: &mut EntityAction) -> CoreResult<EntityCollection> {
        use EntityOp::*;

        let merge = action.payload.merge_strategy;
        let track = self.track_strategy(action);
        let optimistic = action.is_optimistic();

        let next = match action.op() {
            CancelPersist | CanceledPersist => loading(c, false),

            // Requests
            QueryAll | QueryLoad | QueryMany | QueryByKey => loading(c, true),

            SaveAddMany => {
                let c = if optimistic {
                    let entities = self.guard.must_be_entities(action)?;
                    let c = self.tracker.track_add_many(&entities, c, track)?;
                    self.adapter.add_many(&entities, c)
                } else {
                    c
                };
                loading(c, true)
            }
            SaveAddOne => {
                let c = if optimistic {
                    let entity = self.guard.must_be_entity(action)?;
                    let c = self.tracker.track_add_one(&entity, c, track)?;
                    self.adapter.add_one(&entity, c)
                } else {
                    c
                };
                loading(c, true)
            }
            SaveDeleteMany => {
                let keys = self.guard.must_be_keys(action)?;
                let (unsaved, saved): (Vec<_>, Vec<_>) = keys
                    .into_iter()
                    .partition(|key| c.change_type_of(key) == ChangeType::Added);
                let c = if unsaved.is_empty() {
                    c
                } else {
                    // Never reached the server: drop them and leave them out of the request.
                    let c = self.adapter.remove_many(&unsaved, c);
                    action.payload.data = Some(ActionData::Keys(saved.clone()));
                    self.tracker.commit_many(&unsaved, c)
                };
                if saved.is_empty() {
                    action.payload.skip = true;
                    c
                } else if optimistic {
                    let c = self.tracker.track_delete_many(&saved, c, track);
                    loading(self.adapter.remove_many(&saved, c), true)
                } else {
                    loading(c, true)
                }
            }
            SaveDeleteOne => {
                let key = self.guard.must_be_key(action)?;
                let c = if c.change_type_of(&key) == ChangeType::Added {
                    // Never reached the server: drop it and skip the request.
                    let c = self.adapter.remove_one(&key, c);
                    action.payload.skip = true;
                    self.tracker.commit_one(&key, c)
                } else if optimistic {
                    let c = self.tracker.track_delete_one(&key, c, track);
                    self.adapter.remove_one(&key, c)
                } else {
                    c
                };
                loading(c, true)
            }
            SaveUpdateMany => {
                let c = if optimistic {
                    let updates = self.guard.must_be_updates(action)?;
                    let c = self.tracker.track_update_many(&updates, c, track)?;
                    self.adapter.update_many(&updates, c)
                } else {
                    c
                };
                loading(c, true)
            }
            SaveUpdateOne => {
                let c = if optimistic {
                    let update = self.guard.must_be_update(action)?;
                    let c = self.tracker.track_update_one(&update, c, track)?;
                    self.adapter.update_one(&update, c)
                } else {
                    c
                };
                loading(c, true)
            }
            SaveUpsertMany => {
                let c = if optimistic {
                    let entities = self.guard.must_be_entities(action)?;
                    let c = self.tracker.track_upsert_many(&entities, c, track)?;
                    self.adapter.upsert_many(&entities, c)
                } else {
                    c
                };
                loading(c, true)
            }
            SaveUpsertOne => {
                let c = if optimistic {
                    let entity = self.guard.must_be_entity(action)?;
                    let c = self.tracker.track_upsert_one(&entity, c, track)?;
                    self.adapter.upsert_one(&entity, c)
                } else {
                    c
                };
                loading(c, true)
            }

            // Successes
            QueryAllSuccess => {
                let entities = self.entities_or_empty(action)?;
                let c = self.tracker.merge_query_results(&entities, c, merge);
                EntityCollection {
                    loaded: true,
                    loading: false,
                    ..c
                }
            }
            QueryByKeySuccess => {
                let c = match action.data() {
                    None => c,
                    Some(_) => {
                        let entity = self.guard.must_be_entity(action)?;
                        self.tracker.merge_query_results(&[entity], c, merge)
                    }
                };
                loading(c, false)
            }
            QueryLoadSuccess => {
                let entities = self.entities_or_empty(action)?;
                let c = self.adapter.set_all(&entities, c);
                EntityCollection {
                    loaded: true,
                    loading: false,
                    change_state: ChangeStateMap::new(),
                    ..c
                }
            }
            QueryManySuccess => {
                let entities = self.entities_or_empty(action)?;
                loading(self.tracker.merge_query_results(&entities, c, merge), false)
            }
            SaveAddManySuccess => {
                let entities = self.guard.must_be_entities(action)?;
                loading(self.merge_saved_adds(&entities, c, optimistic, merge), false)
            }
            SaveAddOneSuccess => {
                let entity = self.guard.must_be_entity(action)?;
                loading(self.merge_saved_adds(&[entity], c, optimistic, merge), false)
            }
            SaveDeleteManySuccess => {
                let keys = self.guard.must_be_keys(action)?;
                loading(self.tracker.merge_save_deletes(&keys, c, merge), false)
            }
            SaveDeleteOneSuccess => {
                let key = self.guard.must_be_key(action)?;
                loading(self.tracker.merge_save_deletes(&[key], c, merge), false)
            }
            SaveUpdateManySuccess => {
                let responses = self.guard.must_be_update_responses(action)?;
                let c = self
                    .tracker
                    .merge_save_updates(&responses, c, merge, optimistic);
                loading(c, false)
            }
            SaveUpdateOneSuccess => {
                let response = self.guard.must_be_update_response(action)?;
                let c = self
                    .tracker
                    .merge_save_updates(&[response], c, merge, optimistic);
                loading(c, false)
            }
            SaveUpsertManySuccess => {
                let entities = self.guard.must_be_entities(action)?;
                loading(self.tracker.merge_save_upserts(&entities, c, merge), false)
            }
            SaveUpsertOneSuccess => {
                let entity = self.guard.must_be_entity(action)?;
                loading(self.tracker.merge_save_upserts(&[entity], c, merge), false)
            }

            // Errors leave any optimistic mutation for the caller to compensate.
            QueryAllError | QueryLoadError | QueryManyError | QueryByKeyError
            | SaveAddManyError | SaveAddOneError | SaveDeleteManyError | SaveDeleteOneError
            | SaveUpdateManyError | SaveUpdateOneError | SaveUpsertManyError
            | SaveUpsertOneError => loading(c, false),

            // Cache-only
            AddAll => {
                let entities = self.guard.must_be_entities(action)?;
                let c = self.adapter.set_all(&entities, c);
                EntityCollection {
                    loaded: true,
                    loading: false,
                    change_state: ChangeStateMap::new(),
                    ..c
                }
            }
            AddMany => {
                let entities = self.guard.must_be_entities(action)?;
                let c = self.tracker.track_add_many(&entities, c, track)?;
                self.adapter.add_many(&entities, c)
            }
            AddOne => {
                let entity = self.guard.must_be_entity(action)?;
                let c = self.tracker.track_add_one(&entity, c, track)?;
                self.adapter.add_one(&entity, c)
            }
            RemoveAll => {
                let c = self.adapter.remove_all(c);
                EntityCollection {
                    loaded: false,
                    loading: false,
                    change_state: ChangeStateMap::new(),
                    ..c
                }
            }
            RemoveMany => {
                let keys = self.guard.must_be_keys(action)?;
                let c = self.tracker.track_delete_many(&keys, c, track);
                self.adapter.remove_many(&keys, c)
            }
            RemoveOne => {
                let key = self.guard.must_be_key(action)?;
                let c = self.tracker.track_delete_one(&key, c, track);
                self.adapter.remove_one(&key, c)
            }
            UpdateMany => {
                let updates = self.guard.must_be_updates(action)?;
                let c = self.tracker.track_update_many(&updates, c, track)?;
                self.adapter.update_many(&updates, c)
            }
            UpdateOne => {
                let update = self.guard.must_be_update(action)?;
                let c = self.tracker.track_update_one(&update, c, track)?;
                self.adapter.update_one(&update, c)
            }
            UpsertMany => {
                let entities = self.guard.must_be_entities(action)?;
                let c = self.tracker.track_upsert_many(&entities, c, track)?;
                self.adapter.upsert_many(&entities, c)
            }
            UpsertOne => {
                let entity = self.guard.must_be_entity(action)?;
                let c = self.tracker.track_upsert_one(&entity, c, track)?;
                self.adapter.upsert_one(&entity, c)
            }

            CommitAll => self.tracker.commit_all(c),
            CommitMany => {
                let keys = self.guard.must_be_keys(action)?;
                self.tracker.commit_many(&keys, c)
            }
            CommitOne => match action.data() {
                None => c,
                Some(_) => {
                    let key = self.guard.must_be_key(action)?;
                    self.tracker.commit_one(&key, c)
                }
            },
            UndoAll => self.tracker.undo_all(c),
            UndoMany => {
                let keys = self.guard.must_be_keys(action)?;
                self.tracker.undo_many(&keys, c)
            }
            UndoOne => match action.data() {
                None => c,
                Some(_) => {
                    let key = self.guard.must_be_key(action)?;
                    self.tracker.undo_one(&key, c)
                }
            },

            SetChangeState => match action.data() {
                Some(ActionData::ChangeState(change_state)) => EntityCollection {
                    change_state: change_state.clone(),
                    ..c
                },
                None => EntityCollection {
                    change_state: ChangeStateMap::new(),
                    ..c
                },
                Some(_) => return Err(self.shape_error(action, "a change state map")),
            },
            SetCollection => match action.data() {
                Some(ActionData::Collection(collection)) => collection.as_ref().clone(),
                _ => return Err(self.shape_error(action, "a collection")),
            },
            SetFilter => {
                let filter = match action.data() {
                    Some(ActionData::Filter(Value::Null)) | None => None,
                    Some(ActionData::Filter(value)) => Some(value.clone()),
                    Some(_) => return Err(self.shape_error(action, "a filter value")),
                };
                EntityCollection { filter, ..c }
            }
            SetLoaded => EntityCollection {
                loaded: flag(action),
                ..c
            },
            SetLoading => loading(c, flag(action)),
        };
        Ok(next)
    }

    /// Strategy passed to tracking calls: types without change tracking
    /// never track.
    fn track_strategy(&self, action: &EntityAction) -> Option<MergeStrategy> {
        if self.definition.no_change_tracking {
            Some(MergeStrategy::IgnoreChanges)
        } else {
            action.payload.merge_strategy
        }
    }

    fn merge_saved_adds(
        &self,
        entities: &[Entity],
        c: EntityCollection,
        optimistic: bool,
        merge: Option<MergeStrategy>,
    ) -> EntityCollection {
        if optimistic {
            self.tracker.merge_save_upserts(entities, c, merge)
        } else {
            self.tracker.merge_save_adds(entities, c, merge)
        }
    }

    fn entities_or_empty(&self, action: &EntityAction) -> CoreResult<Vec<Entity>> {
        match action.data() {
            None => Ok(Vec::new()),
            Some(_) => Ok(self.guard.must_be_entities(action)?),
        }
    }

    fn shape_error(&self, action: &EntityAction, expected: &str) -> CoreError {
        CoreError::Action(ActionError::invalid_action(format!(
            "{} payload of {} should be {}",
            action.type_name, self.definition.entity_name, expected
        )))
    }
}

fn loading(collection: EntityCollection, loading: bool) -> EntityCollection {
    EntityCollection {
        loading,
        ..collection
    }
}

fn flag(action: &EntityAction) -> bool {
    matches!(action.data(), Some(ActionData::Flag(true)))
}

/// Collection reducers by entity type name.
#[derive(Debug, Clone, Default)]
pub struct EntityCollectionReducers {
    reducers: HashMap<String, Arc<EntityCollectionReducer>>,
}

impl EntityCollectionReducers {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one reducer per registered definition.
    pub fn from_definitions(definitions: &EntityDefinitionService) -> Self {
        let mut reducers = Self::new();
        for definition in definitions.iter() {
            reducers.register(EntityCollectionReducer::new(definition.clone()));
        }
        reducers
    }

    /// Registers a reducer, replacing any previous one for its type.
    pub fn register(&mut self, reducer: EntityCollectionReducer) {
        self.reducers
            .insert(reducer.entity_name().to_string(), Arc::new(reducer));
    }

    /// Looks up the reducer for an entity type.
    pub fn get(&self, entity_name: &str) -> Option<Arc<EntityCollectionReducer>> {
        self.reducers.get(entity_name).cloned()
    }

    /// Looks up the reducer for an entity type, failing for unknown types.
    pub fn reducer(&self, entity_name: &str) -> CoreResult<Arc<EntityCollectionReducer>> {
        self.get(entity_name)
            .ok_or_else(|| CoreError::unknown_entity_type(entity_name))
    }

    /// Selects the key of an entity using its type's definition.
    pub fn select_id(&self, entity_name: &str, entity: &Entity) -> Option<EntityKey> {
        self.get(entity_name)
            .and_then(|reducer| (reducer.definition.select_id)(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enticache_model::{
        ChangeState, EntityActionFactory, EntityActionOptions, Update, UpdateResponseData,
    };
    use serde_json::json;

    fn reducer() -> EntityCollectionReducer {
        EntityCollectionReducer::new(Arc::new(EntityDefinition::new("Hero")))
    }

    fn action(op: EntityOp, data: Option<ActionData>, optimistic: bool) -> EntityAction {
        EntityActionFactory::new()
            .create("Hero", op, data, EntityActionOptions::new().optimistic(optimistic))
            .unwrap()
    }

    fn run(c: EntityCollection, op: EntityOp, data: Option<ActionData>) -> EntityCollection {
        reducer().reduce(c, &mut action(op, data, false))
    }

    fn key(n: i64) -> EntityKey {
        EntityKey::Num(n)
    }

    fn loaded() -> EntityCollection {
        run(
            EntityCollection::new("Hero"),
            EntityOp::QueryAllSuccess,
            Some(ActionData::Entities(vec![
                json!({"id": 1, "name": "A"}),
                json!({"id": 2, "name": "B"}),
            ])),
        )
    }

    #[test]
    fn optimistic_add_then_success() {
        let r = reducer();
        let mut add = action(
            EntityOp::SaveAddOne,
            Some(ActionData::Entity(json!({"id": 1, "name": "A"}))),
            true,
        );
        let c = r.reduce(EntityCollection::new("Hero"), &mut add);
        assert!(c.loading);
        assert_eq!(c.change_type_of(&key(1)), ChangeType::Added);

        let factory = EntityActionFactory::new();
        let mut success = factory.create_from_action(
            &add,
            EntityOp::SaveAddOneSuccess,
            Some(ActionData::Entity(json!({"id": 1, "name": "A", "rev": 1}))),
        );
        let c = r.reduce(c, &mut success);
        assert!(!c.loading);
        assert!(!c.has_changes());
        assert_eq!(c.get(&key(1)).unwrap(), &json!({"id": 1, "name": "A", "rev": 1}));
    }

    #[test]
    fn pessimistic_save_waits_for_server() {
        let c = run(
            loaded(),
            EntityOp::SaveUpdateOne,
            Some(ActionData::Update(Update::new(1, json!({"name": "Z"})))),
        );
        assert!(c.loading);
        assert_eq!(c.get(&key(1)).unwrap()["name"], "A");

        let c = run(
            c,
            EntityOp::SaveUpdateOneSuccess,
            Some(ActionData::UpdateResponse(UpdateResponseData::from_update(
                Update::new(1, json!({"name": "Z"})),
                false,
            ))),
        );
        assert!(!c.loading);
        assert_eq!(c.get(&key(1)).unwrap()["name"], "Z");
    }

    #[test]
    fn delete_of_added_key_skips_server() {
        let c = run(loaded(), EntityOp::AddOne, Some(ActionData::Entity(json!({"id": 3}))));
        assert_eq!(c.change_type_of(&key(3)), ChangeType::Added);

        let mut delete = action(EntityOp::SaveDeleteOne, Some(ActionData::Key(key(3))), false);
        let c = reducer().reduce(c, &mut delete);
        assert!(delete.payload.skip);
        assert!(!c.contains(&key(3)));
        assert!(!c.has_changes());
    }

    #[test]
    fn delete_many_drops_unsaved_keys_in_both_modes() {
        for optimistic in [false, true] {
            let c = run(loaded(), EntityOp::AddOne, Some(ActionData::Entity(json!({"id": 3}))));
            let mut delete = action(
                EntityOp::SaveDeleteMany,
                Some(ActionData::Keys(vec![key(3), key(1)])),
                optimistic,
            );
            let c = reducer().reduce(c, &mut delete);

            assert!(!delete.payload.skip);
            assert_eq!(delete.data(), Some(&ActionData::Keys(vec![key(1)])));
            assert!(!c.contains(&key(3)));
            assert!(c.change_of(&key(3)).is_none());
            assert_eq!(c.contains(&key(1)), !optimistic);
            assert!(c.loading);
        }
    }

    #[test]
    fn delete_many_of_only_unsaved_keys_skips() {
        let c = run(loaded(), EntityOp::AddOne, Some(ActionData::Entity(json!({"id": 3}))));
        let mut delete = action(EntityOp::SaveDeleteMany, Some(ActionData::Keys(vec![key(3)])), false);
        let c = reducer().reduce(c, &mut delete);

        assert!(delete.payload.skip);
        assert_eq!(delete.data(), Some(&ActionData::Keys(vec![])));
        assert!(!c.contains(&key(3)));
        assert!(!c.has_changes());
        assert!(!c.loading);
    }

    #[test]
    fn optimistic_delete_tracks_snapshot() {
        let mut delete = action(EntityOp::SaveDeleteOne, Some(ActionData::Key(key(1))), true);
        let c = reducer().reduce(loaded(), &mut delete);
        assert!(!delete.payload.skip);
        assert!(!c.contains(&key(1)));
        assert_eq!(
            c.change_of(&key(1)),
            Some(&ChangeState::deleted(json!({"id": 1, "name": "A"})))
        );
    }

    #[test]
    fn error_leaves_optimistic_state() {
        let mut add = action(
            EntityOp::SaveAddOne,
            Some(ActionData::Entity(json!({"id": 3}))),
            true,
        );
        let c = reducer().reduce(loaded(), &mut add);
        let c = run(c, EntityOp::SaveAddOneError, None);
        assert!(!c.loading);
        assert!(c.contains(&key(3)));
        assert_eq!(c.change_type_of(&key(3)), ChangeType::Added);
    }

    #[test]
    fn invalid_payload_is_recorded_and_state_kept() {
        let before = loaded();
        let mut bad = action(EntityOp::AddOne, Some(ActionData::Entity(json!({"name": "?"}))), false);
        let after = reducer().reduce(before.clone(), &mut bad);
        assert_eq!(after, before);
        assert!(bad.error().unwrap().is_invalid_action());
    }

    #[test]
    fn load_and_remove_all_reset_state() {
        let c = run(loaded(), EntityOp::UpdateOne, Some(ActionData::Update(Update::new(1, json!({"name": "Z"})))));
        let c = run(c, EntityOp::SetLoading, Some(ActionData::Flag(true)));
        let c = run(
            c,
            EntityOp::QueryLoadSuccess,
            Some(ActionData::Entities(vec![json!({"id": 5})])),
        );
        assert!(c.loaded && !c.loading && !c.has_changes());
        assert_eq!(c.len(), 1);

        let c = run(c, EntityOp::RemoveAll, None);
        assert!(!c.loaded && !c.loading && c.is_empty());
    }

    #[test]
    fn query_success_preserves_dirty_values() {
        let c = run(loaded(), EntityOp::UpdateOne, Some(ActionData::Update(Update::new(1, json!({"name": "Local"})))));
        let c = run(
            c,
            EntityOp::QueryManySuccess,
            Some(ActionData::Entities(vec![json!({"id": 1, "name": "Server"})])),
        );
        assert_eq!(c.get(&key(1)).unwrap()["name"], "Local");
        assert_eq!(
            c.change_of(&key(1)).unwrap().original_value,
            Some(json!({"id": 1, "name": "Server"}))
        );
    }

    #[test]
    fn setters() {
        let c = run(loaded(), EntityOp::SetFilter, Some(ActionData::Filter(json!("B"))));
        assert_eq!(c.filter, Some(json!("B")));
        let c = run(c, EntityOp::SetFilter, None);
        assert_eq!(c.filter, None);
        let c = run(c, EntityOp::SetLoaded, Some(ActionData::Flag(false)));
        assert!(!c.loaded);

        let replacement = EntityCollection::new("Hero");
        let c = run(c, EntityOp::SetCollection, Some(ActionData::Collection(Box::new(replacement.clone()))));
        assert_eq!(c, replacement);
    }

    #[test]
    fn no_change_tracking_type_never_tracks() {
        let r = EntityCollectionReducer::new(Arc::new(
            EntityDefinition::new("Hero").without_change_tracking(),
        ));
        let c = r.reduce(
            EntityCollection::new("Hero"),
            &mut action(EntityOp::AddOne, Some(ActionData::Entity(json!({"id": 1}))), false),
        );
        assert!(c.contains(&key(1)));
        assert!(!c.has_changes());
    }

    #[test]
    fn undo_one_reverts() {
        let c = run(loaded(), EntityOp::RemoveOne, Some(ActionData::Key(key(2))));
        assert!(!c.contains(&key(2)));
        let c = run(c, EntityOp::UndoOne, Some(ActionData::Key(key(2))));
        assert_eq!(c.get(&key(2)).unwrap()["name"], "B");
        assert!(!c.has_changes());
    }

    #[test]
    fn registry_builds_from_definitions() {
        let definitions = EntityDefinitionService::new()
            .with(EntityDefinition::new("Hero"))
            .with(EntityDefinition::new("Villain"));
        let reducers = EntityCollectionReducers::from_definitions(&definitions);
        assert!(reducers.get("Villain").is_some());
        assert!(reducers.reducer("Sidekick").is_err());
        assert_eq!(reducers.select_id("Hero", &json!({"id": 4})), Some(key(4)));
    }
}
