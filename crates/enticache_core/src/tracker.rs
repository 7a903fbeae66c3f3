//! Change tracking for one entity type.
//!
//! The tracker records what changed locally since the last commit and how
//! to undo it, and reconciles server data with those pending changes under a
//! [`MergeStrategy`]. All operations are collection in, collection out.
//!
//! Tracking follows a first-write-wins rule: the first mutation of a key
//! since the last commit captures the snapshot, later mutations keep it.

use crate::adapter::EntityAdapter;
use crate::error::{CoreError, CoreResult};
use enticache_model::{
    merge_changes, ChangeState, ChangeStateMap, ChangeType, Entity, EntityCollection, EntityKey,
    MergeStrategy, Update, UpdateResponseData,
};

/// Tracks unsaved changes and merges server results for one entity type.
#[derive(Debug, Clone)]
pub struct EntityChangeTracker {
    entity_name: String,
    adapter: EntityAdapter,
}

impl EntityChangeTracker {
    /// Creates a tracker over the type's adapter.
    pub fn new(entity_name: impl Into<String>, adapter: EntityAdapter) -> Self {
        Self {
            entity_name: entity_name.into(),
            adapter,
        }
    }

    // ---------------------------------------------------------------------
    // Commit
    // ---------------------------------------------------------------------

    /// Clears all tracking: current values become the new server truth.
    pub fn commit_all(&self, mut collection: EntityCollection) -> EntityCollection {
        if !collection.change_state.is_empty() {
            collection.change_state = ChangeStateMap::new();
        }
        collection
    }

    /// Clears tracking for the given keys.
    pub fn commit_many(&self, keys: &[EntityKey], mut collection: EntityCollection) -> EntityCollection {
        for key in keys {
            collection.change_state.remove(key);
        }
        collection
    }

    /// Clears tracking for one key.
    pub fn commit_one(&self, key: &EntityKey, collection: EntityCollection) -> EntityCollection {
        self.commit_many(std::slice::from_ref(key), collection)
    }

    // ---------------------------------------------------------------------
    // Merge server results
    // ---------------------------------------------------------------------

    /// Merges query results; `PreserveChanges` unless overridden.
    pub fn merge_query_results(
        &self,
        entities: &[Entity],
        collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> EntityCollection {
        self.merge_server_upserts(
            entities,
            collection,
            MergeStrategy::PreserveChanges,
            merge_strategy,
        )
    }

    /// Merges entities the server confirmed as added; `OverwriteChanges` unless overridden.
    pub fn merge_save_adds(
        &self,
        entities: &[Entity],
        collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> EntityCollection {
        self.merge_server_upserts(
            entities,
            collection,
            MergeStrategy::OverwriteChanges,
            merge_strategy,
        )
    }

    /// Merges entities the server confirmed as upserted; `OverwriteChanges` unless overridden.
    pub fn merge_save_upserts(
        &self,
        entities: &[Entity],
        collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> EntityCollection {
        self.merge_server_upserts(
            entities,
            collection,
            MergeStrategy::OverwriteChanges,
            merge_strategy,
        )
    }

    /// Removes keys the server confirmed as deleted.
    ///
    /// Tracking for those keys is committed unless the strategy is
    /// `IgnoreChanges`.
    pub fn merge_save_deletes(
        &self,
        keys: &[EntityKey],
        collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> EntityCollection {
        let strategy = merge_strategy.unwrap_or(MergeStrategy::OverwriteChanges);
        let collection = if strategy == MergeStrategy::IgnoreChanges {
            collection
        } else {
            self.commit_many(keys, collection)
        };
        self.adapter.remove_many(keys, collection)
    }

    /// Merges server-confirmed updates.
    ///
    /// With `skip_unchanged`, responses the server did not alter are not
    /// written back to the collection: an optimistic save already holds
    /// those values and may have newer local edits on top. Tracking is
    /// reconciled either way.
    pub fn merge_save_updates(
        &self,
        responses: &[UpdateResponseData],
        mut collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
        skip_unchanged: bool,
    ) -> EntityCollection {
        if responses.is_empty() {
            return collection;
        }
        let writable = |responses: Vec<&UpdateResponseData>| -> Vec<Update> {
            responses
                .into_iter()
                .filter(|r| !skip_unchanged || r.changed)
                .map(UpdateResponseData::to_update)
                .collect()
        };

        match merge_strategy.unwrap_or(MergeStrategy::OverwriteChanges) {
            MergeStrategy::IgnoreChanges => {
                let updates = writable(responses.iter().collect());
                self.adapter.update_many(&updates, collection)
            }
            MergeStrategy::OverwriteChanges => {
                for response in responses {
                    collection.change_state.remove(&response.id);
                }
                let updates = writable(responses.iter().collect());
                self.adapter.update_many(&updates, collection)
            }
            MergeStrategy::PreserveChanges => {
                let mut untracked = Vec::new();
                for response in responses {
                    let Some(change) = collection.change_state.get(&response.id).cloned() else {
                        untracked.push(response);
                        continue;
                    };
                    // Keep the dirty value, rebase the undo baseline.
                    let base = change
                        .original_value
                        .as_ref()
                        .or_else(|| collection.entities.get(&response.id));
                    let baseline = match base {
                        Some(base) => merge_changes(base, &response.changes),
                        None => response.changes.clone(),
                    };
                    let new_id = self
                        .adapter
                        .select_id(&response.changes)
                        .unwrap_or_else(|| response.id.clone());
                    collection.change_state.remove(&response.id);
                    collection
                        .change_state
                        .insert(new_id, rebase(&change, baseline));
                }
                let updates = writable(untracked);
                self.adapter.update_many(&updates, collection)
            }
        }
    }

    /// Upserts server entities under the effective merge strategy.
    ///
    /// - `IgnoreChanges` writes every entity and leaves tracking alone.
    /// - `OverwriteChanges` writes every entity and drops its tracking.
    /// - `PreserveChanges` keeps the current value of tracked keys and
    ///   rebases their snapshot to the server value; untracked keys are
    ///   written normally.
    pub fn merge_server_upserts(
        &self,
        entities: &[Entity],
        mut collection: EntityCollection,
        default_strategy: MergeStrategy,
        merge_strategy: Option<MergeStrategy>,
    ) -> EntityCollection {
        if entities.is_empty() {
            return collection;
        }
        match merge_strategy.unwrap_or(default_strategy) {
            MergeStrategy::IgnoreChanges => self.adapter.upsert_many(entities, collection),
            MergeStrategy::OverwriteChanges => {
                for entity in entities {
                    if let Some(id) = self.adapter.select_id(entity) {
                        collection.change_state.remove(&id);
                    }
                }
                self.adapter.upsert_many(entities, collection)
            }
            MergeStrategy::PreserveChanges => {
                let mut untracked = Vec::new();
                for entity in entities {
                    let id = self.adapter.select_id(entity);
                    match id.and_then(|id| collection.change_state.get(&id).cloned().map(|c| (id, c))) {
                        Some((id, change)) => {
                            collection
                                .change_state
                                .insert(id, rebase(&change, entity.clone()));
                        }
                        None => untracked.push(entity.clone()),
                    }
                }
                self.adapter.upsert_many(&untracked, collection)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Track local mutations
    // ---------------------------------------------------------------------

    /// Tracks entities about to be added.
    ///
    /// `IgnoreChanges` means "do not track".
    pub fn track_add_many(
        &self,
        entities: &[Entity],
        mut collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> CoreResult<EntityCollection> {
        if ignores(merge_strategy) || entities.is_empty() {
            return Ok(collection);
        }
        for entity in entities {
            let id = self.key_of(entity, "add")?;
            if !is_tracked(&collection, &id) {
                collection.change_state.insert(id, ChangeState::added());
            }
        }
        Ok(collection)
    }

    /// Tracks an entity about to be added.
    pub fn track_add_one(
        &self,
        entity: &Entity,
        collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> CoreResult<EntityCollection> {
        self.track_add_many(std::slice::from_ref(entity), collection, merge_strategy)
    }

    /// Tracks keys about to be deleted.
    ///
    /// An `Added` key loses its tracking entirely: the caller must remove it
    /// and must not ask the server to delete it. An `Updated` key becomes
    /// `Deleted` and keeps its snapshot. Keys not in the collection are
    /// ignored.
    pub fn track_delete_many(
        &self,
        keys: &[EntityKey],
        mut collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> EntityCollection {
        if ignores(merge_strategy) {
            return collection;
        }
        for key in keys {
            let Some(original) = collection.entities.get(key).cloned() else {
                continue;
            };
            match collection.change_type_of(key) {
                ChangeType::Added => {
                    collection.change_state.remove(key);
                }
                ChangeType::Updated => {
                    if let Some(change) = collection.change_state.get_mut(key) {
                        change.change_type = ChangeType::Deleted;
                    }
                }
                ChangeType::Deleted => {}
                ChangeType::Unchanged => {
                    collection
                        .change_state
                        .insert(key.clone(), ChangeState::deleted(original));
                }
            }
        }
        collection
    }

    /// Tracks a key about to be deleted.
    pub fn track_delete_one(
        &self,
        key: &EntityKey,
        collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> EntityCollection {
        self.track_delete_many(std::slice::from_ref(key), collection, merge_strategy)
    }

    /// Tracks updates about to be applied.
    ///
    /// Only keys present in the collection are tracked; updates to absent
    /// keys are silently ignored, as the adapter ignores them too.
    pub fn track_update_many(
        &self,
        updates: &[Update],
        mut collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> CoreResult<EntityCollection> {
        if ignores(merge_strategy) || updates.is_empty() {
            return Ok(collection);
        }
        for update in updates {
            if !update.id.is_valid() {
                return Err(CoreError::key_required(&self.entity_name, "update"));
            }
            let Some(original) = collection.entities.get(&update.id).cloned() else {
                continue;
            };
            if !is_tracked(&collection, &update.id) {
                collection
                    .change_state
                    .insert(update.id.clone(), ChangeState::updated(original));
            }
        }
        Ok(collection)
    }

    /// Tracks an update about to be applied.
    pub fn track_update_one(
        &self,
        update: &Update,
        collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> CoreResult<EntityCollection> {
        self.track_update_many(std::slice::from_ref(update), collection, merge_strategy)
    }

    /// Tracks entities about to be upserted: `Added` when absent, else `Updated`.
    pub fn track_upsert_many(
        &self,
        entities: &[Entity],
        mut collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> CoreResult<EntityCollection> {
        if ignores(merge_strategy) || entities.is_empty() {
            return Ok(collection);
        }
        for entity in entities {
            let id = self.key_of(entity, "upsert")?;
            if is_tracked(&collection, &id) {
                continue;
            }
            let change = match collection.entities.get(&id) {
                Some(original) => ChangeState::updated(original.clone()),
                None => ChangeState::added(),
            };
            collection.change_state.insert(id, change);
        }
        Ok(collection)
    }

    /// Tracks an entity about to be upserted.
    pub fn track_upsert_one(
        &self,
        entity: &Entity,
        collection: EntityCollection,
        merge_strategy: Option<MergeStrategy>,
    ) -> CoreResult<EntityCollection> {
        self.track_upsert_many(std::slice::from_ref(entity), collection, merge_strategy)
    }

    // ---------------------------------------------------------------------
    // Undo
    // ---------------------------------------------------------------------

    /// Reverts every tracked change.
    pub fn undo_all(&self, collection: EntityCollection) -> EntityCollection {
        let mut keys: Vec<EntityKey> = collection.change_state.keys().cloned().collect();
        keys.sort();
        self.undo_many(&keys, collection)
    }

    /// Reverts tracked changes of the given keys and clears their tracking.
    ///
    /// `Added` entities are removed; `Updated` and `Deleted` ones get their
    /// snapshot back. Untracked keys are ignored, so undoing twice is a no-op
    /// the second time.
    pub fn undo_many(&self, keys: &[EntityKey], mut collection: EntityCollection) -> EntityCollection {
        let mut remove = Vec::new();
        let mut upsert = Vec::new();
        for key in keys {
            let Some(change) = collection.change_state.remove(key) else {
                continue;
            };
            match change.change_type {
                ChangeType::Added => remove.push(key.clone()),
                ChangeType::Updated | ChangeType::Deleted => {
                    if let Some(original) = change.original_value {
                        // A re-keying update left the entity under another key.
                        if self.adapter.select_id(&original).as_ref() != Some(key) {
                            remove.push(key.clone());
                        }
                        upsert.push(original);
                    }
                }
                ChangeType::Unchanged => {}
            }
        }
        let collection = self.adapter.remove_many(&remove, collection);
        self.adapter.upsert_many(&upsert, collection)
    }

    /// Reverts the tracked change of one key.
    pub fn undo_one(&self, key: &EntityKey, collection: EntityCollection) -> EntityCollection {
        self.undo_many(std::slice::from_ref(key), collection)
    }

    fn key_of(&self, entity: &Entity, operation: &'static str) -> CoreResult<EntityKey> {
        self.adapter
            .select_id(entity)
            .ok_or_else(|| CoreError::key_required(&self.entity_name, operation))
    }
}

fn ignores(merge_strategy: Option<MergeStrategy>) -> bool {
    merge_strategy == Some(MergeStrategy::IgnoreChanges)
}

fn is_tracked(collection: &EntityCollection, key: &EntityKey) -> bool {
    collection.change_type_of(key) != ChangeType::Unchanged
}

/// Moves a tracked change's undo baseline to a server value.
///
/// A key the server knows about can no longer be `Added`; it becomes
/// `Updated` so that undo restores the server value.
fn rebase(change: &ChangeState, server_value: Entity) -> ChangeState {
    match change.change_type {
        ChangeType::Added => ChangeState::updated(server_value),
        change_type => ChangeState {
            change_type,
            original_value: Some(server_value),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enticache_model::default_select_id;
    use serde_json::json;

    fn tracker() -> EntityChangeTracker {
        EntityChangeTracker::new("Hero", adapter())
    }

    fn adapter() -> EntityAdapter {
        EntityAdapter::new(default_select_id(), None)
    }

    fn key(n: i64) -> EntityKey {
        EntityKey::Num(n)
    }

    fn heroes() -> EntityCollection {
        adapter().add_many(
            &[
                json!({"id": 1, "name": "A"}),
                json!({"id": 2, "name": "B"}),
            ],
            EntityCollection::new("Hero"),
        )
    }

    fn updated_locally(name: &str) -> EntityCollection {
        let update = Update::new(1, json!({"name": name}));
        let c = tracker().track_update_one(&update, heroes(), None).unwrap();
        adapter().update_one(&update, c)
    }

    #[test]
    fn add_tracking_is_first_write_wins() {
        let c = tracker()
            .track_add_one(&json!({"id": 3}), heroes(), None)
            .unwrap();
        let c = tracker().track_add_one(&json!({"id": 3}), c, None).unwrap();
        assert_eq!(c.change_of(&key(3)), Some(&ChangeState::added()));
        assert_eq!(c.change_state.len(), 1);
    }

    #[test]
    fn add_without_key_fails() {
        let err = tracker()
            .track_add_one(&json!({"name": "keyless"}), heroes(), None)
            .unwrap_err();
        assert_eq!(err, CoreError::key_required("Hero", "add"));
    }

    #[test]
    fn ignore_changes_means_do_not_track() {
        let c = tracker()
            .track_add_one(&json!({"id": 3}), heroes(), Some(MergeStrategy::IgnoreChanges))
            .unwrap();
        assert!(!c.has_changes());
        let c = tracker().track_delete_one(&key(1), c, Some(MergeStrategy::IgnoreChanges));
        assert!(!c.has_changes());
    }

    #[test]
    fn update_snapshot_is_taken_before_first_update() {
        let c = updated_locally("B1");
        let second = Update::new(1, json!({"name": "B2"}));
        let c = tracker().track_update_one(&second, c, None).unwrap();
        let c = adapter().update_one(&second, c);

        assert_eq!(c.get(&key(1)).unwrap()["name"], "B2");
        assert_eq!(
            c.change_of(&key(1)),
            Some(&ChangeState::updated(json!({"id": 1, "name": "A"})))
        );
    }

    #[test]
    fn update_to_missing_key_is_silently_ignored() {
        let c = tracker()
            .track_update_one(&Update::new(42, json!({"name": "ghost"})), heroes(), None)
            .unwrap();
        assert!(!c.has_changes());
        assert_eq!(c, heroes());
    }

    #[test]
    fn update_with_empty_key_fails() {
        let err = tracker()
            .track_update_one(&Update::new("", json!({})), heroes(), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::KeyRequired { operation: "update", .. }));
    }

    #[test]
    fn delete_cases() {
        // Added: tracking dropped.
        let c = tracker().track_add_one(&json!({"id": 3}), heroes(), None).unwrap();
        let c = adapter().add_one(&json!({"id": 3}), c);
        let c = tracker().track_delete_one(&key(3), c, None);
        assert!(c.change_of(&key(3)).is_none());

        // Updated: becomes Deleted with the update's snapshot.
        let c = tracker().track_delete_one(&key(1), updated_locally("Z"), None);
        assert_eq!(
            c.change_of(&key(1)),
            Some(&ChangeState::deleted(json!({"id": 1, "name": "A"})))
        );

        // Untracked: snapshot of the current value.
        let c = tracker().track_delete_one(&key(2), heroes(), None);
        assert_eq!(
            c.change_of(&key(2)),
            Some(&ChangeState::deleted(json!({"id": 2, "name": "B"})))
        );
    }

    #[test]
    fn upsert_classifies_added_or_updated() {
        let c = tracker()
            .track_upsert_many(&[json!({"id": 1, "name": "X"}), json!({"id": 9})], heroes(), None)
            .unwrap();
        assert_eq!(c.change_type_of(&key(1)), ChangeType::Updated);
        assert_eq!(c.change_type_of(&key(9)), ChangeType::Added);
        assert_eq!(
            c.change_of(&key(1)).unwrap().original_value,
            Some(json!({"id": 1, "name": "A"}))
        );
    }

    #[test]
    fn commit_clears_tracking() {
        let c = updated_locally("Z");
        let once = tracker().commit_one(&key(1), c);
        assert!(!once.has_changes());
        assert_eq!(tracker().commit_one(&key(1), once.clone()), once);
        assert!(!tracker().commit_all(updated_locally("Z")).has_changes());
    }

    #[test]
    fn undo_restores_and_is_idempotent() {
        let c = tracker().track_add_one(&json!({"id": 3}), updated_locally("Z"), None).unwrap();
        let c = adapter().add_one(&json!({"id": 3}), c);
        let c = tracker().track_delete_one(&key(2), c, None);
        let c = adapter().remove_one(&key(2), c);

        let undone = tracker().undo_all(c);
        assert!(!undone.has_changes());
        assert!(!undone.contains(&key(3)));
        assert_eq!(undone.get(&key(1)).unwrap()["name"], "A");
        assert_eq!(undone.get(&key(2)).unwrap()["name"], "B");
        assert_eq!(tracker().undo_all(undone.clone()), undone);
    }

    #[test]
    fn server_upsert_merge_matrix() {
        let server = [json!({"id": 1, "name": "Server"}), json!({"id": 7, "name": "New"})];

        let c = tracker().merge_server_upserts(
            &server,
            updated_locally("Local"),
            MergeStrategy::PreserveChanges,
            Some(MergeStrategy::OverwriteChanges),
        );
        assert_eq!(c.get(&key(1)).unwrap()["name"], "Server");
        assert!(c.change_of(&key(1)).is_none());

        let c = tracker().merge_query_results(&server, updated_locally("Local"), None);
        assert_eq!(c.get(&key(1)).unwrap()["name"], "Local");
        assert_eq!(
            c.change_of(&key(1)),
            Some(&ChangeState::updated(json!({"id": 1, "name": "Server"})))
        );
        assert_eq!(c.get(&key(7)).unwrap()["name"], "New");

        let c = tracker().merge_query_results(
            &server,
            updated_locally("Local"),
            Some(MergeStrategy::IgnoreChanges),
        );
        assert_eq!(c.get(&key(1)).unwrap()["name"], "Server");
        assert_eq!(
            c.change_of(&key(1)),
            Some(&ChangeState::updated(json!({"id": 1, "name": "A"})))
        );
    }

    #[test]
    fn preserve_turns_added_into_updated() {
        let c = tracker().track_add_one(&json!({"id": 3, "v": 1}), heroes(), None).unwrap();
        let c = adapter().add_one(&json!({"id": 3, "v": 1}), c);
        let c = tracker().merge_query_results(&[json!({"id": 3, "v": 0})], c, None);
        assert_eq!(c.get(&key(3)).unwrap()["v"], 1);
        assert_eq!(
            c.change_of(&key(3)),
            Some(&ChangeState::updated(json!({"id": 3, "v": 0})))
        );
    }

    #[test]
    fn save_deletes_commit_unless_ignoring() {
        let dirty = tracker().track_delete_one(&key(1), heroes(), None);
        let c = tracker().merge_save_deletes(&[key(1)], dirty.clone(), None);
        assert!(!c.contains(&key(1)));
        assert!(!c.has_changes());

        let c = tracker().merge_save_deletes(&[key(1)], dirty, Some(MergeStrategy::IgnoreChanges));
        assert!(!c.contains(&key(1)));
        assert!(c.has_changes());
    }

    #[test]
    fn save_updates_skip_unchanged_only_skips_writes() {
        let c = updated_locally("Newer");
        let confirmed = UpdateResponseData::from_update(Update::new(1, json!({"name": "Sent"})), false);
        let c = tracker().merge_save_updates(&[confirmed], c, None, true);
        assert_eq!(c.get(&key(1)).unwrap()["name"], "Newer");
        assert!(!c.has_changes());
    }

    #[test]
    fn save_updates_overwrite_applies_changed_responses() {
        let c = updated_locally("Sent");
        let confirmed = UpdateResponseData::from_update(
            Update::new(1, json!({"name": "Sent", "rev": 2})),
            true,
        );
        let c = tracker().merge_save_updates(&[confirmed], c, None, true);
        assert_eq!(c.get(&key(1)).unwrap(), &json!({"id": 1, "name": "Sent", "rev": 2}));
        assert!(!c.has_changes());
    }

    #[test]
    fn save_updates_preserve_rebases_baseline() {
        let c = updated_locally("Local");
        let confirmed = UpdateResponseData::from_update(Update::new(1, json!({"rev": 2})), true);
        let c = tracker().merge_save_updates(
            &[confirmed],
            c,
            Some(MergeStrategy::PreserveChanges),
            false,
        );
        assert_eq!(c.get(&key(1)).unwrap()["name"], "Local");
        assert_eq!(
            c.change_of(&key(1)),
            Some(&ChangeState::updated(json!({"id": 1, "name": "A", "rev": 2})))
        );
    }

    #[test]
    fn save_updates_preserve_gives_added_key_a_whole_baseline() {
        let local = json!({"id": 3, "name": "local"});
        let c = tracker().track_add_one(&local, heroes(), None).unwrap();
        let c = adapter().add_one(&local, c);
        let confirmed = UpdateResponseData::from_update(Update::new(3, json!({"rev": 2})), true);
        let c = tracker().merge_save_updates(
            &[confirmed],
            c,
            Some(MergeStrategy::PreserveChanges),
            false,
        );
        assert_eq!(
            c.change_of(&key(3)),
            Some(&ChangeState::updated(json!({"id": 3, "name": "local", "rev": 2})))
        );

        let c = tracker().undo_one(&key(3), c);
        assert_eq!(c.get(&key(3)).unwrap(), &json!({"id": 3, "name": "local", "rev": 2}));
        assert!(!c.has_changes());
    }

    #[test]
    fn rekeying_update_carries_tracking_and_undoes() {
        let update = Update::new(1, json!({"id": 10, "name": "Z"}));
        let c = tracker().track_update_one(&update, heroes(), None).unwrap();
        let c = adapter().update_one(&update, c);
        assert!(c.change_of(&key(1)).is_none());
        assert_eq!(
            c.change_of(&key(10)),
            Some(&ChangeState::updated(json!({"id": 1, "name": "A"})))
        );

        let c = tracker().undo_one(&key(10), c);
        assert!(!c.contains(&key(10)));
        assert_eq!(c.get(&key(1)).unwrap(), &json!({"id": 1, "name": "A"}));
        assert_eq!(c.len(), 2);
        assert!(!c.has_changes());
    }
}
