//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, entities and sequences of cache-only
//! mutations. Server-side keys are drawn from `0..SERVER_KEYS` and keys of
//! locally created entities from `LOCAL_KEYS`, so the two never collide.

use enticache_model::{
    ActionData, ActionResult, Entity, EntityAction, EntityActionFactory, EntityActionOptions,
    EntityKey, EntityOp, MergeStrategy, Update,
};
use proptest::prelude::*;
use serde_json::json;
use std::ops::Range;

/// Number of distinct server-side keys.
pub const SERVER_KEYS: i64 = 12;
/// Key range of locally created entities.
pub const LOCAL_KEYS: Range<i64> = 100..106;

/// Strategy for entity names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,7}").expect("Invalid regex")
}

/// Strategy for a server-side key.
pub fn server_key_strategy() -> impl Strategy<Value = EntityKey> {
    (0..SERVER_KEYS).prop_map(EntityKey::Num)
}

/// Strategy for any key a mutation may touch.
pub fn any_key_strategy() -> impl Strategy<Value = EntityKey> {
    prop_oneof![server_key_strategy(), LOCAL_KEYS.prop_map(EntityKey::Num)]
}

/// Strategy for an entity with the given key range.
pub fn entity_strategy(keys: Range<i64>) -> impl Strategy<Value = Entity> {
    (keys, name_strategy(), 0..100i64).prop_map(|(id, name, power)| json!({ "id": id, "name": name, "power": power }))
}

/// Strategy for the server state of a collection: distinct keys.
pub fn server_entities_strategy() -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::btree_map(0..SERVER_KEYS, (name_strategy(), 0..100i64), 0..8).prop_map(|rows| {
        rows.into_iter()
            .map(|(id, (name, power))| json!({ "id": id, "name": name, "power": power }))
            .collect()
    })
}

/// Strategy for a partial update. Changes never touch the key.
pub fn update_strategy() -> impl Strategy<Value = Update> {
    (any_key_strategy(), prop::option::of(name_strategy()), prop::option::of(0..100i64)).prop_map(
        |(id, name, power)| {
            let mut changes = serde_json::Map::new();
            if let Some(name) = name {
                changes.insert("name".into(), json!(name));
            }
            if let Some(power) = power {
                changes.insert("power".into(), json!(power));
            }
            Update::new(id, changes.into())
        },
    )
}

/// Strategy for a merge strategy.
pub fn merge_strategy_strategy() -> impl Strategy<Value = MergeStrategy> {
    prop_oneof![
        Just(MergeStrategy::PreserveChanges),
        Just(MergeStrategy::OverwriteChanges),
        Just(MergeStrategy::IgnoreChanges),
    ]
}

/// A tracked, cache-only mutation.
#[derive(Debug, Clone)]
pub enum CacheMutation {
    /// `ADD_ONE` of a locally created entity.
    Add(Entity),
    /// `UPDATE_ONE`.
    Update(Update),
    /// `UPSERT_ONE`.
    Upsert(Entity),
    /// `REMOVE_ONE`.
    Remove(EntityKey),
}

impl CacheMutation {
    /// Builds the action performing this mutation.
    pub fn to_action(&self, factory: &EntityActionFactory, entity_name: &str) -> ActionResult<EntityAction> {
        let (op, data) = match self {
            CacheMutation::Add(entity) => (EntityOp::AddOne, ActionData::Entity(entity.clone())),
            CacheMutation::Update(update) => (EntityOp::UpdateOne, ActionData::Update(update.clone())),
            CacheMutation::Upsert(entity) => (EntityOp::UpsertOne, ActionData::Entity(entity.clone())),
            CacheMutation::Remove(key) => (EntityOp::RemoveOne, ActionData::Key(key.clone())),
        };
        factory.create(entity_name, op, Some(data), EntityActionOptions::new())
    }
}

/// Strategy for one cache-only mutation.
pub fn cache_mutation_strategy() -> impl Strategy<Value = CacheMutation> {
    prop_oneof![
        entity_strategy(LOCAL_KEYS).prop_map(CacheMutation::Add),
        update_strategy().prop_map(CacheMutation::Update),
        entity_strategy(0..SERVER_KEYS).prop_map(CacheMutation::Upsert),
        entity_strategy(LOCAL_KEYS).prop_map(CacheMutation::Upsert),
        any_key_strategy().prop_map(CacheMutation::Remove),
    ]
}

/// Strategy for a sequence of cache-only mutations.
pub fn cache_mutations_strategy(max_len: usize) -> impl Strategy<Value = Vec<CacheMutation>> {
    prop::collection::vec(cache_mutation_strategy(), 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn server_entities_have_distinct_keys(entities in server_entities_strategy()) {
            let mut ids: Vec<_> = entities.iter().map(|e| e["id"].as_i64()).collect();
            let len = ids.len();
            ids.dedup();
            prop_assert_eq!(ids.len(), len);
        }

        #[test]
        fn updates_never_change_the_key(update in update_strategy()) {
            prop_assert!(update.changes.get("id").is_none());
        }
    }
}
