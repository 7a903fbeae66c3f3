//! Multi-entity-type batches and their wire form.

use crate::entity::{Entity, EntityKey, Update};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation of a change set item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeSetOperation {
    /// Add new entities.
    Add,
    /// Delete entities by key.
    Delete,
    /// Apply updates.
    Update,
    /// Add or replace entities.
    Upsert,
}

/// One entity type's share of a change set.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSetItem {
    /// Entities to add.
    Add {
        /// Entity type.
        entity_name: String,
        /// New entities.
        entities: Vec<Entity>,
    },
    /// Keys to delete.
    Delete {
        /// Entity type.
        entity_name: String,
        /// Keys.
        keys: Vec<EntityKey>,
    },
    /// Updates to apply.
    Update {
        /// Entity type.
        entity_name: String,
        /// Updates.
        updates: Vec<Update>,
    },
    /// Entities to upsert.
    Upsert {
        /// Entity type.
        entity_name: String,
        /// Entities.
        entities: Vec<Entity>,
    },
}

impl ChangeSetItem {
    /// Creates an add item.
    pub fn add(entity_name: impl Into<String>, entities: Vec<Entity>) -> Self {
        ChangeSetItem::Add {
            entity_name: entity_name.into(),
            entities,
        }
    }

    /// Creates a delete item.
    pub fn delete(entity_name: impl Into<String>, keys: Vec<EntityKey>) -> Self {
        ChangeSetItem::Delete {
            entity_name: entity_name.into(),
            keys,
        }
    }

    /// Creates an update item.
    pub fn update(entity_name: impl Into<String>, updates: Vec<Update>) -> Self {
        ChangeSetItem::Update {
            entity_name: entity_name.into(),
            updates,
        }
    }

    /// Creates an upsert item.
    pub fn upsert(entity_name: impl Into<String>, entities: Vec<Entity>) -> Self {
        ChangeSetItem::Upsert {
            entity_name: entity_name.into(),
            entities,
        }
    }

    /// Entity type of the item.
    pub fn entity_name(&self) -> &str {
        match self {
            ChangeSetItem::Add { entity_name, .. }
            | ChangeSetItem::Delete { entity_name, .. }
            | ChangeSetItem::Update { entity_name, .. }
            | ChangeSetItem::Upsert { entity_name, .. } => entity_name,
        }
    }

    /// Operation of the item.
    pub fn op(&self) -> ChangeSetOperation {
        match self {
            ChangeSetItem::Add { .. } => ChangeSetOperation::Add,
            ChangeSetItem::Delete { .. } => ChangeSetOperation::Delete,
            ChangeSetItem::Update { .. } => ChangeSetOperation::Update,
            ChangeSetItem::Upsert { .. } => ChangeSetOperation::Upsert,
        }
    }

    /// Number of entities, keys or updates in the item.
    pub fn len(&self) -> usize {
        match self {
            ChangeSetItem::Add { entities, .. } | ChangeSetItem::Upsert { entities, .. } => {
                entities.len()
            }
            ChangeSetItem::Delete { keys, .. } => keys.len(),
            ChangeSetItem::Update { updates, .. } => updates.len(),
        }
    }

    /// Returns true if the item carries nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens the item: updates become their changes, keys become values.
    pub fn to_wire(&self) -> WireChangeSetItem {
        let entities = match self {
            ChangeSetItem::Add { entities, .. } | ChangeSetItem::Upsert { entities, .. } => {
                entities.clone()
            }
            ChangeSetItem::Delete { keys, .. } => keys.iter().map(EntityKey::to_value).collect(),
            ChangeSetItem::Update { updates, .. } => {
                updates.iter().map(|u| u.changes.clone()).collect()
            }
        };
        WireChangeSetItem {
            entity_name: self.entity_name().to_string(),
            op: self.op(),
            entities,
        }
    }
}

/// An ordered batch of changes across entity types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Items, applied in order.
    pub changes: Vec<ChangeSetItem>,
    /// Tag shown in action types.
    pub tag: Option<String>,
    /// Caller-opaque data passed through to the transport.
    pub extras: Option<Value>,
}

impl ChangeSet {
    /// Creates a change set from its items.
    pub fn new(changes: Vec<ChangeSetItem>) -> Self {
        Self {
            changes,
            tag: None,
            extras: None,
        }
    }

    /// Sets the tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the extras.
    pub fn with_extras(mut self, extras: Value) -> Self {
        self.extras = Some(extras);
        self
    }

    /// Drops items that carry nothing.
    pub fn exclude_empty_items(mut self) -> Self {
        self.changes.retain(|item| !item.is_empty());
        self
    }

    /// Returns true if no item carries anything.
    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(ChangeSetItem::is_empty)
    }

    /// Entity types touched by the batch, first occurrence order.
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for item in &self.changes {
            if !names.iter().any(|n| n == item.entity_name()) {
                names.push(item.entity_name().to_string());
            }
        }
        names
    }

    /// Flattens the batch into its transport form.
    pub fn to_wire(&self) -> WireChangeSet {
        WireChangeSet {
            changes: self.changes.iter().map(ChangeSetItem::to_wire).collect(),
            tag: self.tag.clone(),
            extras: self.extras.clone(),
        }
    }
}

/// Transport form of a change set item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChangeSetItem {
    /// Entity type.
    pub entity_name: String,
    /// Operation.
    pub op: ChangeSetOperation,
    /// Entities, changes or keys as plain JSON.
    pub entities: Vec<Value>,
}

/// Transport form of a change set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChangeSet {
    /// Items.
    pub changes: Vec<WireChangeSetItem>,
    /// Tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Caller-opaque data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ChangeSet {
        ChangeSet::new(vec![
            ChangeSetItem::add("Hero", vec![json!({"id": 1, "name": "A"})]),
            ChangeSetItem::delete("Villain", vec![EntityKey::Num(9)]),
            ChangeSetItem::upsert("Hero", vec![]),
            ChangeSetItem::update("Hero", vec![Update::new(2, json!({"id": 2, "name": "B"}))]),
        ])
        .with_tag("Batch")
    }

    #[test]
    fn exclude_empty_items_keeps_order() {
        let change_set = sample().exclude_empty_items();
        let ops: Vec<_> = change_set.changes.iter().map(ChangeSetItem::op).collect();
        assert_eq!(
            ops,
            vec![
                ChangeSetOperation::Add,
                ChangeSetOperation::Delete,
                ChangeSetOperation::Update
            ]
        );
        assert!(!change_set.is_empty());
        assert!(ChangeSet::new(vec![ChangeSetItem::add("Hero", vec![])]).is_empty());
    }

    #[test]
    fn entity_names_are_unique() {
        assert_eq!(sample().entity_names(), vec!["Hero".to_string(), "Villain".to_string()]);
    }

    #[test]
    fn wire_form_flattens_updates_and_keys() {
        let wire = serde_json::to_value(sample().to_wire()).unwrap();
        assert_eq!(wire["tag"], json!("Batch"));
        assert_eq!(wire["changes"][0]["entityName"], json!("Hero"));
        assert_eq!(wire["changes"][1]["op"], json!("delete"));
        assert_eq!(wire["changes"][1]["entities"], json!([9]));
        assert_eq!(wire["changes"][3]["entities"], json!([{"id": 2, "name": "B"}]));
        assert!(wire.get("extras").is_none());
    }
}
