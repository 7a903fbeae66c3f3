//! Entity records, keys and update shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// An opaque application record.
pub type Entity = Value;

/// Extracts the primary key of an entity.
///
/// Returns `None` when no full key is derivable; it never panics.
pub type IdSelector = Arc<dyn Fn(&Entity) -> Option<EntityKey> + Send + Sync>;

/// Primary key of an entity: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    /// Integral key.
    Num(i64),
    /// String key.
    Str(String),
}

impl EntityKey {
    /// Reads a key out of a JSON value.
    ///
    /// Only non-empty strings and integral numbers are keys.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(EntityKey::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(EntityKey::Num),
            _ => None,
        }
    }

    /// Converts the key back into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            EntityKey::Num(n) => Value::from(*n),
            EntityKey::Str(s) => Value::String(s.clone()),
        }
    }

    /// Returns true if the key can identify an entity.
    pub fn is_valid(&self) -> bool {
        match self {
            EntityKey::Num(_) => true,
            EntityKey::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Num(n) => write!(f, "{n}"),
            EntityKey::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        EntityKey::Str(s.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        EntityKey::Str(s)
    }
}

impl From<i64> for EntityKey {
    fn from(n: i64) -> Self {
        EntityKey::Num(n)
    }
}

impl From<i32> for EntityKey {
    fn from(n: i32) -> Self {
        EntityKey::Num(i64::from(n))
    }
}

impl From<u32> for EntityKey {
    fn from(n: u32) -> Self {
        EntityKey::Num(i64::from(n))
    }
}

/// Key selector reading the `id` field.
pub fn default_select_id() -> IdSelector {
    select_id_by_field("id")
}

/// Key selector reading the named top-level field.
pub fn select_id_by_field(field: impl Into<String>) -> IdSelector {
    let field = field.into();
    Arc::new(move |entity: &Entity| entity.get(&field).and_then(EntityKey::from_value))
}

/// Shallow-merges `changes` over `original`.
///
/// Objects merge field by field with `changes` winning; any other shape is
/// replaced by `changes`.
pub fn merge_changes(original: &Entity, changes: &Entity) -> Entity {
    match (original, changes) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged: Map<String, Value> = base.clone();
            for (field, value) in patch {
                merged.insert(field.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => changes.clone(),
    }
}

/// Returns true for a reply body that carries no entity data.
pub fn is_empty_body(value: &Entity) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Changes to apply to the entity with key `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Key of the entity being changed.
    pub id: EntityKey,
    /// Fields to merge over the current value.
    pub changes: Entity,
}

impl Update {
    /// Creates an update.
    pub fn new(id: impl Into<EntityKey>, changes: Entity) -> Self {
        Self {
            id: id.into(),
            changes,
        }
    }

    /// Builds an update that sends the whole entity as its changes.
    pub fn from_entity(entity: Entity, select_id: &IdSelector) -> Option<Self> {
        let id = select_id(&entity)?;
        Some(Self {
            id,
            changes: entity,
        })
    }
}

/// A server-confirmed update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponseData {
    /// Key of the updated entity.
    pub id: EntityKey,
    /// Changes the cache should apply.
    pub changes: Entity,
    /// Whether the server altered the entity beyond the sent changes.
    pub changed: bool,
}

impl UpdateResponseData {
    /// Creates response data from an update.
    pub fn from_update(update: Update, changed: bool) -> Self {
        Self {
            id: update.id,
            changes: update.changes,
            changed,
        }
    }

    /// Returns the plain update.
    pub fn to_update(&self) -> Update {
        Update {
            id: self.id.clone(),
            changes: self.changes.clone(),
        }
    }
}
