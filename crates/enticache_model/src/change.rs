//! Change tracking records and merge policies.

use crate::entity::{Entity, EntityKey};
use serde::{Deserialize, Serialize};

/// Kind of unsaved local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// No pending change.
    Unchanged,
    /// Added locally; there is no server value yet.
    Added,
    /// Deleted locally.
    Deleted,
    /// Updated locally.
    Updated,
}

/// Tracked change of a single entity.
///
/// `Updated` and `Deleted` carry the value captured before the first
/// mutation since the last commit; `Added` carries none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeState {
    /// Kind of change.
    pub change_type: ChangeType,
    /// Snapshot to restore on undo.
    pub original_value: Option<Entity>,
}

impl ChangeState {
    /// Change state for a locally added entity.
    pub fn added() -> Self {
        Self {
            change_type: ChangeType::Added,
            original_value: None,
        }
    }

    /// Change state for a locally updated entity.
    pub fn updated(original_value: Entity) -> Self {
        Self {
            change_type: ChangeType::Updated,
            original_value: Some(original_value),
        }
    }

    /// Change state for a locally deleted entity.
    pub fn deleted(original_value: Entity) -> Self {
        Self {
            change_type: ChangeType::Deleted,
            original_value: Some(original_value),
        }
    }
}

/// Tracked changes keyed by entity key.
pub type ChangeStateMap = im::HashMap<EntityKey, ChangeState>;

/// Policy for reconciling server data with unsaved local changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Apply server data verbatim and leave tracking untouched.
    ///
    /// On a tracking operation it means "do not track".
    IgnoreChanges,
    /// Keep pending local values and rebase their undo snapshot.
    PreserveChanges,
    /// Take the server value and discard tracking.
    OverwriteChanges,
}
