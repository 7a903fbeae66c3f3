//! Cache-wide actions spanning several entity types.

use crate::action::{CorrelationId, EntityAction};
use crate::change::MergeStrategy;
use crate::change_set::ChangeSet;
use crate::collection::EntityCache;
use crate::entity::Entity;
use crate::error::{ActionError, DataServiceError};
use std::collections::BTreeMap;

/// Query results per entity type.
pub type QuerySet = BTreeMap<String, Vec<Entity>>;

/// Payload of a batch save and of its success follow-up.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveEntitiesPayload {
    /// The batch.
    pub change_set: ChangeSet,
    /// Batch endpoint.
    pub url: String,
    /// Join key with follow-ups.
    pub correlation_id: CorrelationId,
    /// Apply the batch before the server confirms it.
    pub is_optimistic: bool,
    /// Merge policy for the server reply.
    pub merge_strategy: Option<MergeStrategy>,
    /// Tag shown in the action type.
    pub tag: Option<String>,
    /// Error recorded while folding the batch.
    pub error: Option<ActionError>,
    /// On a success follow-up: the cache already reflects the batch.
    pub skip: bool,
}

impl SaveEntitiesPayload {
    /// Creates a pessimistic batch payload.
    pub fn new(change_set: ChangeSet, url: impl Into<String>, correlation_id: CorrelationId) -> Self {
        let tag = change_set.tag.clone();
        Self {
            change_set,
            url: url.into(),
            correlation_id,
            is_optimistic: false,
            merge_strategy: None,
            tag,
            error: None,
            skip: false,
        }
    }

    /// Derives a payload carrying a different change set, clearing error and skip.
    pub fn with_change_set(&self, change_set: ChangeSet) -> Self {
        Self {
            change_set,
            error: None,
            skip: false,
            ..self.clone()
        }
    }
}

/// Actions reduced against the whole cache.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityCacheAction {
    /// Reset the named collections, or all of them.
    ClearCollections {
        /// Collections to clear; `None` clears every collection.
        collections: Option<Vec<String>>,
        /// Tag.
        tag: Option<String>,
    },
    /// Replace collection contents with query results and mark them loaded.
    LoadCollections {
        /// Entities per type.
        collections: QuerySet,
        /// Tag.
        tag: Option<String>,
    },
    /// Merge query results into the cache.
    MergeQuerySet {
        /// Entities per type.
        query_set: QuerySet,
        /// Merge policy; query default when absent.
        merge_strategy: Option<MergeStrategy>,
        /// Tag.
        tag: Option<String>,
    },
    /// Replace the whole cache.
    SetEntityCache {
        /// New cache.
        cache: EntityCache,
        /// Tag.
        tag: Option<String>,
    },
    /// Save a change set.
    SaveEntities(SaveEntitiesPayload),
    /// Request cancellation of a batch save.
    SaveEntitiesCancel {
        /// Batch to cancel.
        correlation_id: CorrelationId,
        /// Human readable reason.
        reason: Option<String>,
        /// Entity types affected by the batch.
        entity_names: Vec<String>,
        /// Tag.
        tag: Option<String>,
    },
    /// A batch save was canceled.
    SaveEntitiesCanceled {
        /// Canceled batch.
        correlation_id: CorrelationId,
        /// Human readable reason.
        reason: Option<String>,
        /// Entity types affected by the batch.
        entity_names: Vec<String>,
        /// Tag.
        tag: Option<String>,
    },
    /// A batch save succeeded.
    SaveEntitiesSuccess(SaveEntitiesPayload),
    /// A batch save failed.
    SaveEntitiesError {
        /// Transport error.
        error: DataServiceError,
        /// The request.
        original: SaveEntitiesPayload,
    },
}

impl EntityCacheAction {
    /// Canonical type string.
    pub fn type_name(&self) -> String {
        let (op, tag) = match self {
            EntityCacheAction::ClearCollections { tag, .. } => ("clear-collections", tag),
            EntityCacheAction::LoadCollections { tag, .. } => ("load-collections", tag),
            EntityCacheAction::MergeQuerySet { tag, .. } => ("merge-query-set", tag),
            EntityCacheAction::SetEntityCache { tag, .. } => ("set-entity-cache", tag),
            EntityCacheAction::SaveEntities(p) => ("save-entities", &p.tag),
            EntityCacheAction::SaveEntitiesCancel { tag, .. } => ("save-entities-cancel", tag),
            EntityCacheAction::SaveEntitiesCanceled { tag, .. } => ("save-entities-canceled", tag),
            EntityCacheAction::SaveEntitiesSuccess(p) => ("save-entities/success", &p.tag),
            EntityCacheAction::SaveEntitiesError { original, .. } => {
                ("save-entities/error", &original.tag)
            }
        };
        match tag {
            Some(tag) => format!("[{tag}] enticache/{op}"),
            None => format!("[EntityCache] enticache/{op}"),
        }
    }

    /// Correlation id of batch actions.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            EntityCacheAction::SaveEntities(p) | EntityCacheAction::SaveEntitiesSuccess(p) => {
                Some(&p.correlation_id)
            }
            EntityCacheAction::SaveEntitiesCancel { correlation_id, .. }
            | EntityCacheAction::SaveEntitiesCanceled { correlation_id, .. } => Some(correlation_id),
            EntityCacheAction::SaveEntitiesError { original, .. } => Some(&original.correlation_id),
            _ => None,
        }
    }

    /// Returns true for the terminal outcomes of a batch save.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntityCacheAction::SaveEntitiesSuccess(_)
                | EntityCacheAction::SaveEntitiesError { .. }
                | EntityCacheAction::SaveEntitiesCanceled { .. }
        )
    }
}

/// Any action the store reduces.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Action against one collection.
    Entity(EntityAction),
    /// Action against the whole cache.
    Cache(EntityCacheAction),
}

impl Action {
    /// Canonical type string.
    pub fn type_name(&self) -> String {
        match self {
            Action::Entity(action) => action.type_name.clone(),
            Action::Cache(action) => action.type_name(),
        }
    }

    /// Correlation id, if the action has one.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Action::Entity(action) => action.correlation_id(),
            Action::Cache(action) => action.correlation_id(),
        }
    }
}

impl From<EntityAction> for Action {
    fn from(action: EntityAction) -> Self {
        Action::Entity(action)
    }
}

impl From<EntityCacheAction> for Action {
    fn from(action: EntityCacheAction) -> Self {
        Action::Cache(action)
    }
}
