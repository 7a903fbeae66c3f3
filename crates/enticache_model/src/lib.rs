//! # enticache Model
//!
//! Action model and data shapes for the enticache entity cache.
//!
//! This crate provides:
//! - `EntityKey`, `Update` and `UpdateResponseData` for entity records
//! - `EntityCollection` and `EntityCache`, the cached state per entity type
//! - `ChangeState` and `MergeStrategy` for unsaved local mutations
//! - `EntityOp`, `EntityAction` and `EntityActionFactory` for intents and
//!   their follow-up outcomes
//! - `ChangeSet` for multi-entity-type batch saves
//! - `EntityActionGuard` for payload shape validation
//!
//! This is a pure model crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod cache_action;
mod change;
mod change_set;
mod collection;
mod entity;
mod error;
mod guard;
mod op;

pub use action::{
    ActionData, CorrelationId, CorrelationIdGenerator, EntityAction,
    EntityActionDataServiceError, EntityActionFactory, EntityActionOptions, EntityActionPayload,
    QueryParams,
};
pub use cache_action::{Action, EntityCacheAction, QuerySet, SaveEntitiesPayload};
pub use change::{ChangeState, ChangeStateMap, ChangeType, MergeStrategy};
pub use change_set::{
    ChangeSet, ChangeSetItem, ChangeSetOperation, WireChangeSet, WireChangeSetItem,
};
pub use collection::{CollectionSnapshot, EntityCache, EntityCollection};
pub use entity::{
    default_select_id, is_empty_body, merge_changes, select_id_by_field, Entity, EntityKey,
    IdSelector, Update, UpdateResponseData,
};
pub use error::{ActionError, ActionResult, DataServiceError, RequestInfo};
pub use guard::EntityActionGuard;
pub use op::EntityOp;
