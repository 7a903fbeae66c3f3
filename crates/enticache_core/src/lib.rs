//! # enticache Core
//!
//! Synchronous state layer of the enticache entity cache.
//!
//! This crate provides:
//! - `EntityDefinition` and `EntityDefinitionService` describing entity types
//! - `EntityAdapter`, the ordered id/entity storage primitives
//! - `EntityChangeTracker`, which records unsaved local changes, undoes them
//!   and merges server results under a `MergeStrategy`
//! - `EntityCollectionReducer`, the per-type collection state machine
//! - `EntityCacheReducer`, which routes actions to collections and folds
//!   batch saves across them
//! - `EntitySelectors`, read-only views over the cache
//!
//! Nothing here performs I/O or waits. Every operation returns a new
//! collection or cache value that shares unchanged structure with the old.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod cache_reducer;
mod collection_reducer;
mod definition;
mod error;
mod selectors;
mod tracker;

pub use adapter::{EntityAdapter, SortComparer};
pub use cache_reducer::{batch_error, EntityCacheReducer};
pub use collection_reducer::{EntityCollectionReducer, EntityCollectionReducers};
pub use definition::{EntityDefinition, EntityDefinitionService};
pub use error::{CoreError, CoreResult};
pub use selectors::{EntityFilterFn, EntitySelectors};
pub use tracker::EntityChangeTracker;
