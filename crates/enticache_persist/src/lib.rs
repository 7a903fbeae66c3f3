//! # enticache Persist
//!
//! Persistence orchestration and the dispatch store for enticache.
//!
//! This crate provides:
//! - Data service contracts (`EntityDataService`, `EntityCacheDataService`)
//!   and an in-memory implementation for tests and demos
//! - `EntityPersistence`, which races each request against its
//!   cancellation and yields exactly one terminal follow-up
//! - `ChangeSetPersistence`, the same for whole batches
//! - `EntityStore`, which reduces actions in dispatch order, publishes them
//!   and runs their persistence on spawned tasks
//! - `EntityDispatcher`, a per-type handle with sensible optimism defaults
//!
//! ## Request lifecycle
//!
//! 1. The request action is reduced (optimistic saves change the cache now)
//! 2. A cancellation token is registered under its correlation id
//! 3. The orchestrator calls the data service, or answers at once if the
//!    reducer marked the action `skip` or recorded an error
//! 4. The terminal follow-up is dispatched and reduced like any action
//!
//! Canceling does not revert optimistic changes. Undo them explicitly.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod cancellation;
mod config;
mod data_service;
mod dispatcher;
mod error;
mod mock;
mod orchestrator;
mod result_handler;
mod store;

pub use batch::ChangeSetPersistence;
pub use cancellation::{CancelToken, CancellationRegistry};
pub use config::{DispatcherOptions, PersistConfig, RetryConfig, StoreConfig};
pub use data_service::{
    DataServiceRegistry, DataServiceResult, EntityCacheDataService, EntityDataService,
};
pub use dispatcher::EntityDispatcher;
pub use error::{PersistError, PersistResult};
pub use mock::{EnrichFn, InMemoryDataService};
pub use orchestrator::{EntityPersistence, PersistStats};
pub use result_handler::{DefaultPersistenceResultHandler, PersistenceResultHandler};
pub use store::{EntityStore, EntityStoreBuilder, ReducedAction, SaveEntitiesOptions};
