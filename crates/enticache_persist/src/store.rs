//! The dispatch sink: reduces actions and runs their persistence.

use crate::batch::ChangeSetPersistence;
use crate::cancellation::{CancelToken, CancellationRegistry};
use crate::config::StoreConfig;
use crate::data_service::{DataServiceRegistry, EntityCacheDataService, EntityDataService};
use crate::dispatcher::EntityDispatcher;
use crate::error::{PersistError, PersistResult};
use crate::orchestrator::{EntityPersistence, PersistStats, SharedStats};
use crate::result_handler::{DefaultPersistenceResultHandler, PersistenceResultHandler};
use enticache_core::{
    EntityCacheReducer, EntityCollectionReducers, EntityDefinition, EntityDefinitionService,
};
use enticache_model::{
    Action, ActionData, ActionError, ChangeSet, CorrelationId, CorrelationIdGenerator,
    DataServiceError, EntityAction, EntityActionFactory, EntityCache, EntityCacheAction, EntityOp,
    MergeStrategy, SaveEntitiesPayload,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// An action after reduction, with the cache it produced.
#[derive(Debug, Clone)]
pub struct ReducedAction {
    /// The action as reduced, including any recorded error or skip flag.
    pub action: Action,
    /// Cache after the action.
    pub cache: EntityCache,
}

/// Options for a batch save.
#[derive(Debug, Clone, Default)]
pub struct SaveEntitiesOptions {
    /// Caller-supplied correlation id.
    pub correlation_id: Option<CorrelationId>,
    /// Optimistic flag; the dispatcher default when absent.
    pub is_optimistic: Option<bool>,
    /// Merge strategy for the reply.
    pub merge_strategy: Option<MergeStrategy>,
    /// Batch endpoint; the configured one when absent.
    pub url: Option<String>,
}

enum Pending {
    Entity(EntityAction, CancelToken),
    Batch(SaveEntitiesPayload, CancelToken),
}

struct StoreInner {
    cache: RwLock<EntityCache>,
    reducer: EntityCacheReducer,
    persistence: EntityPersistence,
    batch: ChangeSetPersistence,
    cancellations: Arc<CancellationRegistry>,
    services: Arc<DataServiceRegistry>,
    definitions: Arc<EntityDefinitionService>,
    factory: EntityActionFactory,
    reduced: broadcast::Sender<ReducedAction>,
    stats: SharedStats,
    config: StoreConfig,
    runtime: Handle,
}

/// The entity cache store.
///
/// Every action is reduced under the store's write lock, so actions are
/// applied in dispatch order and each is published on the reduced-action
/// stream in that same order. Persist-eligible actions then run on spawned
/// tasks whose terminal follow-ups are dispatched back into the store.
/// Requests with different correlation ids complete in any order.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

impl EntityStore {
    /// Creates a store builder.
    pub fn builder() -> EntityStoreBuilder {
        EntityStoreBuilder::new()
    }

    /// Snapshot of the current cache.
    pub fn cache(&self) -> EntityCache {
        self.inner.cache.read().clone()
    }

    /// Subscribes to the reduced-action stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ReducedAction> {
        self.inner.reduced.subscribe()
    }

    /// The action factory shared with the reducers.
    pub fn factory(&self) -> &EntityActionFactory {
        &self.inner.factory
    }

    /// Registered entity definitions.
    pub fn definitions(&self) -> &EntityDefinitionService {
        &self.inner.definitions
    }

    /// Data services consulted per request.
    pub fn services(&self) -> &Arc<DataServiceRegistry> {
        &self.inner.services
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Persistence counters.
    pub fn stats(&self) -> PersistStats {
        self.inner.stats.read().clone()
    }

    /// Number of requests in flight.
    pub fn pending_requests(&self) -> usize {
        self.inner.cancellations.len()
    }

    /// Returns a dispatcher for an entity type.
    pub fn dispatcher(&self, entity_name: &str) -> PersistResult<EntityDispatcher> {
        let definition = self.inner.definitions.definition(entity_name)?;
        Ok(EntityDispatcher::new(
            self.clone(),
            definition,
            self.inner.config.dispatcher,
        ))
    }

    /// Reduces an action and starts its persistence, if any.
    ///
    /// Returns the action as reduced. Errors recorded while reducing are on
    /// the returned action, not in a `Result`.
    pub fn dispatch(&self, action: impl Into<Action>) -> Action {
        let mut action = action.into();
        let pending = {
            let mut cache = self.inner.cache.write();
            let next = self.inner.reducer.reduce(cache.clone(), &mut action);
            *cache = next.clone();
            let pending = self.route(&action);
            let _ = self.inner.reduced.send(ReducedAction {
                action: action.clone(),
                cache: next,
            });
            pending
        };
        if let Some(pending) = pending {
            self.spawn(pending);
        }
        action
    }

    /// Dispatches a persist-eligible action and waits for its terminal
    /// follow-up.
    ///
    /// Resolves to the success data, or fails with the transport error or
    /// the cancellation.
    pub async fn dispatch_and_await(&self, action: EntityAction) -> PersistResult<Option<ActionData>> {
        let op = action.op();
        if !op.is_persist() {
            return Err(ActionError::invalid_action(format!("{op} is not a persistence operation")).into());
        }
        let correlation_id = action
            .correlation_id()
            .cloned()
            .ok_or_else(|| ActionError::invalid_action("persistence request without a correlation id"))?;

        let mut reduced = self.subscribe();
        self.dispatch(action);
        loop {
            let Action::Entity(outcome) = self.next_reduced(&mut reduced).await?.action else {
                continue;
            };
            if outcome.correlation_id() != Some(&correlation_id) {
                continue;
            }
            let outcome_op = outcome.op();
            if Some(outcome_op) == op.success_op() {
                return Ok(outcome.payload.data);
            }
            if Some(outcome_op) == op.error_op() {
                return Err(match outcome.payload.data {
                    Some(ActionData::Error(details)) => PersistError::DataService(details.error),
                    _ => PersistError::DataService(DataServiceError::new(format!("{op} failed"))),
                });
            }
            if outcome_op == EntityOp::CanceledPersist {
                let reason = match outcome.payload.data {
                    Some(ActionData::Canceled { reason }) => reason,
                    _ => None,
                };
                return Err(PersistError::canceled(correlation_id, reason));
            }
        }
    }

    /// Saves a change set and waits for the terminal batch outcome.
    ///
    /// Resolves to the change set the cache was reconciled with: the
    /// server's reply, or the request when the server sent no body.
    pub async fn save_entities(&self, change_set: ChangeSet, options: SaveEntitiesOptions) -> PersistResult<ChangeSet> {
        let correlation_id = options
            .correlation_id
            .unwrap_or_else(|| self.inner.factory.next_correlation_id());
        let url = options
            .url
            .unwrap_or_else(|| self.inner.config.save_entities_url.clone());
        let mut payload = SaveEntitiesPayload::new(change_set, url, correlation_id.clone());
        payload.is_optimistic = options
            .is_optimistic
            .unwrap_or(self.inner.config.dispatcher.optimistic_save_entities);
        payload.merge_strategy = options.merge_strategy;

        let mut reduced = self.subscribe();
        self.dispatch(EntityCacheAction::SaveEntities(payload));
        loop {
            let Action::Cache(outcome) = self.next_reduced(&mut reduced).await?.action else {
                continue;
            };
            if outcome.correlation_id() != Some(&correlation_id) || !outcome.is_terminal() {
                continue;
            }
            return match outcome {
                EntityCacheAction::SaveEntitiesSuccess(saved) => Ok(saved.change_set),
                EntityCacheAction::SaveEntitiesError { error, .. } => Err(PersistError::DataService(error)),
                EntityCacheAction::SaveEntitiesCanceled { reason, .. } => {
                    Err(PersistError::canceled(correlation_id, reason))
                }
                _ => continue,
            };
        }
    }

    /// Requests cancellation of a batch save.
    pub fn cancel_save_entities(&self, correlation_id: CorrelationId, reason: Option<String>) {
        self.dispatch(EntityCacheAction::SaveEntitiesCancel {
            correlation_id,
            reason,
            entity_names: Vec::new(),
            tag: None,
        });
    }

    async fn next_reduced(
        &self,
        reduced: &mut broadcast::Receiver<ReducedAction>,
    ) -> PersistResult<ReducedAction> {
        match reduced.recv().await {
            Ok(action) => Ok(action),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "reduced action stream lagged, outcome may be lost");
                Err(PersistError::ChannelLagged { missed })
            }
            Err(broadcast::error::RecvError::Closed) => Err(PersistError::ChannelClosed),
        }
    }

    /// Picks the work an action starts. Runs under the cache write lock so
    /// a cancel dispatched later always finds the token.
    fn route(&self, action: &Action) -> Option<Pending> {
        match action {
            Action::Entity(action) if action.op() == EntityOp::CancelPersist => {
                let reason = match action.data() {
                    Some(ActionData::Canceled { reason }) => reason.clone(),
                    _ => None,
                };
                if let Some(correlation_id) = action.correlation_id() {
                    self.inner.cancellations.cancel(correlation_id, reason);
                }
                None
            }
            Action::Entity(action) if action.op().is_persist() => {
                let Some(correlation_id) = action.correlation_id() else {
                    warn!(op = %action.op(), "persistence request without a correlation id");
                    return None;
                };
                let token = self.inner.cancellations.register(correlation_id.clone());
                Some(Pending::Entity(action.clone(), token))
            }
            Action::Cache(EntityCacheAction::SaveEntitiesCancel {
                correlation_id,
                reason,
                ..
            }) => {
                self.inner.cancellations.cancel(correlation_id, reason.clone());
                None
            }
            Action::Cache(EntityCacheAction::SaveEntities(payload)) => {
                let token = self.inner.cancellations.register(payload.correlation_id.clone());
                Some(Pending::Batch(payload.clone(), token))
            }
            _ => None,
        }
    }

    fn spawn(&self, pending: Pending) {
        let store = self.clone();
        match pending {
            Pending::Entity(action, token) => {
                debug!(entity_name = %action.entity_name(), op = %action.op(), "spawning persistence");
                self.inner.runtime.spawn(async move {
                    let outcome = store.inner.persistence.persist(action, token).await;
                    store.dispatch(outcome);
                });
            }
            Pending::Batch(payload, token) => {
                debug!(correlation_id = %payload.correlation_id, "spawning batch persistence");
                self.inner.runtime.spawn(async move {
                    for outcome in store.inner.batch.save_entities(payload, token).await {
                        store.dispatch(outcome);
                    }
                });
            }
        }
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("entity_types", &self.inner.cache.read().entity_names())
            .field("pending_requests", &self.pending_requests())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builds an [`EntityStore`].
pub struct EntityStoreBuilder {
    definitions: EntityDefinitionService,
    services: Arc<DataServiceRegistry>,
    result_handler: Option<Arc<dyn PersistenceResultHandler>>,
    ids: Option<CorrelationIdGenerator>,
    initial_cache: EntityCache,
    config: StoreConfig,
}

impl EntityStoreBuilder {
    /// Creates a builder with no entity types.
    pub fn new() -> Self {
        Self {
            definitions: EntityDefinitionService::new(),
            services: Arc::new(DataServiceRegistry::new()),
            result_handler: None,
            ids: None,
            initial_cache: EntityCache::new(),
            config: StoreConfig::default(),
        }
    }

    /// Registers an entity type.
    pub fn with_definition(mut self, definition: EntityDefinition) -> Self {
        self.definitions.register(definition);
        self
    }

    /// Registers the data service of an entity type.
    pub fn with_data_service(self, entity_name: impl Into<String>, service: Arc<dyn EntityDataService>) -> Self {
        self.services.register_service(entity_name, service);
        self
    }

    /// Sets the batch data service.
    pub fn with_cache_data_service(self, service: Arc<dyn EntityCacheDataService>) -> Self {
        self.services.set_cache_service(service);
        self
    }

    /// Replaces the persistence result handler.
    pub fn with_result_handler(mut self, handler: Arc<dyn PersistenceResultHandler>) -> Self {
        self.result_handler = Some(handler);
        self
    }

    /// Sets the correlation id source.
    pub fn with_correlation_ids(mut self, ids: CorrelationIdGenerator) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Starts from a restored cache.
    pub fn with_initial_cache(mut self, cache: EntityCache) -> Self {
        self.initial_cache = cache;
        self
    }

    /// Sets the store configuration.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the store on the current tokio runtime.
    pub fn build(self) -> PersistResult<EntityStore> {
        let runtime = Handle::try_current().map_err(|_| PersistError::NoRuntime)?;
        let factory = match self.ids {
            Some(ids) => EntityActionFactory::with_generator(ids),
            None => EntityActionFactory::new(),
        };
        let reducers = Arc::new(EntityCollectionReducers::from_definitions(&self.definitions));
        let result_handler = self
            .result_handler
            .unwrap_or_else(|| Arc::new(DefaultPersistenceResultHandler::new(factory.clone())));
        let stats = SharedStats::default();
        let persistence = EntityPersistence::new(
            Arc::clone(&self.services),
            Arc::clone(&reducers),
            result_handler,
            factory.clone(),
            self.config.persist.clone(),
        )
        .with_stats(Arc::clone(&stats));
        let batch = ChangeSetPersistence::new(
            Arc::clone(&self.services),
            Arc::clone(&reducers),
            factory.clone(),
            self.config.persist.clone(),
        )
        .with_stats(Arc::clone(&stats));
        let (reduced, _) = broadcast::channel(self.config.reduced_channel_capacity.max(1));

        Ok(EntityStore {
            inner: Arc::new(StoreInner {
                cache: RwLock::new(self.initial_cache),
                reducer: EntityCacheReducer::new(reducers, factory.clone()),
                persistence,
                batch,
                cancellations: Arc::new(CancellationRegistry::new()),
                services: self.services,
                definitions: Arc::new(self.definitions),
                factory,
                reduced,
                stats,
                config: self.config,
                runtime,
            }),
        })
    }
}

impl Default for EntityStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
