//! Persistence of single-entity requests.

use crate::cancellation::CancelToken;
use crate::config::PersistConfig;
use crate::data_service::{DataServiceRegistry, DataServiceResult};
use crate::result_handler::PersistenceResultHandler;
use enticache_core::EntityCollectionReducers;
use enticache_model::{
    is_empty_body, merge_changes, ActionData, DataServiceError, Entity, EntityAction,
    EntityActionFactory, EntityKey, EntityOp, QueryParams, UpdateResponseData,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Counters over the lifetime of the orchestrators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStats {
    /// Requests handed to an orchestrator.
    pub requests: u64,
    /// Requests that ended in success, skipped ones included.
    pub succeeded: u64,
    /// Requests that ended in error.
    pub failed: u64,
    /// Requests that ended by cancellation.
    pub canceled: u64,
    /// Requests answered without calling the server.
    pub skipped: u64,
    /// Repeated attempts after a retryable error.
    pub retries: u64,
}

/// Shared handle to the counters.
pub(crate) type SharedStats = Arc<RwLock<PersistStats>>;

/// Runs `call` under the configured timeout.
pub(crate) async fn with_timeout<T, F>(timeout: Option<Duration>, call: F) -> DataServiceResult<T>
where
    F: Future<Output = DataServiceResult<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(DataServiceError::timeout(limit.as_millis())),
        },
        None => call.await,
    }
}

/// Turns persist-eligible entity actions into exactly one terminal
/// follow-up: success, error or `CANCELED_PERSIST`.
///
/// The request races its cancellation token. Whichever resolves first
/// decides the outcome; the losing future is dropped, so a canceled
/// request has no further side effects.
pub struct EntityPersistence {
    services: Arc<DataServiceRegistry>,
    reducers: Arc<EntityCollectionReducers>,
    result_handler: Arc<dyn PersistenceResultHandler>,
    factory: EntityActionFactory,
    config: PersistConfig,
    stats: SharedStats,
}

impl EntityPersistence {
    /// Creates an orchestrator.
    pub fn new(
        services: Arc<DataServiceRegistry>,
        reducers: Arc<EntityCollectionReducers>,
        result_handler: Arc<dyn PersistenceResultHandler>,
        factory: EntityActionFactory,
        config: PersistConfig,
    ) -> Self {
        Self {
            services,
            reducers,
            result_handler,
            factory,
            config,
            stats: SharedStats::default(),
        }
    }

    pub(crate) fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    /// Current counters.
    pub fn stats(&self) -> PersistStats {
        self.stats.read().clone()
    }

    /// Persists a request and returns its terminal follow-up.
    pub async fn persist(&self, action: EntityAction, mut cancel: CancelToken) -> EntityAction {
        self.stats.write().requests += 1;

        if action.payload.skip {
            if self.config.skip_yield {
                tokio::task::yield_now().await;
            }
            debug!(
                entity_name = %action.entity_name(),
                op = %action.op(),
                "request marked skip, answering without the server"
            );
            {
                let mut stats = self.stats.write();
                stats.skipped += 1;
                stats.succeeded += 1;
            }
            return self
                .result_handler
                .handle_success(&action, action.payload.data.clone());
        }

        if let Some(error) = action.error().cloned() {
            self.stats.write().failed += 1;
            return self
                .result_handler
                .handle_error(&action, error.into_data_service_error());
        }

        debug!(
            entity_name = %action.entity_name(),
            op = %action.op(),
            correlation_id = ?action.correlation_id(),
            "calling data service"
        );
        tokio::select! {
            biased;
            reason = cancel.canceled() => {
                self.stats.write().canceled += 1;
                info!(
                    entity_name = %action.entity_name(),
                    op = %action.op(),
                    correlation_id = ?action.correlation_id(),
                    reason = ?reason,
                    "persistence canceled"
                );
                self.factory.create_from_action(
                    &action,
                    EntityOp::CanceledPersist,
                    Some(ActionData::Canceled { reason }),
                )
            }
            result = self.call_with_retry(&action) => match result {
                Ok(data) => {
                    self.stats.write().succeeded += 1;
                    self.result_handler.handle_success(&action, data)
                }
                Err(error) => {
                    self.stats.write().failed += 1;
                    self.result_handler.handle_error(&action, error)
                }
            },
        }
    }

    async fn call_with_retry(&self, action: &EntityAction) -> DataServiceResult<Option<ActionData>> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let result = with_timeout(self.config.request_timeout, self.call_data_service(action)).await;
            match result {
                Err(error)
                    if action.op().is_query()
                        && error.retryable
                        && attempt + 1 < retry.max_attempts =>
                {
                    attempt += 1;
                    self.stats.write().retries += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    debug!(
                        entity_name = %action.entity_name(),
                        op = %action.op(),
                        attempt,
                        ?delay,
                        %error,
                        "retrying query"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn call_data_service(&self, action: &EntityAction) -> DataServiceResult<Option<ActionData>> {
        let service = self
            .services
            .service(action.entity_name())
            .map_err(|e| DataServiceError::from_raw(e.to_string(), &e))?;
        let name = action.entity_name();

        match (action.op(), action.data()) {
            (EntityOp::QueryAll | EntityOp::QueryLoad, _) => {
                let entities = service.get_all().await?;
                Ok(Some(ActionData::Entities(entities)))
            }
            (EntityOp::QueryByKey, Some(ActionData::Key(key))) => {
                let entity = service.get_by_id(key.clone()).await?;
                Ok(entity.map(ActionData::Entity))
            }
            (EntityOp::QueryMany, data) => {
                let params = match data {
                    Some(ActionData::Query(params)) => params.clone(),
                    _ => QueryParams::new(),
                };
                let entities = service.get_with_query(params).await?;
                Ok(Some(ActionData::Entities(entities)))
            }
            (EntityOp::SaveAddOne, Some(ActionData::Entity(entity))) => {
                let stored = service.add(entity.clone()).await?;
                Ok(Some(ActionData::Entity(echo_unless_body(stored, entity))))
            }
            (EntityOp::SaveDeleteOne, Some(data)) => {
                let key = self.delete_key(name, data)?;
                service.delete(key.clone()).await?;
                Ok(Some(ActionData::Key(key)))
            }
            (EntityOp::SaveUpdateOne, Some(ActionData::Update(update))) => {
                let stored = service.update(update.clone()).await?;
                let response = match stored {
                    Some(body) if !is_empty_body(&body) => UpdateResponseData {
                        id: update.id.clone(),
                        changes: merge_changes(&update.changes, &body),
                        changed: true,
                    },
                    _ => UpdateResponseData::from_update(update.clone(), false),
                };
                Ok(Some(ActionData::UpdateResponse(response)))
            }
            (EntityOp::SaveUpsertOne, Some(ActionData::Entity(entity))) => {
                let stored = service.upsert(entity.clone()).await?;
                Ok(Some(ActionData::Entity(echo_unless_body(stored, entity))))
            }
            (op, _) if op.is_persist() => Err(DataServiceError::new(format!(
                "{op} payload of {name} has the wrong shape"
            ))),
            (op, _) => Err(DataServiceError::new(format!(
                "{op} is not a persistence operation"
            ))),
        }
    }

    fn delete_key(&self, entity_name: &str, data: &ActionData) -> DataServiceResult<EntityKey> {
        match data {
            ActionData::Key(key) => Ok(key.clone()),
            ActionData::Entity(entity) => self
                .reducers
                .select_id(entity_name, entity)
                .ok_or_else(|| DataServiceError::new(format!("{entity_name} entity has no key"))),
            _ => Err(DataServiceError::new(format!(
                "delete payload of {entity_name} should be a key or an entity"
            ))),
        }
    }
}

fn echo_unless_body(stored: Option<Entity>, sent: &Entity) -> Entity {
    match stored {
        Some(body) if !is_empty_body(&body) => body,
        _ => sent.clone(),
    }
}

impl std::fmt::Debug for EntityPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityPersistence")
            .field("services", &self.services)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
