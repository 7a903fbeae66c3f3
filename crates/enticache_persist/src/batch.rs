//! Persistence of batch saves.

use crate::cancellation::CancelToken;
use crate::config::PersistConfig;
use crate::data_service::{DataServiceRegistry, DataServiceResult};
use crate::orchestrator::{with_timeout, SharedStats};
use enticache_core::EntityCollectionReducers;
use enticache_model::{
    Action, ActionData, ChangeSet, ChangeSetItem, ChangeSetOperation, DataServiceError,
    EntityActionFactory, EntityActionOptions, EntityCacheAction, EntityKey, EntityOp,
    SaveEntitiesPayload, Update, WireChangeSet, WireChangeSetItem,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Sends whole change sets and reconstructs the reply.
///
/// The transport works on the flattened [`WireChangeSet`]: updates travel as
/// their changes and deletes as bare keys. Replies are restored with each
/// entity type's key selector.
pub struct ChangeSetPersistence {
    services: Arc<DataServiceRegistry>,
    reducers: Arc<EntityCollectionReducers>,
    factory: EntityActionFactory,
    config: PersistConfig,
    stats: SharedStats,
}

impl ChangeSetPersistence {
    /// Creates a batch orchestrator.
    pub fn new(
        services: Arc<DataServiceRegistry>,
        reducers: Arc<EntityCollectionReducers>,
        factory: EntityActionFactory,
        config: PersistConfig,
    ) -> Self {
        Self {
            services,
            reducers,
            factory,
            config,
            stats: SharedStats::default(),
        }
    }

    pub(crate) fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    /// Saves a batch and returns the actions that conclude it.
    ///
    /// The last action is always the terminal one: `SAVE_ENTITIES_SUCCESS`,
    /// `SAVE_ENTITIES_ERROR` or `SAVE_ENTITIES_CANCELED`. An optimistic save
    /// answered without a body is preceded by one `SET_LOADING(false)` per
    /// entity type, and its success is marked `skip`.
    pub async fn save_entities(&self, payload: SaveEntitiesPayload, mut cancel: CancelToken) -> Vec<Action> {
        self.stats.write().requests += 1;

        if let Some(error) = payload.error.clone() {
            self.stats.write().failed += 1;
            return vec![self.failed(payload, error.into_data_service_error())];
        }

        let change_set = payload.change_set.clone().exclude_empty_items();
        if change_set.changes.is_empty() {
            debug!(correlation_id = %payload.correlation_id, "nothing to save");
            self.stats.write().succeeded += 1;
            return vec![EntityCacheAction::SaveEntitiesSuccess(payload.with_change_set(change_set)).into()];
        }

        let entity_names = change_set.entity_names();
        debug!(
            correlation_id = %payload.correlation_id,
            items = change_set.changes.len(),
            "saving change set"
        );
        tokio::select! {
            biased;
            reason = cancel.canceled() => {
                self.stats.write().canceled += 1;
                info!(correlation_id = %payload.correlation_id, reason = ?reason, "batch save canceled");
                vec![EntityCacheAction::SaveEntitiesCanceled {
                    correlation_id: payload.correlation_id.clone(),
                    reason,
                    entity_names,
                    tag: payload.tag.clone(),
                }
                .into()]
            }
            result = self.send(&change_set, &payload.url) => match result {
                Ok(Some(saved)) => {
                    self.stats.write().succeeded += 1;
                    vec![EntityCacheAction::SaveEntitiesSuccess(payload.with_change_set(saved)).into()]
                }
                Ok(None) => {
                    self.stats.write().succeeded += 1;
                    self.no_content(payload, change_set, entity_names)
                }
                Err(error) => {
                    self.stats.write().failed += 1;
                    vec![self.failed(payload, error)]
                }
            },
        }
    }

    async fn send(&self, change_set: &ChangeSet, url: &str) -> DataServiceResult<Option<ChangeSet>> {
        let service = self
            .services
            .cache_service()
            .map_err(|e| DataServiceError::from_raw(e.to_string(), &e))?;
        let reply = with_timeout(
            self.config.request_timeout,
            service.save_entities(change_set.to_wire(), url),
        )
        .await?;
        match reply {
            Some(wire) if !wire.changes.is_empty() => self.restore(wire).map(Some),
            _ => Ok(None),
        }
    }

    /// Rebuilds a change set from its transport form.
    pub fn restore(&self, wire: WireChangeSet) -> DataServiceResult<ChangeSet> {
        let changes = wire
            .changes
            .into_iter()
            .map(|item| self.restore_item(item))
            .collect::<DataServiceResult<Vec<_>>>()?;
        Ok(ChangeSet {
            changes,
            tag: wire.tag,
            extras: wire.extras,
        })
    }

    fn restore_item(&self, item: WireChangeSetItem) -> DataServiceResult<ChangeSetItem> {
        let WireChangeSetItem {
            entity_name,
            op,
            entities,
        } = item;
        Ok(match op {
            ChangeSetOperation::Add => ChangeSetItem::add(entity_name, entities),
            ChangeSetOperation::Upsert => ChangeSetItem::upsert(entity_name, entities),
            ChangeSetOperation::Delete => {
                let keys = entities
                    .iter()
                    .map(|value| {
                        EntityKey::from_value(value).ok_or_else(|| {
                            DataServiceError::new(format!(
                                "saved {entity_name} delete carries an invalid key {value}"
                            ))
                        })
                    })
                    .collect::<DataServiceResult<Vec<_>>>()?;
                ChangeSetItem::delete(entity_name, keys)
            }
            ChangeSetOperation::Update => {
                let updates = entities
                    .into_iter()
                    .map(|entity| -> DataServiceResult<Update> {
                        let id = self.reducers.select_id(&entity_name, &entity).ok_or_else(|| {
                            DataServiceError::new(format!(
                                "saved {entity_name} update has no key"
                            ))
                        })?;
                        Ok(Update::new(id, entity))
                    })
                    .collect::<DataServiceResult<Vec<_>>>()?;
                ChangeSetItem::update(entity_name, updates)
            }
        })
    }

    fn no_content(
        &self,
        payload: SaveEntitiesPayload,
        change_set: ChangeSet,
        entity_names: Vec<String>,
    ) -> Vec<Action> {
        if !payload.is_optimistic {
            return vec![EntityCacheAction::SaveEntitiesSuccess(payload.with_change_set(change_set)).into()];
        }

        let mut actions: Vec<Action> = Vec::with_capacity(entity_names.len() + 1);
        for entity_name in entity_names {
            let options = EntityActionOptions {
                correlation_id: Some(payload.correlation_id.clone()),
                tag: payload.tag.clone(),
                ..EntityActionOptions::default()
            };
            match self.factory.create(
                entity_name,
                EntityOp::SetLoading,
                Some(ActionData::Flag(false)),
                options,
            ) {
                Ok(action) => actions.push(action.into()),
                Err(error) => warn!(%error, "cannot clear loading flag"),
            }
        }
        let mut success = payload.with_change_set(change_set);
        success.skip = true;
        actions.push(EntityCacheAction::SaveEntitiesSuccess(success).into());
        actions
    }

    fn failed(&self, payload: SaveEntitiesPayload, error: DataServiceError) -> Action {
        error!(
            correlation_id = %payload.correlation_id,
            retryable = error.retryable,
            %error,
            "batch save failed"
        );
        EntityCacheAction::SaveEntitiesError {
            error,
            original: payload,
        }
        .into()
    }
}

impl std::fmt::Debug for ChangeSetPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSetPersistence")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationRegistry;
    use crate::mock::InMemoryDataService;
    use enticache_core::{EntityDefinition, EntityDefinitionService};
    use enticache_model::{ActionError, CorrelationId};
    use serde_json::json;

    fn setup() -> (InMemoryDataService, ChangeSetPersistence, Arc<CancellationRegistry>) {
        let server = InMemoryDataService::new();
        let services = Arc::new(DataServiceRegistry::new());
        services.set_cache_service(Arc::new(server.clone()));
        let definitions = EntityDefinitionService::new()
            .with(EntityDefinition::new("Hero"))
            .with(EntityDefinition::new("Villain"));
        let batch = ChangeSetPersistence::new(
            services,
            Arc::new(EntityCollectionReducers::from_definitions(&definitions)),
            EntityActionFactory::new(),
            PersistConfig::default(),
        );
        (server, batch, Arc::new(CancellationRegistry::new()))
    }

    fn payload(optimistic: bool) -> SaveEntitiesPayload {
        let change_set = ChangeSet::new(vec![
            ChangeSetItem::add("Hero", vec![json!({"id": 1, "name": "Ann"})]),
            ChangeSetItem::update("Villain", vec![Update::new(9, json!({"id": 9, "name": "Vim"}))]),
            ChangeSetItem::delete("Hero", vec![]),
        ]);
        let mut payload = SaveEntitiesPayload::new(change_set, "api/save", CorrelationId::from("B1"));
        payload.is_optimistic = optimistic;
        payload
    }

    fn token(registry: &Arc<CancellationRegistry>) -> CancelToken {
        registry.register(CorrelationId::from("B1"))
    }

    #[tokio::test]
    async fn success_restores_updates() {
        let (server, batch, registry) = setup();
        server.seed("Villain", vec![json!({"id": 9, "name": "Vex", "rev": 3})]);

        let actions = batch.save_entities(payload(false), token(&registry)).await;
        assert_eq!(actions.len(), 1);
        let Action::Cache(EntityCacheAction::SaveEntitiesSuccess(saved)) = &actions[0] else {
            panic!("unexpected outcome {actions:?}");
        };
        assert_eq!(saved.change_set.changes.len(), 2);
        match &saved.change_set.changes[1] {
            ChangeSetItem::Update { updates, .. } => {
                assert_eq!(updates[0].id, EntityKey::Num(9));
                assert_eq!(updates[0].changes["rev"], 3);
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_change_set_succeeds_without_sending() {
        let (server, batch, registry) = setup();
        let mut empty = payload(false);
        empty.change_set = ChangeSet::new(vec![ChangeSetItem::add("Hero", vec![])]);

        let actions = batch.save_entities(empty, token(&registry)).await;
        assert!(matches!(
            &actions[..],
            [Action::Cache(EntityCacheAction::SaveEntitiesSuccess(p))] if p.change_set.changes.is_empty()
        ));
        assert_eq!(server.call_count(), 0);
    }

    #[tokio::test]
    async fn optimistic_without_body_only_clears_loading() {
        let (server, batch, registry) = setup();
        server.seed("Villain", vec![json!({"id": 9, "name": "Vex"})]);
        server.set_empty_bodies(true);

        let actions = batch.save_entities(payload(true), token(&registry)).await;
        assert_eq!(actions.len(), 3);
        for action in &actions[..2] {
            let Action::Entity(action) = action else {
                panic!("expected entity action");
            };
            assert_eq!(action.op(), EntityOp::SetLoading);
            assert_eq!(action.data(), Some(&ActionData::Flag(false)));
        }
        assert!(matches!(
            &actions[2],
            Action::Cache(EntityCacheAction::SaveEntitiesSuccess(p)) if p.skip
        ));
    }

    #[tokio::test]
    async fn pessimistic_without_body_returns_request() {
        let (server, batch, registry) = setup();
        server.seed("Villain", vec![json!({"id": 9, "name": "Vex"})]);
        server.set_empty_bodies(true);

        let request = payload(false);
        let actions = batch.save_entities(request.clone(), token(&registry)).await;
        let Action::Cache(EntityCacheAction::SaveEntitiesSuccess(saved)) = &actions[0] else {
            panic!("unexpected outcome {actions:?}");
        };
        assert!(!saved.skip);
        assert_eq!(saved.change_set, request.change_set.exclude_empty_items());
    }

    #[tokio::test]
    async fn transport_error_and_recorded_error() {
        let (server, batch, registry) = setup();
        server.fail_next(DataServiceError::new("rejected"));
        let actions = batch.save_entities(payload(false), token(&registry)).await;
        assert!(matches!(
            &actions[0],
            Action::Cache(EntityCacheAction::SaveEntitiesError { error, .. }) if error.message == "rejected"
        ));

        let mut recorded = payload(false);
        recorded.error = Some(ActionError::invalid_action("bad item"));
        let actions = batch.save_entities(recorded, token(&registry)).await;
        assert!(matches!(
            &actions[0],
            Action::Cache(EntityCacheAction::SaveEntitiesError { .. })
        ));
        assert_eq!(server.call_count(), 1);
    }

    #[tokio::test]
    async fn cancel_names_affected_types() {
        let (server, batch, registry) = setup();
        server.close_gate();
        let token = token(&registry);
        let canceller = async {
            server.wait_for_calls(1).await;
            registry.cancel(&CorrelationId::from("B1"), None);
        };
        let (actions, ()) = tokio::join!(batch.save_entities(payload(false), token), canceller);
        match &actions[..] {
            [Action::Cache(EntityCacheAction::SaveEntitiesCanceled { entity_names, .. })] => {
                assert_eq!(entity_names, &vec!["Hero".to_string(), "Villain".to_string()]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(server.stored("Hero").is_empty());
    }
}
