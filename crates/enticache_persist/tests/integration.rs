//! Integration tests for the store, the orchestrators and the dispatcher.

use enticache_core::EntityDefinition;
use enticache_model::{
    Action, ActionData, ChangeSet, ChangeSetItem, ChangeType, CorrelationId, DataServiceError,
    EntityAction, EntityActionOptions, EntityKey, EntityOp, QueryParams,
};
use enticache_persist::{
    EntityStore, InMemoryDataService, PersistConfig, PersistError, ReducedAction, RetryConfig,
    SaveEntitiesOptions, StoreConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn store_with(server: &InMemoryDataService, config: StoreConfig) -> EntityStore {
    EntityStore::builder()
        .with_definition(EntityDefinition::new("Hero"))
        .with_definition(EntityDefinition::new("Villain"))
        .with_data_service("Hero", Arc::new(server.for_entity("Hero")))
        .with_data_service("Villain", Arc::new(server.for_entity("Villain")))
        .with_cache_data_service(Arc::new(server.clone()))
        .with_config(config)
        .build()
        .unwrap()
}

fn store(server: &InMemoryDataService) -> EntityStore {
    store_with(server, StoreConfig::default())
}

async fn terminal(reduced: &mut broadcast::Receiver<ReducedAction>, crid: &CorrelationId) -> EntityAction {
    loop {
        let next = reduced.recv().await.unwrap();
        if let Action::Entity(action) = next.action {
            let op = action.op();
            if action.correlation_id() == Some(crid)
                && (op.is_success() || op.is_error() || op == EntityOp::CanceledPersist)
            {
                return action;
            }
        }
    }
}

#[tokio::test]
async fn optimistic_add_then_server_confirms() {
    let server = InMemoryDataService::new().with_enrichment(|_, mut entity| {
        entity["rev"] = json!(1);
        entity
    });
    server.close_gate();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let action = heroes
        .create_action(
            EntityOp::SaveAddOne,
            Some(ActionData::Entity(json!({"id": 1, "name": "A"}))),
            EntityActionOptions::new().optimistic(true),
        )
        .unwrap();
    let crid = action.correlation_id().unwrap().clone();
    let mut reduced = store.subscribe();
    store.dispatch(action);

    let cache = store.cache();
    let collection = cache.get("Hero").unwrap();
    assert!(collection.contains(&EntityKey::Num(1)));
    assert_eq!(collection.change_type_of(&EntityKey::Num(1)), ChangeType::Added);
    assert!(collection.loading);

    server.open_gate();
    let outcome = terminal(&mut reduced, &crid).await;
    assert_eq!(outcome.op(), EntityOp::SaveAddOneSuccess);

    assert_eq!(
        heroes.by_key(&EntityKey::Num(1)),
        Some(json!({"id": 1, "name": "A", "rev": 1}))
    );
    assert!(heroes.changes().is_empty());
    assert!(!heroes.loading());
}

#[tokio::test]
async fn cancel_and_result_race_yields_one_outcome() {
    let server = InMemoryDataService::new();
    server.close_gate();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let action = heroes
        .create_action(
            EntityOp::SaveUpsertOne,
            Some(ActionData::Entity(json!({"id": 3, "name": "C"}))),
            EntityActionOptions::new().optimistic(false),
        )
        .unwrap();
    let crid = action.correlation_id().unwrap().clone();
    let mut reduced = store.subscribe();
    store.dispatch(action);

    server.wait_for_calls(1).await;
    heroes.cancel(crid.clone(), Some("user".into())).unwrap();
    server.open_gate();

    let mut follow_ups = Vec::new();
    while let Ok(Ok(next)) = tokio::time::timeout(Duration::from_millis(50), reduced.recv()).await {
        if let Action::Entity(action) = next.action {
            let op = action.op();
            if action.correlation_id() == Some(&crid)
                && op != EntityOp::SaveUpsertOne
                && op != EntityOp::CancelPersist
            {
                follow_ups.push(op);
            }
        }
    }
    assert_eq!(follow_ups, vec![EntityOp::CanceledPersist]);
    assert!(server.stored("Hero").is_empty());
    assert_eq!(store.pending_requests(), 0);
    assert_eq!(store.stats().canceled, 1);
    assert!(!heroes.loading());
}

#[tokio::test]
async fn cancel_after_result_changes_nothing() {
    let server = InMemoryDataService::new();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let action = heroes
        .create_action(
            EntityOp::SaveUpsertOne,
            Some(ActionData::Entity(json!({"id": 4, "name": "D"}))),
            EntityActionOptions::new().optimistic(false),
        )
        .unwrap();
    let crid = action.correlation_id().unwrap().clone();
    let mut reduced = store.subscribe();
    store.dispatch(action);

    let outcome = terminal(&mut reduced, &crid).await;
    assert_eq!(outcome.op(), EntityOp::SaveUpsertOneSuccess);
    heroes.cancel(crid.clone(), Some("too late".into())).unwrap();

    let mut follow_ups = Vec::new();
    while let Ok(Ok(next)) = tokio::time::timeout(Duration::from_millis(50), reduced.recv()).await {
        if let Action::Entity(action) = next.action {
            if action.correlation_id() == Some(&crid) && action.op() != EntityOp::CancelPersist {
                follow_ups.push(action.op());
            }
        }
    }
    assert!(follow_ups.is_empty(), "unexpected follow-ups {follow_ups:?}");
    assert_eq!(server.stored("Hero").len(), 1);
    assert_eq!(heroes.by_key(&EntityKey::Num(4)), Some(json!({"id": 4, "name": "D"})));
    assert_eq!(store.stats().canceled, 0);
    assert_eq!(store.pending_requests(), 0);
}

#[tokio::test]
async fn dispatch_and_await_reports_cancellation() {
    let server = InMemoryDataService::new();
    server.close_gate();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let waiting = {
        let heroes = heroes.clone();
        tokio::spawn(async move {
            heroes
                .get_all(EntityActionOptions::new().with_correlation_id("load-heroes"))
                .await
        })
    };
    server.wait_for_calls(1).await;
    heroes
        .cancel(CorrelationId::from("load-heroes"), Some("navigated away".into()))
        .unwrap();

    match waiting.await.unwrap() {
        Err(PersistError::Canceled { correlation_id, reason }) => {
            assert_eq!(correlation_id.as_str(), "load-heroes");
            assert_eq!(reason.as_deref(), Some("navigated away"));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn deleting_unsaved_entity_never_reaches_server() {
    let server = InMemoryDataService::new();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    heroes.add_one_to_cache(json!({"id": 5, "name": "Draft"})).unwrap();
    assert_eq!(heroes.changes()[0].1.change_type, ChangeType::Added);

    let key = heroes
        .delete(EntityKey::Num(5), EntityActionOptions::new())
        .await
        .unwrap();
    assert_eq!(key, EntityKey::Num(5));
    assert_eq!(server.call_count(), 0);
    assert_eq!(heroes.count(), 0);
    assert!(heroes.changes().is_empty());
    assert_eq!(store.stats().skipped, 1);
}

#[tokio::test]
async fn batch_delete_of_unsaved_entity_never_reaches_server() {
    let server = InMemoryDataService::new();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    heroes.add_one_to_cache(json!({"id": 7, "name": "Draft"})).unwrap();
    let change_set = ChangeSet::new(vec![ChangeSetItem::delete("Hero", vec![EntityKey::Num(7)])]);
    store
        .save_entities(change_set, SaveEntitiesOptions::default())
        .await
        .unwrap();

    assert_eq!(server.call_count(), 0);
    assert_eq!(heroes.count(), 0);
    assert!(heroes.changes().is_empty());
    assert!(!heroes.loading());
}

#[tokio::test]
async fn pessimistic_update_applies_server_changes() {
    let server = InMemoryDataService::new().with_enrichment(|_, mut entity| {
        entity["rev"] = json!(2);
        entity
    });
    server.seed("Hero", vec![json!({"id": 1, "name": "Ann"})]);
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let loaded = heroes.load(EntityActionOptions::new()).await.unwrap();
    assert_eq!(loaded, vec![json!({"id": 1, "name": "Ann"})]);
    assert!(heroes.loaded());

    let response = heroes
        .update(json!({"id": 1, "name": "Bea"}), EntityActionOptions::new())
        .await
        .unwrap();
    assert!(response.changed);
    assert_eq!(
        heroes.by_key(&EntityKey::Num(1)),
        Some(json!({"id": 1, "name": "Bea", "rev": 2}))
    );
    assert!(!heroes.loading());
}

#[tokio::test]
async fn pessimistic_add_takes_server_key() {
    let server = InMemoryDataService::new();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let saved = heroes
        .add(json!({"name": "Nova"}), EntityActionOptions::new())
        .await
        .unwrap();
    assert_eq!(saved["id"], 1000);
    assert_eq!(heroes.entities(), vec![json!({"id": 1000, "name": "Nova"})]);
    assert!(heroes.changes().is_empty());
}

#[tokio::test]
async fn optimistic_add_without_key_is_rejected() {
    let server = InMemoryDataService::new();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let err = heroes
        .add(json!({"name": "Nova"}), EntityActionOptions::new().optimistic(true))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistError::Action(ref e) if e.is_invalid_action()));
    assert_eq!(server.call_count(), 0);
    assert_eq!(heroes.count(), 0);
}

#[tokio::test]
async fn failed_pessimistic_save_leaves_cache_alone() {
    let server = InMemoryDataService::new();
    server.fail_next(DataServiceError::new("conflict"));
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let err = heroes
        .upsert(json!({"id": 2, "name": "B"}), EntityActionOptions::new())
        .await
        .unwrap_err();
    match err {
        PersistError::DataService(error) => assert_eq!(error.message, "conflict"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(heroes.count(), 0);
    assert!(!heroes.loading());
    assert_eq!(store.stats().failed, 1);
}

#[tokio::test]
async fn query_with_parameters_merges_results() {
    let server = InMemoryDataService::new();
    server.seed(
        "Villain",
        vec![
            json!({"id": 1, "name": "Dr. Nice"}),
            json!({"id": 2, "name": "Magneta"}),
            json!({"id": 3, "name": "Dr. IQ"}),
        ],
    );
    let store = store(&server);
    let villains = store.dispatcher("Villain").unwrap();

    let params = QueryParams::from([("name".to_string(), "dr".to_string())]);
    let found = villains
        .get_with_query(params, EntityActionOptions::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(villains.count(), 2);
    assert!(!villains.loaded());
}

#[tokio::test]
async fn queries_retry_through_the_store() {
    let server = InMemoryDataService::new();
    server.seed("Hero", vec![json!({"id": 1})]);
    server.fail_next(DataServiceError::retryable("busy"));
    let config = StoreConfig::new().with_persist(
        PersistConfig::new().with_retry(RetryConfig::new(2).with_initial_delay(Duration::from_millis(1))),
    );
    let store = store_with(&server, config);
    let heroes = store.dispatcher("Hero").unwrap();

    let all = heroes.get_all(EntityActionOptions::new()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(store.stats().retries, 1);
}

#[tokio::test]
async fn batch_save_reconciles_every_type() {
    let server = InMemoryDataService::new();
    server.seed("Villain", vec![json!({"id": 9, "name": "Vex"})]);
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();
    let villains = store.dispatcher("Villain").unwrap();
    villains.load(EntityActionOptions::new()).await.unwrap();

    let change_set = ChangeSet::new(vec![
        ChangeSetItem::add("Hero", vec![json!({"id": 1, "name": "Ann"})]),
        ChangeSetItem::delete("Villain", vec![EntityKey::Num(9)]),
    ]);
    let saved = store
        .save_entities(change_set, SaveEntitiesOptions::default())
        .await
        .unwrap();
    assert_eq!(saved.changes.len(), 2);

    assert!(heroes.by_key(&EntityKey::Num(1)).is_some());
    assert_eq!(villains.count(), 0);
    assert!(!heroes.loading());
    assert!(!villains.loading());
    assert!(server.stored("Villain").is_empty());
}

#[tokio::test]
async fn batch_fold_error_stops_without_rollback() {
    let server = InMemoryDataService::new();
    let store = store(&server);
    let villains = store.dispatcher("Villain").unwrap();

    let change_set = ChangeSet::new(vec![
        ChangeSetItem::add("Villain", vec![json!({"id": 2, "name": "Vim"})]),
        ChangeSetItem::add("Hero", vec![json!({"name": "no key"})]),
    ]);
    let options = SaveEntitiesOptions {
        is_optimistic: Some(true),
        ..SaveEntitiesOptions::default()
    };
    let err = store.save_entities(change_set, options).await.unwrap_err();
    match err {
        PersistError::DataService(error) => assert!(error.message.contains("item 1")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(server.call_count(), 0);
    assert!(villains.by_key(&EntityKey::Num(2)).is_some());
    assert!(!villains.loading());
}

#[tokio::test]
async fn batch_cancel_clears_loading() {
    let server = InMemoryDataService::new();
    server.close_gate();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let change_set = ChangeSet::new(vec![ChangeSetItem::add(
        "Hero",
        vec![json!({"id": 1, "name": "Ann"})],
    )]);
    let options = SaveEntitiesOptions {
        correlation_id: Some("batch-7".into()),
        ..SaveEntitiesOptions::default()
    };
    let saving = {
        let store = store.clone();
        tokio::spawn(async move { store.save_entities(change_set, options).await })
    };

    server.wait_for_calls(1).await;
    assert!(heroes.loading());
    store.cancel_save_entities(CorrelationId::from("batch-7"), Some("navigated away".into()));
    server.open_gate();

    let err = saving.await.unwrap().unwrap_err();
    assert!(err.is_canceled());
    assert!(!heroes.loading());
    assert!(server.stored("Hero").is_empty());
}

#[tokio::test]
async fn optimistic_batch_without_body_skips_replay() {
    let server = InMemoryDataService::new().with_empty_bodies();
    let store = store(&server);
    let heroes = store.dispatcher("Hero").unwrap();

    let change_set = ChangeSet::new(vec![ChangeSetItem::add(
        "Hero",
        vec![json!({"id": 1, "name": "Ann"})],
    )]);
    let options = SaveEntitiesOptions {
        is_optimistic: Some(true),
        ..SaveEntitiesOptions::default()
    };
    let saved = store.save_entities(change_set.clone(), options).await.unwrap();

    assert_eq!(saved, change_set);
    assert_eq!(heroes.count(), 1);
    assert!(!heroes.loading());
    assert_eq!(server.stored("Hero").len(), 1);
}
