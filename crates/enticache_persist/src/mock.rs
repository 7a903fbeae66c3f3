//! In-memory data service for tests and demos.

use crate::data_service::{DataServiceResult, EntityCacheDataService, EntityDataService};
use async_trait::async_trait;
use enticache_model::{
    default_select_id, is_empty_body, merge_changes, ChangeSetOperation, DataServiceError, Entity,
    EntityKey, IdSelector, QueryParams, RequestInfo, Update, WireChangeSet, WireChangeSetItem,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Server-side transformation applied to stored entities.
pub type EnrichFn = Arc<dyn Fn(&str, Entity) -> Entity + Send + Sync>;

#[derive(Default)]
struct Behaviour {
    latency: Option<Duration>,
    empty_bodies: bool,
    enrich: Option<EnrichFn>,
    select_ids: HashMap<String, IdSelector>,
}

#[derive(Default)]
struct ServerState {
    tables: HashMap<String, BTreeMap<EntityKey, Entity>>,
    failures: VecDeque<DataServiceError>,
    requests: Vec<RequestInfo>,
    next_id: i64,
}

struct Shared {
    state: Mutex<ServerState>,
    behaviour: RwLock<Behaviour>,
    gate: watch::Sender<bool>,
    calls: watch::Sender<usize>,
}

/// A data service backed by in-memory tables, one per entity type.
///
/// Handles created with [`InMemoryDataService::for_entity`] share the same
/// tables. Every request is recorded, then waits for the gate to open,
/// then sleeps for the configured latency, then consumes one injected
/// failure if any, and only then touches the tables. A request abandoned
/// before that point leaves the tables untouched.
#[derive(Clone)]
pub struct InMemoryDataService {
    entity_name: String,
    shared: Arc<Shared>,
}

impl InMemoryDataService {
    /// Creates an empty server with an open gate.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        let (calls, _) = watch::channel(0);
        Self {
            entity_name: String::new(),
            shared: Arc::new(Shared {
                state: Mutex::new(ServerState {
                    next_id: 1000,
                    ..ServerState::default()
                }),
                behaviour: RwLock::new(Behaviour::default()),
                gate,
                calls,
            }),
        }
    }

    /// Returns a handle serving one entity type from the shared tables.
    pub fn for_entity(&self, entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Entity type this handle serves; empty for the batch handle.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Sets the key selector of an entity type. Defaults to the `id` field.
    pub fn with_select_id(self, entity_name: impl Into<String>, select_id: IdSelector) -> Self {
        self.shared
            .behaviour
            .write()
            .select_ids
            .insert(entity_name.into(), select_id);
        self
    }

    /// Adds latency to every request.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(Some(latency));
        self
    }

    /// Replies to writes without a body.
    pub fn with_empty_bodies(self) -> Self {
        self.set_empty_bodies(true);
        self
    }

    /// Transforms entities before they are stored, e.g. to add a revision.
    pub fn with_enrichment<F>(self, enrich: F) -> Self
    where
        F: Fn(&str, Entity) -> Entity + Send + Sync + 'static,
    {
        self.shared.behaviour.write().enrich = Some(Arc::new(enrich));
        self
    }

    /// Sets or clears the latency.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.shared.behaviour.write().latency = latency;
    }

    /// Sets whether writes reply without a body.
    pub fn set_empty_bodies(&self, empty_bodies: bool) {
        self.shared.behaviour.write().empty_bodies = empty_bodies;
    }

    /// Stores entities directly, bypassing requests.
    pub fn seed(&self, entity_name: &str, entities: Vec<Entity>) {
        let select_id = self.select_id(entity_name);
        let mut state = self.shared.state.lock();
        let table = state.tables.entry(entity_name.to_string()).or_default();
        for entity in entities {
            if let Some(key) = select_id(&entity) {
                table.insert(key, entity);
            }
        }
    }

    /// Entities stored for a type, in key order.
    pub fn stored(&self, entity_name: &str) -> Vec<Entity> {
        self.shared
            .state
            .lock()
            .tables
            .get(entity_name)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Fails the next request with `error`. Failures queue up.
    pub fn fail_next(&self, error: DataServiceError) {
        self.shared.state.lock().failures.push_back(error);
    }

    /// Holds new and waiting requests until [`InMemoryDataService::open_gate`].
    pub fn close_gate(&self) {
        self.shared.gate.send_replace(false);
    }

    /// Releases held requests.
    pub fn open_gate(&self) {
        self.shared.gate.send_replace(true);
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        *self.shared.calls.borrow()
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RequestInfo> {
        self.shared.state.lock().requests.clone()
    }

    /// Waits until at least `count` requests have been received.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut calls = self.shared.calls.subscribe();
        let _ = calls.wait_for(|n| *n >= count).await;
    }

    fn select_id(&self, entity_name: &str) -> IdSelector {
        self.shared
            .behaviour
            .read()
            .select_ids
            .get(entity_name)
            .cloned()
            .unwrap_or_else(default_select_id)
    }

    fn empty_bodies(&self) -> bool {
        self.shared.behaviour.read().empty_bodies
    }

    fn enrich(&self, entity_name: &str, entity: Entity) -> Entity {
        let enrich = self.shared.behaviour.read().enrich.clone();
        match enrich {
            Some(enrich) => enrich(entity_name, entity),
            None => entity,
        }
    }

    async fn begin(&self, request: RequestInfo) -> DataServiceResult<()> {
        self.shared.state.lock().requests.push(request.clone());
        self.shared.calls.send_modify(|n| *n += 1);

        let mut gate = self.shared.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let latency = self.shared.behaviour.read().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match self.shared.state.lock().failures.pop_front() {
            Some(error) => Err(error.with_request(request)),
            None => Ok(()),
        }
    }

    fn resource(&self, key: Option<&EntityKey>) -> String {
        match key {
            Some(key) => format!("{}/{}", self.entity_name, key),
            None => self.entity_name.clone(),
        }
    }

    fn insert(&self, entity_name: &str, entity: Entity) -> DataServiceResult<Entity> {
        let select_id = self.select_id(entity_name);
        let mut state = self.shared.state.lock();
        let entity = match select_id(&entity) {
            Some(_) => entity,
            None => {
                let id = state.next_id;
                state.next_id += 1;
                match entity {
                    Value::Object(mut fields) => {
                        fields.insert("id".into(), Value::from(id));
                        Value::Object(fields)
                    }
                    other => {
                        return Err(DataServiceError::new(format!(
                            "cannot add {entity_name}: expected an object, got {other}"
                        )))
                    }
                }
            }
        };
        drop(state);
        let entity = self.enrich(entity_name, entity);
        let key = select_id(&entity).ok_or_else(|| {
            DataServiceError::new(format!("cannot add {entity_name}: entity has no key"))
        })?;
        let mut state = self.shared.state.lock();
        let table = state.tables.entry(entity_name.to_string()).or_default();
        if table.contains_key(&key) {
            return Err(DataServiceError::new(format!("{entity_name} {key} already exists")));
        }
        table.insert(key, entity.clone());
        Ok(entity)
    }

    fn remove(&self, entity_name: &str, key: &EntityKey) {
        if let Some(table) = self.shared.state.lock().tables.get_mut(entity_name) {
            table.remove(key);
        }
    }

    fn apply_update(&self, entity_name: &str, update: &Update) -> DataServiceResult<Entity> {
        let select_id = self.select_id(entity_name);
        let current = self
            .shared
            .state
            .lock()
            .tables
            .get(entity_name)
            .and_then(|table| table.get(&update.id).cloned())
            .ok_or_else(|| DataServiceError::new(format!("{entity_name} {} not found", update.id)))?;
        let merged = self.enrich(entity_name, merge_changes(&current, &update.changes));
        let key = select_id(&merged).unwrap_or_else(|| update.id.clone());
        let mut state = self.shared.state.lock();
        let table = state.tables.entry(entity_name.to_string()).or_default();
        table.remove(&update.id);
        table.insert(key, merged.clone());
        Ok(merged)
    }

    fn store(&self, entity_name: &str, entity: Entity) -> DataServiceResult<Entity> {
        let select_id = self.select_id(entity_name);
        let entity = self.enrich(entity_name, entity);
        let key = select_id(&entity).ok_or_else(|| {
            DataServiceError::new(format!("cannot upsert {entity_name}: entity has no key"))
        })?;
        self.shared
            .state
            .lock()
            .tables
            .entry(entity_name.to_string())
            .or_default()
            .insert(key, entity.clone());
        Ok(entity)
    }

    fn body(&self, entity: Entity) -> Option<Entity> {
        if self.empty_bodies() || is_empty_body(&entity) {
            None
        } else {
            Some(entity)
        }
    }

    fn apply_item(&self, item: WireChangeSetItem) -> DataServiceResult<WireChangeSetItem> {
        let name = item.entity_name.as_str();
        let mut entities = Vec::with_capacity(item.entities.len());
        for value in &item.entities {
            let stored = match item.op {
                ChangeSetOperation::Add => self.insert(name, value.clone())?,
                ChangeSetOperation::Upsert => self.store(name, value.clone())?,
                ChangeSetOperation::Delete => {
                    let key = EntityKey::from_value(value).ok_or_else(|| {
                        DataServiceError::new(format!("invalid {name} key {value}"))
                    })?;
                    self.remove(name, &key);
                    value.clone()
                }
                ChangeSetOperation::Update => {
                    let key = self.select_id(name)(value).ok_or_else(|| {
                        DataServiceError::new(format!("{name} update without a key"))
                    })?;
                    self.apply_update(name, &Update::new(key, value.clone()))?
                }
            };
            entities.push(stored);
        }
        Ok(WireChangeSetItem { entities, ..item })
    }
}

impl Default for InMemoryDataService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryDataService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDataService")
            .field("entity_name", &self.entity_name)
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

fn matches_query(entity: &Entity, params: &QueryParams) -> bool {
    params.iter().all(|(field, wanted)| {
        let actual = match entity.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return false,
        };
        actual.to_lowercase().contains(&wanted.to_lowercase())
    })
}

#[async_trait]
impl EntityDataService for InMemoryDataService {
    async fn get_all(&self) -> DataServiceResult<Vec<Entity>> {
        self.begin(RequestInfo::new("GET", self.resource(None))).await?;
        Ok(self.stored(&self.entity_name))
    }

    async fn get_by_id(&self, key: EntityKey) -> DataServiceResult<Option<Entity>> {
        self.begin(RequestInfo::new("GET", self.resource(Some(&key)))).await?;
        Ok(self
            .shared
            .state
            .lock()
            .tables
            .get(&self.entity_name)
            .and_then(|table| table.get(&key).cloned()))
    }

    async fn get_with_query(&self, params: QueryParams) -> DataServiceResult<Vec<Entity>> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        self.begin(RequestInfo::new("GET", format!("{}?{}", self.resource(None), query)))
            .await?;
        Ok(self
            .stored(&self.entity_name)
            .into_iter()
            .filter(|entity| matches_query(entity, &params))
            .collect())
    }

    async fn add(&self, entity: Entity) -> DataServiceResult<Option<Entity>> {
        self.begin(RequestInfo::new("POST", self.resource(None)).with_data(entity.clone()))
            .await?;
        let stored = self.insert(&self.entity_name, entity)?;
        Ok(self.body(stored))
    }

    async fn delete(&self, key: EntityKey) -> DataServiceResult<()> {
        self.begin(RequestInfo::new("DELETE", self.resource(Some(&key)))).await?;
        self.remove(&self.entity_name, &key);
        Ok(())
    }

    async fn update(&self, update: Update) -> DataServiceResult<Option<Entity>> {
        self.begin(
            RequestInfo::new("PUT", self.resource(Some(&update.id))).with_data(update.changes.clone()),
        )
        .await?;
        let stored = self.apply_update(&self.entity_name, &update)?;
        Ok(self.body(stored))
    }

    async fn upsert(&self, entity: Entity) -> DataServiceResult<Option<Entity>> {
        self.begin(RequestInfo::new("POST", self.resource(None)).with_data(entity.clone()))
            .await?;
        let stored = self.store(&self.entity_name, entity)?;
        Ok(self.body(stored))
    }
}

#[async_trait]
impl EntityCacheDataService for InMemoryDataService {
    async fn save_entities(
        &self,
        change_set: WireChangeSet,
        url: &str,
    ) -> DataServiceResult<Option<WireChangeSet>> {
        let body = serde_json::to_value(&change_set)
            .map_err(|e| DataServiceError::from_raw("cannot encode change set", &e))?;
        self.begin(RequestInfo::new("POST", url).with_data(body)).await?;

        let WireChangeSet {
            changes,
            tag,
            extras,
        } = change_set;
        let mut saved = Vec::with_capacity(changes.len());
        for item in changes {
            saved.push(self.apply_item(item)?);
        }
        if self.empty_bodies() {
            return Ok(None);
        }
        Ok(Some(WireChangeSet {
            changes: saved,
            tag,
            extras,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn crud_round() {
        let server = InMemoryDataService::new();
        let heroes = server.for_entity("Hero");

        let added = heroes.add(json!({"name": "Ann"})).await.unwrap().unwrap();
        assert_eq!(added["id"], 1000);

        heroes
            .update(Update::new(1000, json!({"name": "Bea"})))
            .await
            .unwrap();
        let fetched = heroes.get_by_id(EntityKey::Num(1000)).await.unwrap().unwrap();
        assert_eq!(fetched["name"], "Bea");

        heroes.delete(EntityKey::Num(1000)).await.unwrap();
        assert!(heroes.get_all().await.unwrap().is_empty());
        assert_eq!(server.call_count(), 5);
    }

    #[tokio::test]
    async fn query_matches_case_insensitively() {
        let server = InMemoryDataService::new();
        server.seed(
            "Hero",
            vec![json!({"id": 1, "name": "Windstorm"}), json!({"id": 2, "name": "Bombasto"})],
        );
        let params = QueryParams::from([("name".to_string(), "wind".to_string())]);
        let found = server.for_entity("Hero").get_with_query(params).await.unwrap();
        assert_eq!(found, vec![json!({"id": 1, "name": "Windstorm"})]);
    }

    #[tokio::test]
    async fn injected_failure_leaves_tables_untouched() {
        let server = InMemoryDataService::new();
        server.fail_next(DataServiceError::retryable("overloaded"));
        let heroes = server.for_entity("Hero");

        let err = heroes.add(json!({"id": 1})).await.unwrap_err();
        assert!(err.retryable);
        assert_eq!(err.request_info.unwrap().method, "POST");
        assert!(server.stored("Hero").is_empty());
    }

    #[tokio::test]
    async fn enrichment_and_empty_bodies() {
        let server = InMemoryDataService::new().with_enrichment(|_, mut entity| {
            entity["rev"] = json!(1);
            entity
        });
        let heroes = server.for_entity("Hero");
        let added = heroes.add(json!({"id": 1})).await.unwrap().unwrap();
        assert_eq!(added["rev"], 1);

        server.set_empty_bodies(true);
        assert_eq!(heroes.upsert(json!({"id": 2})).await.unwrap(), None);
        assert_eq!(server.stored("Hero")[1]["rev"], 1);
    }

    #[tokio::test]
    async fn gate_holds_requests() {
        let server = InMemoryDataService::new();
        server.close_gate();
        let heroes = server.for_entity("Hero");
        let pending = tokio::spawn(async move { heroes.upsert(json!({"id": 1})).await });

        server.wait_for_calls(1).await;
        assert!(server.stored("Hero").is_empty());

        server.open_gate();
        pending.await.unwrap().unwrap();
        assert_eq!(server.stored("Hero").len(), 1);
    }

    #[tokio::test]
    async fn save_entities_applies_items_in_order() {
        let server = InMemoryDataService::new();
        server.seed("Villain", vec![json!({"id": 9, "name": "Vex"})]);
        let wire = WireChangeSet {
            changes: vec![
                WireChangeSetItem {
                    entity_name: "Hero".into(),
                    op: ChangeSetOperation::Add,
                    entities: vec![json!({"id": 1, "name": "Ann"})],
                },
                WireChangeSetItem {
                    entity_name: "Villain".into(),
                    op: ChangeSetOperation::Delete,
                    entities: vec![json!(9)],
                },
            ],
            tag: None,
            extras: None,
        };

        let reply = server.save_entities(wire, "api/save").await.unwrap().unwrap();
        assert_eq!(reply.changes.len(), 2);
        assert_eq!(server.stored("Hero").len(), 1);
        assert!(server.stored("Villain").is_empty());
        assert_eq!(server.requests()[0].url, "api/save");
    }
}
