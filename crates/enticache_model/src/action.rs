//! Entity actions and their factory.

use crate::change::{ChangeStateMap, MergeStrategy};
use crate::collection::EntityCollection;
use crate::entity::{Entity, EntityKey, Update, UpdateResponseData};
use crate::error::{ActionError, ActionResult, DataServiceError};
use crate::op::EntityOp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Query parameters for `QUERY_MANY`.
pub type QueryParams = BTreeMap<String, String>;

/// Join key between a request action and its terminal follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Creates a correlation id from a caller-supplied value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug)]
enum IdMode {
    Sequential { prefix: String, counter: AtomicU64 },
    Random,
}

/// Allocates correlation ids.
///
/// The sequential mode hands out `CRID1`, `CRID2`, ... from an atomic
/// counter, so one generator may be shared across tasks. The random mode
/// uses v4 UUIDs for hosts where several processes allocate ids.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    mode: IdMode,
}

impl CorrelationIdGenerator {
    /// Creates a sequential generator with the `CRID` prefix.
    pub fn sequential() -> Self {
        Self::with_prefix("CRID")
    }

    /// Creates a sequential generator with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            mode: IdMode::Sequential {
                prefix: prefix.into(),
                counter: AtomicU64::new(0),
            },
        }
    }

    /// Creates a UUID based generator.
    pub fn random() -> Self {
        Self {
            mode: IdMode::Random,
        }
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> CorrelationId {
        match &self.mode {
            IdMode::Sequential { prefix, counter } => {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                CorrelationId(format!("{prefix}{n}"))
            }
            IdMode::Random => CorrelationId(uuid::Uuid::new_v4().to_string()),
        }
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::sequential()
    }
}

/// Payload data of an entity action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionData {
    /// A single entity.
    Entity(Entity),
    /// Several entities.
    Entities(Vec<Entity>),
    /// A single key.
    Key(EntityKey),
    /// Several keys.
    Keys(Vec<EntityKey>),
    /// A single update.
    Update(Update),
    /// Several updates.
    Updates(Vec<Update>),
    /// A server-confirmed update.
    UpdateResponse(UpdateResponseData),
    /// Several server-confirmed updates.
    UpdateResponses(Vec<UpdateResponseData>),
    /// Query parameters.
    Query(QueryParams),
    /// Opaque filter value.
    Filter(Value),
    /// Boolean flag for `SET_LOADED` / `SET_LOADING`.
    Flag(bool),
    /// Replacement change state.
    ChangeState(ChangeStateMap),
    /// Replacement collection.
    Collection(Box<EntityCollection>),
    /// Failure details of an `_ERROR` follow-up.
    Error(Box<EntityActionDataServiceError>),
    /// Reason of a `CANCELED_PERSIST` follow-up.
    Canceled {
        /// Human readable reason.
        reason: Option<String>,
    },
}

/// Data of an `_ERROR` follow-up: the error and the request that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityActionDataServiceError {
    /// The wrapped transport error.
    pub error: DataServiceError,
    /// The request action.
    pub original_action: EntityAction,
}

/// Payload of an entity action.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityActionPayload {
    /// Entity type the action targets.
    pub entity_name: String,
    /// Requested or reported operation.
    pub entity_op: EntityOp,
    /// Operation data.
    pub data: Option<ActionData>,
    /// Join key with follow-ups.
    pub correlation_id: Option<CorrelationId>,
    /// Apply the change to the cache before the server confirms it.
    pub is_optimistic: Option<bool>,
    /// Merge policy for server data.
    pub merge_strategy: Option<MergeStrategy>,
    /// Tag shown in the action type instead of the entity name.
    pub tag: Option<String>,
    /// Error recorded while reducing the action.
    pub error: Option<ActionError>,
    /// Tells the persistence orchestrator not to call the server.
    pub skip: bool,
}

/// A tagged message describing an intended or completed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityAction {
    /// Canonical type string, `[tag] op`.
    pub type_name: String,
    /// Payload.
    pub payload: EntityActionPayload,
}

impl EntityAction {
    /// Entity type name.
    pub fn entity_name(&self) -> &str {
        &self.payload.entity_name
    }

    /// Operation.
    pub fn op(&self) -> EntityOp {
        self.payload.entity_op
    }

    /// Correlation id, if assigned.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.payload.correlation_id.as_ref()
    }

    /// Returns true only if the action was explicitly marked optimistic.
    pub fn is_optimistic(&self) -> bool {
        self.payload.is_optimistic == Some(true)
    }

    /// Payload data.
    pub fn data(&self) -> Option<&ActionData> {
        self.payload.data.as_ref()
    }

    /// Error recorded on the action.
    pub fn error(&self) -> Option<&ActionError> {
        self.payload.error.as_ref()
    }
}

/// Optional settings for a new action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityActionOptions {
    /// Caller-supplied correlation id.
    pub correlation_id: Option<CorrelationId>,
    /// Optimistic flag.
    pub is_optimistic: Option<bool>,
    /// Merge strategy.
    pub merge_strategy: Option<MergeStrategy>,
    /// Tag.
    pub tag: Option<String>,
}

impl EntityActionOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the optimistic flag.
    pub fn optimistic(mut self, is_optimistic: bool) -> Self {
        self.is_optimistic = Some(is_optimistic);
        self
    }

    /// Sets the merge strategy.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    /// Sets the tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Creates entity actions and their follow-ups.
///
/// The factory is the only place that allocates correlation ids: every
/// action created without one gets the next id from the shared generator.
#[derive(Debug, Clone, Default)]
pub struct EntityActionFactory {
    ids: Arc<CorrelationIdGenerator>,
}

impl EntityActionFactory {
    /// Creates a factory with a sequential id generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory over the given id generator.
    pub fn with_generator(ids: CorrelationIdGenerator) -> Self {
        Self { ids: Arc::new(ids) }
    }

    /// Allocates a correlation id.
    pub fn next_correlation_id(&self) -> CorrelationId {
        self.ids.next_id()
    }

    /// Creates an action.
    ///
    /// Fails with `InvalidAction` when the entity name is empty.
    pub fn create(
        &self,
        entity_name: impl Into<String>,
        entity_op: EntityOp,
        data: Option<ActionData>,
        options: EntityActionOptions,
    ) -> ActionResult<EntityAction> {
        let entity_name = entity_name.into();
        if entity_name.trim().is_empty() {
            return Err(ActionError::invalid_action("missing entity name for new action"));
        }
        let correlation_id = options
            .correlation_id
            .unwrap_or_else(|| self.ids.next_id());
        let type_name = Self::format_action_type(entity_op, options.tag.as_deref(), &entity_name);
        Ok(EntityAction {
            type_name,
            payload: EntityActionPayload {
                entity_name,
                entity_op,
                data,
                correlation_id: Some(correlation_id),
                is_optimistic: options.is_optimistic,
                merge_strategy: options.merge_strategy,
                tag: options.tag,
                error: None,
                skip: false,
            },
        })
    }

    /// Derives a follow-up from `base` with a new op and data.
    ///
    /// Correlation id, optimism, merge strategy and tag are inherited;
    /// `error` and `skip` are not.
    pub fn create_from_action(
        &self,
        base: &EntityAction,
        entity_op: EntityOp,
        data: Option<ActionData>,
    ) -> EntityAction {
        let payload = EntityActionPayload {
            entity_op,
            data,
            error: None,
            skip: false,
            ..base.payload.clone()
        };
        EntityAction {
            type_name: Self::format_action_type(
                entity_op,
                payload.tag.as_deref(),
                &payload.entity_name,
            ),
            payload,
        }
    }

    /// Formats `[tag] op`, using the entity name when there is no tag.
    pub fn format_action_type(entity_op: EntityOp, tag: Option<&str>, entity_name: &str) -> String {
        format!("[{}] {}", tag.unwrap_or(entity_name), entity_op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequential_ids_increase() {
        let ids = CorrelationIdGenerator::sequential();
        assert_eq!(ids.next_id().as_str(), "CRID1");
        assert_eq!(ids.next_id().as_str(), "CRID2");

        let custom = CorrelationIdGenerator::with_prefix("heroes-");
        assert_eq!(custom.next_id().as_str(), "heroes-1");
    }

    #[test]
    fn random_ids_differ() {
        let ids = CorrelationIdGenerator::random();
        assert_ne!(ids.next_id(), ids.next_id());
    }

    #[test]
    fn create_assigns_type_and_correlation_id() {
        let factory = EntityActionFactory::new();
        let action = factory
            .create(
                "Hero",
                EntityOp::SaveAddOne,
                Some(ActionData::Entity(json!({"id": 1}))),
                EntityActionOptions::new().optimistic(true),
            )
            .unwrap();

        assert_eq!(action.type_name, "[Hero] enticache/save/add-one");
        assert_eq!(action.correlation_id().map(|c| c.as_str()), Some("CRID1"));
        assert!(action.is_optimistic());
        assert!(!action.payload.skip);
    }

    #[test]
    fn create_keeps_caller_correlation_id_and_tag() {
        let factory = EntityActionFactory::new();
        let action = factory
            .create(
                "Hero",
                EntityOp::QueryAll,
                None,
                EntityActionOptions::new()
                    .with_correlation_id("mine")
                    .with_tag("Load heroes"),
            )
            .unwrap();
        assert_eq!(action.type_name, "[Load heroes] enticache/query-all");
        assert_eq!(action.correlation_id(), Some(&CorrelationId::from("mine")));
    }

    #[test]
    fn create_rejects_empty_entity_name() {
        let factory = EntityActionFactory::new();
        let err = factory
            .create(" ", EntityOp::QueryAll, None, EntityActionOptions::new())
            .unwrap_err();
        assert!(err.is_invalid_action());
    }

    #[test]
    fn follow_up_inherits_but_drops_error_and_skip() {
        let factory = EntityActionFactory::new();
        let mut request = factory
            .create(
                "Hero",
                EntityOp::SaveDeleteOne,
                Some(ActionData::Key(EntityKey::Num(1))),
                EntityActionOptions::new().with_merge_strategy(MergeStrategy::PreserveChanges),
            )
            .unwrap();
        request.payload.skip = true;
        request.payload.error = Some(ActionError::invalid_action("boom"));

        let success = factory.create_from_action(&request, EntityOp::SaveDeleteOneSuccess, None);
        assert_eq!(success.correlation_id(), request.correlation_id());
        assert_eq!(
            success.payload.merge_strategy,
            Some(MergeStrategy::PreserveChanges)
        );
        assert_eq!(success.type_name, "[Hero] enticache/save/delete-one/success");
        assert!(!success.payload.skip);
        assert!(success.error().is_none());
    }
}
