//! Payload shape validation for entity actions.

use crate::action::{ActionData, EntityAction};
use crate::entity::{Entity, EntityKey, IdSelector, Update, UpdateResponseData};
use crate::error::{ActionError, ActionResult};

/// Validates and extracts action payloads for one entity type.
///
/// Every check fails fast with `InvalidAction`. When the payload is a list,
/// the message names the offending item by its 1-based position.
pub struct EntityActionGuard {
    entity_name: String,
    select_id: IdSelector,
}

impl EntityActionGuard {
    /// Creates a guard.
    pub fn new(entity_name: impl Into<String>, select_id: IdSelector) -> Self {
        Self {
            entity_name: entity_name.into(),
            select_id,
        }
    }

    /// Requires a single entity with a valid key.
    pub fn must_be_entity(&self, action: &EntityAction) -> ActionResult<Entity> {
        match action.data() {
            Some(ActionData::Entity(entity)) => {
                if (self.select_id)(entity).is_none() {
                    return Err(self.error(action, "is missing a key"));
                }
                Ok(entity.clone())
            }
            _ => Err(self.error(action, "should have a single entity")),
        }
    }

    /// Requires a list of entities, each with a valid key.
    pub fn must_be_entities(&self, action: &EntityAction) -> ActionResult<Vec<Entity>> {
        match action.data() {
            Some(ActionData::Entities(entities)) => {
                for (i, entity) in entities.iter().enumerate() {
                    if (self.select_id)(entity).is_none() {
                        return Err(self.error(action, &format!("item {} is missing a key", i + 1)));
                    }
                }
                Ok(entities.clone())
            }
            _ => Err(self.error(action, "should be an array of entities")),
        }
    }

    /// Requires a single key, or an entity to take the key from.
    pub fn must_be_key(&self, action: &EntityAction) -> ActionResult<EntityKey> {
        match action.data() {
            Some(ActionData::Key(key)) if key.is_valid() => Ok(key.clone()),
            Some(ActionData::Entity(entity)) => (self.select_id)(entity)
                .ok_or_else(|| self.error(action, "is missing a key")),
            _ => Err(self.error(action, "should be a single key")),
        }
    }

    /// Requires a list of keys, or entities to take the keys from.
    pub fn must_be_keys(&self, action: &EntityAction) -> ActionResult<Vec<EntityKey>> {
        match action.data() {
            Some(ActionData::Keys(keys)) => {
                for (i, key) in keys.iter().enumerate() {
                    if !key.is_valid() {
                        return Err(self.error(action, &format!("item {} is not a valid key", i + 1)));
                    }
                }
                Ok(keys.clone())
            }
            Some(ActionData::Entities(entities)) => entities
                .iter()
                .enumerate()
                .map(|(i, entity)| {
                    (self.select_id)(entity).ok_or_else(|| {
                        self.error(action, &format!("item {} is missing a key", i + 1))
                    })
                })
                .collect(),
            _ => Err(self.error(action, "should be an array of keys")),
        }
    }

    /// Requires a single update with a valid key.
    pub fn must_be_update(&self, action: &EntityAction) -> ActionResult<Update> {
        match action.data() {
            Some(ActionData::Update(update)) if update.id.is_valid() => Ok(update.clone()),
            Some(ActionData::Update(_)) => Err(self.error(action, "is missing a key")),
            _ => Err(self.error(action, "should be a single update")),
        }
    }

    /// Requires a list of updates, each with a valid key.
    pub fn must_be_updates(&self, action: &EntityAction) -> ActionResult<Vec<Update>> {
        match action.data() {
            Some(ActionData::Updates(updates)) => {
                for (i, update) in updates.iter().enumerate() {
                    if !update.id.is_valid() {
                        return Err(self.error(action, &format!("item {} is missing a key", i + 1)));
                    }
                }
                Ok(updates.clone())
            }
            _ => Err(self.error(action, "should be an array of updates")),
        }
    }

    /// Requires a single server-confirmed update.
    pub fn must_be_update_response(
        &self,
        action: &EntityAction,
    ) -> ActionResult<UpdateResponseData> {
        match action.data() {
            Some(ActionData::UpdateResponse(response)) if response.id.is_valid() => {
                Ok(response.clone())
            }
            Some(ActionData::UpdateResponse(_)) => Err(self.error(action, "is missing a key")),
            _ => Err(self.error(action, "should be a single update response")),
        }
    }

    /// Requires a list of server-confirmed updates.
    pub fn must_be_update_responses(
        &self,
        action: &EntityAction,
    ) -> ActionResult<Vec<UpdateResponseData>> {
        match action.data() {
            Some(ActionData::UpdateResponses(responses)) => {
                for (i, response) in responses.iter().enumerate() {
                    if !response.id.is_valid() {
                        return Err(self.error(action, &format!("item {} is missing a key", i + 1)));
                    }
                }
                Ok(responses.clone())
            }
            _ => Err(self.error(action, "should be an array of update responses")),
        }
    }

    fn error(&self, action: &EntityAction, problem: &str) -> ActionError {
        ActionError::invalid_action(format!(
            "{} payload of {} {}",
            action.type_name, self.entity_name, problem
        ))
    }
}

impl std::fmt::Debug for EntityActionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityActionGuard")
            .field("entity_name", &self.entity_name)
            .finish_non_exhaustive()
    }
}
