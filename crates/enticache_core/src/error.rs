//! Error types for the reducers.

use enticache_model::ActionError;
use thiserror::Error;

/// Result type for reducer operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while applying an action to the cache.
///
/// Reducers never return these to the dispatcher: they are recorded on the
/// offending action as an `ActionError` and the state is left unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// The action payload failed validation.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// A tracking operation got an entity without a key.
    #[error("{entity_name} entity {operation} requires a key to be tracked")]
    KeyRequired {
        /// Entity type.
        entity_name: String,
        /// Tracking operation (`add`, `update`, `upsert`).
        operation: &'static str,
    },

    /// No definition is registered for the entity type.
    #[error("no entity definition for entity type {entity_name:?}")]
    UnknownEntityType {
        /// Entity type.
        entity_name: String,
    },
}

impl CoreError {
    /// Creates a key required error.
    pub fn key_required(entity_name: impl Into<String>, operation: &'static str) -> Self {
        Self::KeyRequired {
            entity_name: entity_name.into(),
            operation,
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_entity_type(entity_name: impl Into<String>) -> Self {
        Self::UnknownEntityType {
            entity_name: entity_name.into(),
        }
    }
}

impl From<CoreError> for ActionError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Action(inner) => inner,
            other => ActionError::invalid_action(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_become_invalid_actions() {
        let err: ActionError = CoreError::key_required("Hero", "add").into();
        assert_eq!(
            err,
            ActionError::invalid_action("Hero entity add requires a key to be tracked")
        );

        let err: ActionError = CoreError::unknown_entity_type("Sidekick").into();
        assert!(err.is_invalid_action());
        assert!(err.to_string().contains("Sidekick"));
    }

    #[test]
    fn action_errors_pass_through() {
        let inner = ActionError::invalid_action("bad payload");
        let err: ActionError = CoreError::from(inner.clone()).into();
        assert_eq!(err, inner);
    }
}
