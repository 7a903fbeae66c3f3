//! Maps transport outcomes to follow-up actions.

use enticache_model::{
    ActionData, DataServiceError, EntityAction, EntityActionDataServiceError, EntityActionFactory,
};
use tracing::error;

/// Builds the success and error follow-ups of a persistence request.
pub trait PersistenceResultHandler: Send + Sync {
    /// Builds the `_SUCCESS` follow-up carrying `data`.
    fn handle_success(&self, request: &EntityAction, data: Option<ActionData>) -> EntityAction;

    /// Builds the `_ERROR` follow-up carrying the error and the request.
    fn handle_error(&self, request: &EntityAction, error: DataServiceError) -> EntityAction;
}

/// Logs errors and wraps them with the failed request.
#[derive(Debug, Clone, Default)]
pub struct DefaultPersistenceResultHandler {
    factory: EntityActionFactory,
}

impl DefaultPersistenceResultHandler {
    /// Creates a handler deriving follow-ups with `factory`.
    pub fn new(factory: EntityActionFactory) -> Self {
        Self { factory }
    }
}

impl PersistenceResultHandler for DefaultPersistenceResultHandler {
    fn handle_success(&self, request: &EntityAction, data: Option<ActionData>) -> EntityAction {
        let op = request.op().success_op().unwrap_or(request.op());
        self.factory.create_from_action(request, op, data)
    }

    fn handle_error(&self, request: &EntityAction, error: DataServiceError) -> EntityAction {
        error!(
            entity_name = %request.entity_name(),
            op = %request.op(),
            correlation_id = ?request.correlation_id(),
            retryable = error.retryable,
            %error,
            "persistence request failed"
        );
        let op = request.op().error_op().unwrap_or(request.op());
        let data = ActionData::Error(Box::new(EntityActionDataServiceError {
            error,
            original_action: request.clone(),
        }));
        self.factory.create_from_action(request, op, Some(data))
    }
}
