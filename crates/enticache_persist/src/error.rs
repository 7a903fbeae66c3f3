//! Error types for persistence and the store.

use enticache_core::CoreError;
use enticache_model::{ActionError, CorrelationId, DataServiceError};
use thiserror::Error;

/// Result type for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors surfaced to callers awaiting persistence outcomes.
#[derive(Error, Debug, Clone)]
pub enum PersistError {
    /// The data service failed the request.
    #[error("data service error: {0}")]
    DataService(DataServiceError),

    /// The request was canceled before it completed.
    #[error("persistence canceled for {correlation_id}")]
    Canceled {
        /// Correlation id of the canceled request.
        correlation_id: CorrelationId,
        /// Reason given with the cancel request.
        reason: Option<String>,
    },

    /// The action was rejected before any I/O.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// State layer error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No data service is registered for the entity type.
    #[error("no data service registered for entity type {entity_name:?}")]
    NoDataService {
        /// Entity type name.
        entity_name: String,
    },

    /// No batch data service is registered.
    #[error("no entity cache data service registered")]
    NoCacheDataService,

    /// The store was built outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The reduced-action stream closed before the outcome arrived.
    #[error("reduced action channel closed")]
    ChannelClosed,

    /// The waiter fell behind the reduced-action stream and may have missed
    /// its outcome.
    #[error("reduced action channel lagged by {missed} actions")]
    ChannelLagged {
        /// Number of actions dropped.
        missed: u64,
    },
}

impl PersistError {
    /// Creates a canceled error.
    pub fn canceled(correlation_id: CorrelationId, reason: Option<String>) -> Self {
        Self::Canceled {
            correlation_id,
            reason,
        }
    }

    /// Creates a missing data service error.
    pub fn no_data_service(entity_name: impl Into<String>) -> Self {
        Self::NoDataService {
            entity_name: entity_name.into(),
        }
    }

    /// Returns true if the request ended by cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, PersistError::Canceled { .. })
    }

    /// Returns true if repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PersistError::DataService(error) => error.retryable,
            _ => false,
        }
    }

    /// Converts this error into the uniform transport envelope.
    pub fn into_data_service_error(self) -> DataServiceError {
        match self {
            PersistError::DataService(error) => error,
            PersistError::Action(error) => error.into_data_service_error(),
            other => DataServiceError::from_raw(other.to_string(), &other),
        }
    }
}

impl From<DataServiceError> for PersistError {
    fn from(error: DataServiceError) -> Self {
        Self::DataService(error)
    }
}
