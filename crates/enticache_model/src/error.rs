//! Error types carried by actions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use thiserror::Error;

/// Result type for model operations.
pub type ActionResult<T> = Result<T, ActionError>;

/// Errors that can be attached to an action.
///
/// Unlike the per-crate error enums further up the stack, these values are
/// `Clone` and comparable so they can ride along on `payload.error`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// The action or its payload is malformed.
    #[error("invalid action: {message}")]
    InvalidAction {
        /// Description of what is wrong.
        message: String,
    },

    /// The remote store rejected or failed the request.
    #[error("data service error: {0}")]
    DataService(DataServiceError),
}

impl ActionError {
    /// Creates an invalid action error.
    pub fn invalid_action(message: impl Into<String>) -> Self {
        Self::InvalidAction {
            message: message.into(),
        }
    }

    /// Returns true if this error rejects the action before any I/O.
    pub fn is_invalid_action(&self) -> bool {
        matches!(self, ActionError::InvalidAction { .. })
    }

    /// Converts this error into the uniform transport envelope.
    pub fn into_data_service_error(self) -> DataServiceError {
        match self {
            ActionError::DataService(error) => error,
            other => DataServiceError::from_raw(other.to_string(), &other),
        }
    }
}

impl From<DataServiceError> for ActionError {
    fn from(error: DataServiceError) -> Self {
        Self::DataService(error)
    }
}

/// Describes the request that produced a `DataServiceError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Request method (e.g. `GET`, `PUT`, or a transport specific verb).
    pub method: String,
    /// Resource the request addressed.
    pub url: String,
    /// Request body, if any.
    pub data: Option<Value>,
}

impl RequestInfo {
    /// Creates request info without a body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            data: None,
        }
    }

    /// Attaches the request body.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Uniform error envelope for transport failures.
///
/// Whatever the transport raises is wrapped into this shape so the rest of
/// the cache deals with exactly one error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct DataServiceError {
    /// Human readable message.
    pub message: String,
    /// Rendering of the original transport error.
    pub raw_error: Option<String>,
    /// The request that failed.
    pub request_info: Option<RequestInfo>,
    /// Whether repeating the request may succeed.
    pub retryable: bool,
}

impl DataServiceError {
    /// Creates a non-retryable error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_error: None,
            request_info: None,
            retryable: false,
        }
    }

    /// Wraps a raw transport error.
    pub fn from_raw(message: impl Into<String>, raw: &dyn Display) -> Self {
        Self {
            message: message.into(),
            raw_error: Some(raw.to_string()),
            request_info: None,
            retryable: false,
        }
    }

    /// Creates a retryable error (network hiccup, overloaded server).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(message)
        }
    }

    /// Creates the error reported when a request exceeds its timeout.
    pub fn timeout(after_ms: u128) -> Self {
        Self::retryable(format!("request timed out after {after_ms}ms"))
    }

    /// Attaches the failed request.
    pub fn with_request(mut self, request_info: RequestInfo) -> Self {
        self.request_info = Some(request_info);
        self
    }
}
