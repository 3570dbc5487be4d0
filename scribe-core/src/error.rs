//! Errors surfaced to the user through the controller's error channel.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// A failure that ends up in `ControllerState::error`.
///
/// Every variant carries the offending payload so the presentation layer
/// can show (or offer to discard) what could not be loaded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("invalid persisted state")]
    InvalidState(Value),
    #[error("invalid config")]
    InvalidConfig(Value),
    #[error("invalid file")]
    InvalidFile(Value),
    #[error("permission denied reading file")]
    FilePermissionDenied(Value),
    #[error("unexpected error: {0}")]
    Exception(String),
}

impl ServiceError {
    pub fn id(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidFile(_) => "invalid_file",
            Self::FilePermissionDenied(_) => "file_permission_denied",
            Self::Exception(_) => "exception",
        }
    }

    pub fn props(&self) -> Value {
        match self {
            Self::InvalidState(v)
            | Self::InvalidConfig(v)
            | Self::InvalidFile(v)
            | Self::FilePermissionDenied(v) => v.clone(),
            Self::Exception(message) => json!({ "error": message }),
        }
    }

    /// Wrap any displayable failure as an `exception`.
    pub fn exception(err: impl std::fmt::Display) -> Self {
        Self::Exception(err.to_string())
    }

    pub fn permission_denied(path: &str, err: impl std::fmt::Display) -> Self {
        Self::FilePermissionDenied(json!({ "path": path, "error": err.to_string() }))
    }

    pub fn to_object(&self) -> ErrorObject {
        ErrorObject {
            id: self.id().to_string(),
            props: Some(self.props()),
        }
    }
}

/// Serializable form of a [`ServiceError`], as published in controller state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
}

impl From<ServiceError> for ErrorObject {
    fn from(err: ServiceError) -> Self {
        err.to_object()
    }
}
