//! Handler and registry error types, and transport error codes.

use thiserror::Error;

use crate::types::ResponseStatus;

// ── Transport error codes ───────────────────────────────────────────

/// Frame was not valid JSON or was missing a required field.
pub const INVALID_FORMAT: &str = "invalid_format";
/// Frame `type` was not recognized.
pub const UNKNOWN_TYPE: &str = "unknown_type";
/// Request frame on a connection that has not authenticated.
pub const UNAUTHORIZED: &str = "unauthorized";

/// Client-facing text for handler faults.
pub const SANITIZED_INTERNAL_MESSAGE: &str = "Internal server error";

/// Typed failure returned by an action handler.
///
/// The variant decides the response status; the dispatcher never inspects
/// message text.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Parameters passed schema validation but are semantically wrong.
    #[error("{message}")]
    InvalidParams {
        /// What is wrong.
        message: String,
    },

    /// The action needs an authenticated caller.
    #[error("{message}")]
    AuthRequired {
        /// Description.
        message: String,
    },

    /// The caller may not perform this action.
    #[error("{message}")]
    PermissionDenied {
        /// Description.
        message: String,
    },

    /// A record the action refers to does not exist.
    #[error("{message}")]
    NotFound {
        /// Description.
        message: String,
    },

    /// The handler could not complete. The message is shown to the client.
    #[error("{message}")]
    Failed {
        /// Description.
        message: String,
    },

    /// Unexpected fault. Logged in full, never shown to the client.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Response status for this error.
    pub fn status(&self) -> ResponseStatus {
        match self {
            Self::InvalidParams { .. } => ResponseStatus::BadRequest,
            Self::AuthRequired { .. } => ResponseStatus::AuthRequired,
            Self::PermissionDenied { .. } => ResponseStatus::PermissionDenied,
            Self::NotFound { .. } => ResponseStatus::NotFound,
            Self::Failed { .. } | Self::Internal { .. } => ResponseStatus::ServerError,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => "invalid_params",
            Self::AuthRequired { .. } => "auth_required",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::NotFound { .. } => "not_found",
            Self::Failed { .. } => "failed",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Registry mutation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A resource with this ID is already registered.
    #[error("resource '{0}' is already registered")]
    AlreadyExists(String),

    /// No resource with this ID.
    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    /// The resource does not declare this action.
    #[error("action '{action_id}' not found on resource '{resource_id}'")]
    ActionNotFound {
        /// Resource ID.
        resource_id: String,
        /// Action ID.
        action_id: String,
    },

    /// A handler is already bound to this action.
    #[error("a handler is already bound to '{resource_id}/{action_id}'")]
    HandlerAlreadyBound {
        /// Resource ID.
        resource_id: String,
        /// Action ID.
        action_id: String,
    },
}
