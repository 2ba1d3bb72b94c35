//! Error types for stratus-core.

use crate::id::ResourceId;
use crate::state::ResourceState;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for stratus-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// A single rejected request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Field name as it appears on the wire
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl FieldError {
    /// Create a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors that can occur during control-plane operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or missing fields, bad CIDR, unreadable image artifact
    #[error("validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    /// Referenced resource does not exist
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// ID collision, racing operations, exhausted address space
    #[error("conflict: {0}")]
    Conflict(String),

    /// Proposed subnet intersects an existing sibling
    #[error("{cidr} overlaps {sibling_cidr} of subnet {sibling}")]
    Overlap {
        /// Proposed block
        cidr: String,
        /// Conflicting sibling subnet
        sibling: ResourceId,
        /// Block of the conflicting sibling
        sibling_cidr: String,
    },

    /// Deletion blocked by live children
    #[error("{id} still has {} dependent resource(s)", .dependents.len())]
    Dependency {
        /// Resource that was to be deleted
        id: ResourceId,
        /// Children that block the deletion
        dependents: Vec<ResourceId>,
    },

    /// State machine refused the transition
    #[error("cannot move {id} from {from} to {to}")]
    InvalidTransition {
        /// Resource being transitioned
        id: ResourceId,
        /// Current state
        from: ResourceState,
        /// Requested state
        to: ResourceState,
    },

    /// Hypervisor collaborator failure
    #[error("provisioning failed: {0}")]
    Provision(#[from] stratus_hypervisor::HypervisorError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    /// Validation error for a single field.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// Stable error code exposed to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFoundError",
            Self::Conflict(_) | Self::InvalidTransition { .. } => "ConflictError",
            Self::Overlap { .. } => "OverlapError",
            Self::Dependency { .. } => "DependencyError",
            Self::Provision(_) => "ProvisionError",
            Self::Json(_) | Self::Io(_) => "InternalError",
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::InvalidTransition { .. })
    }

    /// Check if this error indicates a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
