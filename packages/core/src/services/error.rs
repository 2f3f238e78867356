//! Service Layer Error Types
//!
//! Engine-level errors returned by every tree operation. Storage failures are
//! wrapped; lock contention is lifted into `ScopeCollision` so callers can tell
//! a retryable conflict apart from a real failure.

use crate::db::DatabaseError;
use crate::models::{Scope, ValidationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    /// Plugin not found by ID
    #[error("Plugin not found: {id}")]
    NodeNotFound { id: String },

    /// Container not found by ID
    #[error("Container not found: {id}")]
    ContainerNotFound { id: String },

    /// The operation would break the tree structure (foreign parent, cycle,
    /// disallowed parent/child type). Raised before any write.
    #[error("Tree integrity violation: {reason}")]
    TreeIntegrity { reason: String },

    /// Another writer holds the scope lock; retry the whole operation
    #[error("Scope is locked by another writer: {context}")]
    ScopeCollision { context: String },

    /// A per-scope or per-type limit would be exceeded
    #[error("Capacity exceeded in scope {scope}: limit {limit}{}", type_suffix(.type_tag))]
    CapacityExceeded {
        scope: Scope,
        limit: usize,
        type_tag: Option<String>,
    },

    /// Type tag missing from the plugin type registry
    #[error("Unknown plugin type: {0}")]
    UnknownPluginType(String),

    /// Payload or id validation failed
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// An explicit ordering does not match the current siblings
    #[error("Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// The mutation observer vetoed the commit
    #[error("Mutation rejected by observer: {reason}")]
    ObserverRejected { reason: String },

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    Database(DatabaseError),
}

fn type_suffix(type_tag: &Option<String>) -> String {
    match type_tag {
        Some(tag) => format!(" for type '{}'", tag),
        None => String::new(),
    }
}

impl From<DatabaseError> for TreeError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::Busy { context } => Self::ScopeCollision { context },
            other => Self::Database(other),
        }
    }
}

impl TreeError {
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::ContainerNotFound { id: id.into() }
    }

    pub fn integrity(reason: impl Into<String>) -> Self {
        Self::TreeIntegrity {
            reason: reason.into(),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            reason: reason.into(),
        }
    }

    /// Only lock collisions are worth retrying unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ScopeCollision { .. })
    }
}
