//! Plugin Node Data Structures
//!
//! This module defines the `Node` struct (one content block placed in a
//! container) and the parameters used to create new nodes.
//!
//! # Architecture
//!
//! - **Generic row**: `Node` carries only tree bookkeeping (container, parent,
//!   language, position). The type-specific payload lives in a separate record
//!   keyed 1:1 by the node id and is resolved through the type registry.
//! - **Dense positions**: within a (container, language) scope, positions are
//!   always the permutation `1..=N` once an operation has completed.
//!
//! # Examples
//!
//! ```rust
//! use blockspace_core::models::NewPlugin;
//! use serde_json::json;
//!
//! // A root-level text plugin
//! let text = NewPlugin::new("text", json!({ "body": "Hello" }));
//!
//! // A link nested under an existing plugin
//! let link = NewPlugin::new("link", json!({ "label": "Docs", "url": "https://example.com" }))
//!     .with_parent("parent-123");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Scope;

/// Validation errors for plugin payloads and type constraints
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid plugin type: {0}")]
    InvalidPluginType(String),

    #[error("Invalid plugin ID format: {0}")]
    InvalidId(String),

    #[error("Payload validation failed: {0}")]
    InvalidPayload(String),
}

/// One content block attached to a container.
///
/// # Fields
///
/// - `id`: Unique identifier (UUID)
/// - `container_id`: Owning container; ownership moves atomically on cross-container moves
/// - `parent_id`: Optional parent plugin, always in the same container and language
/// - `language`: Language tag; together with `container_id` it forms the position [`Scope`]
/// - `type_tag`: Key into the plugin type registry
/// - `position`: 1-based linear position inside the scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,

    pub container_id: String,

    pub parent_id: Option<String>,

    pub language: String,

    pub type_tag: String,

    pub position: i64,

    pub created_at: DateTime<Utc>,

    pub changed_at: DateTime<Utc>,
}

impl Node {
    /// The (container, language) scope this node is positioned in
    pub fn scope(&self) -> Scope {
        Scope::new(self.container_id.clone(), self.language.clone())
    }

    /// True when the node sits at the root level of its container
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Parameters for adding a plugin to a scope
///
/// # ID Generation
///
/// When `id` is `None` a UUID v4 is generated at insert time. Callers that
/// track ids optimistically (editors with local state) may supply their own.
#[derive(Debug, Clone)]
pub struct NewPlugin {
    /// Optional ID. If None, a UUID is generated
    pub id: Option<String>,
    /// Registry key of the plugin type
    pub type_tag: String,
    /// Optional parent plugin in the target scope
    pub parent_id: Option<String>,
    /// Type-specific payload, validated by the type's behavior
    pub payload: serde_json::Value,
}

impl NewPlugin {
    pub fn new(type_tag: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            type_tag: type_tag.into(),
            parent_id: None,
            payload,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Resolve the id to persist, generating one when absent
    pub(crate) fn resolve_id(&self) -> Result<String, ValidationError> {
        match &self.id {
            Some(id) if id.trim().is_empty() => Err(ValidationError::InvalidId(id.clone())),
            Some(id) => Ok(id.clone()),
            None => Ok(Uuid::new_v4().to_string()),
        }
    }
}

/// Where a block (added, moved, pasted or copied) should land
///
/// `position` is the requested final position of the block's root inside the
/// target scope. It is normalised to the nearest valid slot among the target
/// parent's children; `None` appends after the parent's last descendant (or at
/// the end of the scope for root-level placement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub scope: Scope,
    pub parent_id: Option<String>,
    pub position: Option<i64>,
}

impl Placement {
    /// Append at the root level of a scope
    pub fn append(scope: Scope) -> Self {
        Self {
            scope,
            parent_id: None,
            position: None,
        }
    }

    /// Place at a given position at the root level of a scope
    pub fn at(scope: Scope, position: i64) -> Self {
        Self {
            scope,
            parent_id: None,
            position: Some(position),
        }
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}
