//! Container (placeholder) model
//!
//! A container is a named slot holding an ordered tree of plugins. It may carry
//! a weak back-reference to the object that owns it; the reference is only used
//! for lookups and never implies ownership of the container's rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weak reference to the object owning a container (e.g. a page or a user)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOwner {
    pub object_kind: String,
    pub object_id: String,
}

impl ContainerOwner {
    pub fn new(object_kind: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_kind: object_kind.into(),
            object_id: object_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,

    /// Stable slot name within the owner's template (e.g. "content", "sidebar")
    pub slot: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<ContainerOwner>,

    /// Holding areas stage at most one root plugin for cut/copy/paste
    pub is_holding_area: bool,

    pub created_at: DateTime<Utc>,
}
