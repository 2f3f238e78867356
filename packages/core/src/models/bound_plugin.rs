//! Bound plugins: generic nodes resolved to their typed payload
//!
//! `BoundPlugin` is the read-side view produced by the resolver: the node row,
//! the behavior handle looked up from the type registry, the payload and the
//! already-attached children.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::behaviors::PluginBehavior;
use crate::models::{Node, ValidationError};

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundPlugin {
    #[serde(flatten)]
    pub node: Node,

    pub payload: serde_json::Value,

    pub children: Vec<BoundPlugin>,

    /// `None` when the node's type tag is not registered
    #[serde(skip)]
    pub behavior: Option<Arc<dyn PluginBehavior>>,
}

impl BoundPlugin {
    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn is_bound(&self) -> bool {
        self.behavior.is_some()
    }

    /// Deserialize the payload into the plugin type's concrete struct
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ValidationError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ValidationError::InvalidPayload(e.to_string()))
    }

    /// Depth-first iterator over this plugin and all of its descendants
    pub fn iter(&self) -> impl Iterator<Item = &BoundPlugin> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }

    /// Number of plugins in this subtree, including the plugin itself
    pub fn subtree_len(&self) -> usize {
        self.iter().count()
    }
}

impl fmt::Debug for BoundPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundPlugin")
            .field("id", &self.node.id)
            .field("type_tag", &self.node.type_tag)
            .field("position", &self.node.position)
            .field("bound", &self.is_bound())
            .field("children", &self.children)
            .finish()
    }
}
