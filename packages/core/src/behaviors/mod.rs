//! Plugin Behavior System
//!
//! This module provides the trait-based behavior system for plugin types:
//!
//! - `PluginBehavior` trait - Type-specific validation, cloning and post-copy fixups
//! - Built-in behaviors (`TextBehavior`, `LinkBehavior`, `SectionBehavior`)
//! - `PluginTypeRegistry` - Immutable `type_tag -> behavior` lookup, built once at startup
//!
//! The registry replaces a process-wide mutable plugin pool: it is constructed
//! explicitly, wrapped in an `Arc` and handed to every component that needs it.
//! After `build()` it cannot be modified, so sharing it needs no locking.

mod link;
mod section;
mod text;

pub use link::{LinkBehavior, LinkPayload};
pub use section::{SectionBehavior, SectionPayload};
pub use text::{plugin_marker, TextBehavior, TextPayload};

use crate::models::{Node, ValidationError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Old-id to new-node mapping handed to `post_copy` once every node of a copy
/// batch has been persisted.
#[derive(Debug, Default, Clone)]
pub struct CopyMap {
    new_by_old: HashMap<String, Node>,
}

impl CopyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old_id: impl Into<String>, new_node: Node) {
        self.new_by_old.insert(old_id.into(), new_node);
    }

    /// New node cloned from `old_id`, if it was part of the copy
    pub fn get(&self, old_id: &str) -> Option<&Node> {
        self.new_by_old.get(old_id)
    }

    pub fn new_id(&self, old_id: &str) -> Option<&str> {
        self.new_by_old.get(old_id).map(|node| node.id.as_str())
    }

    pub fn contains(&self, old_id: &str) -> bool {
        self.new_by_old.contains_key(old_id)
    }

    pub fn len(&self) -> usize {
        self.new_by_old.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_by_old.is_empty()
    }
}

/// Behavior of one plugin type
///
/// Only `type_tag` and `validate` are required; every other hook has a
/// permissive default.
pub trait PluginBehavior: Send + Sync {
    /// Registry key stored in `Node::type_tag`
    fn type_tag(&self) -> &'static str;

    /// Validate a payload before it is written
    fn validate(&self, payload: &Value) -> Result<(), ValidationError>;

    /// Produce the payload of a copy. Defaults to a full field copy.
    fn clone_payload(&self, old: &Value) -> Value {
        old.clone()
    }

    /// Rewrite references to other copied plugins once every node of the copy
    /// batch has a new id. Returns `true` when `payload` was changed and must
    /// be written back.
    fn post_copy(
        &self,
        _old: &Node,
        _payload: &mut Value,
        _copies: &CopyMap,
    ) -> Result<bool, ValidationError> {
        Ok(false)
    }

    /// Maximum number of plugins of this type per scope
    fn max_per_scope(&self) -> Option<usize> {
        None
    }

    /// Allowed parent types; `None` allows any parent (or none)
    fn parent_types(&self) -> Option<&'static [&'static str]> {
        None
    }

    /// Allowed child types; `None` allows any child, `Some(&[])` forbids children
    fn child_types(&self) -> Option<&'static [&'static str]> {
        None
    }

    /// Whether the plugin may only be placed under a parent
    fn requires_parent(&self) -> bool {
        false
    }
}

/// Immutable plugin type registry
///
/// # Examples
///
/// ```rust
/// use blockspace_core::behaviors::{PluginTypeRegistry, TextBehavior};
///
/// let registry = PluginTypeRegistry::builder()
///     .register(TextBehavior)
///     .build();
/// assert!(registry.get("text").is_some());
/// assert!(registry.get("video").is_none());
/// ```
#[derive(Clone, Default)]
pub struct PluginTypeRegistry {
    behaviors: HashMap<&'static str, Arc<dyn PluginBehavior>>,
}

impl PluginTypeRegistry {
    pub fn builder() -> PluginTypeRegistryBuilder {
        PluginTypeRegistryBuilder::default()
    }

    /// Registry with the built-in `text`, `link` and `section` types
    pub fn with_builtin() -> Self {
        Self::builder()
            .register(TextBehavior)
            .register(LinkBehavior)
            .register(SectionBehavior)
            .build()
    }

    pub fn get(&self, type_tag: &str) -> Option<Arc<dyn PluginBehavior>> {
        self.behaviors.get(type_tag).cloned()
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.behaviors.contains_key(type_tag)
    }

    /// Registered type tags, sorted
    pub fn type_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.behaviors.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

#[derive(Default)]
pub struct PluginTypeRegistryBuilder {
    behaviors: HashMap<&'static str, Arc<dyn PluginBehavior>>,
}

impl PluginTypeRegistryBuilder {
    /// Register a behavior. A later registration for the same tag replaces the earlier one.
    pub fn register<B: PluginBehavior + 'static>(mut self, behavior: B) -> Self {
        self.behaviors.insert(behavior.type_tag(), Arc::new(behavior));
        self
    }

    pub fn register_arc(mut self, behavior: Arc<dyn PluginBehavior>) -> Self {
        self.behaviors.insert(behavior.type_tag(), behavior);
        self
    }

    pub fn build(self) -> PluginTypeRegistry {
        PluginTypeRegistry {
            behaviors: self.behaviors,
        }
    }
}

/// Per-call memo of registry lookups, so a traversal resolves each type tag once
pub(crate) struct BehaviorCache<'a> {
    registry: &'a PluginTypeRegistry,
    resolved: HashMap<String, Option<Arc<dyn PluginBehavior>>>,
}

impl<'a> BehaviorCache<'a> {
    pub(crate) fn new(registry: &'a PluginTypeRegistry) -> Self {
        Self {
            registry,
            resolved: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, type_tag: &str) -> Option<Arc<dyn PluginBehavior>> {
        if let Some(hit) = self.resolved.get(type_tag) {
            return hit.clone();
        }
        let behavior = self.registry.get(type_tag);
        self.resolved.insert(type_tag.to_string(), behavior.clone());
        behavior
    }

    #[cfg(test)]
    pub(crate) fn resolved_count(&self) -> usize {
        self.resolved.len()
    }
}
