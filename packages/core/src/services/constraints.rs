//! Placement checks shared by the mutating components
//!
//! Everything here runs before the first write of an operation, so a failed
//! check leaves the scope untouched.

use crate::behaviors::PluginTypeRegistry;
use crate::config::EngineConfig;
use crate::db::PluginStore;
use crate::models::{Container, Node, Scope};
use crate::services::error::TreeError;
use crate::services::layout::ScopeLayout;
use libsql::Connection;
use std::collections::{BTreeMap, HashMap};

pub(crate) async fn require_container(
    conn: &Connection,
    container_id: &str,
) -> Result<Container, TreeError> {
    PluginStore::get_container(conn, container_id)
        .await?
        .ok_or_else(|| TreeError::container_not_found(container_id))
}

pub(crate) async fn require_node(conn: &Connection, id: &str) -> Result<Node, TreeError> {
    PluginStore::get_node(conn, id)
        .await?
        .ok_or_else(|| TreeError::node_not_found(id))
}

/// Resolve a target parent, which must live in the target scope
pub(crate) async fn parent_in_scope<'a>(
    conn: &Connection,
    layout: &'a ScopeLayout,
    parent_id: Option<&str>,
    scope: &Scope,
) -> Result<Option<&'a Node>, TreeError> {
    let Some(parent_id) = parent_id else {
        return Ok(None);
    };

    if let Some(parent) = layout.get(parent_id) {
        return Ok(Some(parent));
    }

    match PluginStore::get_node(conn, parent_id).await? {
        Some(parent) => Err(TreeError::integrity(format!(
            "parent {} belongs to scope {}, not {}",
            parent_id,
            parent.scope(),
            scope
        ))),
        None => Err(TreeError::node_not_found(parent_id)),
    }
}

/// Parent/child type rules of both the placed plugin and its new parent
///
/// Unregistered types carry no rules, so unbound plugins can still be moved.
pub(crate) fn check_types(
    registry: &PluginTypeRegistry,
    type_tag: &str,
    parent: Option<&Node>,
) -> Result<(), TreeError> {
    if let Some(behavior) = registry.get(type_tag) {
        if behavior.requires_parent() && parent.is_none() {
            return Err(TreeError::integrity(format!(
                "'{}' plugins must be placed under a parent",
                type_tag
            )));
        }
        if let (Some(allowed), Some(parent)) = (behavior.parent_types(), parent) {
            if !allowed.iter().any(|t| *t == parent.type_tag) {
                return Err(TreeError::integrity(format!(
                    "'{}' cannot be placed under '{}'",
                    type_tag, parent.type_tag
                )));
            }
        }
    }

    if let Some(parent) = parent {
        let accepted = registry
            .get(&parent.type_tag)
            .and_then(|behavior| behavior.child_types());
        if let Some(accepted) = accepted {
            if !accepted.iter().any(|t| *t == type_tag) {
                return Err(TreeError::integrity(format!(
                    "'{}' does not accept '{}' children",
                    parent.type_tag, type_tag
                )));
            }
        }
    }

    Ok(())
}

/// Reject `incoming` plugins that would push the scope over a configured limit
///
/// Holding areas are exempt.
pub(crate) async fn check_capacity(
    conn: &Connection,
    registry: &PluginTypeRegistry,
    config: &EngineConfig,
    container: &Container,
    scope: &Scope,
    incoming: &[String],
) -> Result<(), TreeError> {
    if container.is_holding_area || incoming.is_empty() {
        return Ok(());
    }

    if let Some(limit) = config.max_plugins_per_scope {
        let count = PluginStore::count_in_scope(conn, scope).await?;
        if count + incoming.len() > limit {
            return Err(TreeError::CapacityExceeded {
                scope: scope.clone(),
                limit,
                type_tag: None,
            });
        }
    }

    let mut incoming_by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for type_tag in incoming {
        *incoming_by_type.entry(type_tag.as_str()).or_default() += 1;
    }

    let mut existing: Option<HashMap<String, usize>> = None;
    for (type_tag, added) in incoming_by_type {
        let behavior_limit = registry.get(type_tag).and_then(|b| b.max_per_scope());
        let Some(limit) = config.type_limit(type_tag, behavior_limit) else {
            continue;
        };

        if existing.is_none() {
            existing = Some(PluginStore::count_by_type(conn, scope).await?);
        }
        let current = existing
            .as_ref()
            .and_then(|counts| counts.get(type_tag).copied())
            .unwrap_or(0);

        if current + added > limit {
            return Err(TreeError::CapacityExceeded {
                scope: scope.clone(),
                limit,
                type_tag: Some(type_tag.to_string()),
            });
        }
    }

    Ok(())
}
