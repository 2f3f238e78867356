//! Tree Mutator - add / move / delete / clear
//!
//! Every method takes the connection of an already-open write transaction and
//! leaves each scope it touched dense (`1..=N`) and subtree-contiguous when it
//! returns `Ok`. Committing or rolling back is the caller's job
//! (`PluginTreeService` does it for the public API).
//!
//! # Position protocol
//!
//! 1. Load the affected scope(s) and compute the moving/inserted set by id.
//! 2. Resolve the insertion pivot among the target parent's children.
//! 3. Open a gap with `PositionAllocator` (the scope is now gapped).
//! 4. Write the block into the gap.
//! 5. Squash with `Renumberer::recalculate`.
//!
//! All validation happens in step 1-2, before anything is written.

use crate::behaviors::PluginTypeRegistry;
use crate::config::EngineConfig;
use crate::db::{PluginStore, PositionAllocator, Renumberer};
use crate::models::{NewPlugin, Node, Placement, Scope, ValidationError};
use crate::services::constraints;
use crate::services::error::TreeError;
use crate::services::layout::ScopeLayout;
use chrono::Utc;
use libsql::Connection;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of a move: the reloaded root plus the scope it left
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub node: Node,
    pub source_scope: Scope,
}

impl MoveOutcome {
    /// Source and target scope (one entry for same-scope moves)
    pub fn touched_scopes(&self) -> Vec<Scope> {
        let target = self.node.scope();
        if target == self.source_scope {
            vec![target]
        } else {
            vec![self.source_scope.clone(), target]
        }
    }
}

#[derive(Clone)]
pub struct TreeMutator {
    registry: Arc<PluginTypeRegistry>,
    config: Arc<EngineConfig>,
    renumberer: Renumberer,
}

impl TreeMutator {
    pub fn new(
        registry: Arc<PluginTypeRegistry>,
        config: Arc<EngineConfig>,
        renumberer: Renumberer,
    ) -> Self {
        Self {
            registry,
            config,
            renumberer,
        }
    }

    pub fn renumberer(&self) -> &Renumberer {
        &self.renumberer
    }

    /// Insert a new plugin into a scope
    ///
    /// The parent is taken from `placement.parent_id`, falling back to
    /// `plugin.parent_id`.
    pub async fn add(
        &self,
        conn: &Connection,
        plugin: NewPlugin,
        placement: &Placement,
    ) -> Result<Node, TreeError> {
        let behavior = self
            .registry
            .get(&plugin.type_tag)
            .ok_or_else(|| TreeError::UnknownPluginType(plugin.type_tag.clone()))?;
        behavior.validate(&plugin.payload)?;

        let scope = &placement.scope;
        let container = constraints::require_container(conn, &scope.container_id).await?;

        let id = plugin.resolve_id()?;
        if PluginStore::get_node(conn, &id).await?.is_some() {
            return Err(ValidationError::InvalidId(format!("{} already exists", id)).into());
        }

        let parent_id = placement
            .parent_id
            .as_deref()
            .or(plugin.parent_id.as_deref());

        let layout = ScopeLayout::load(conn, scope).await?;
        let parent = constraints::parent_in_scope(conn, &layout, parent_id, scope).await?;
        constraints::check_types(&self.registry, &plugin.type_tag, parent)?;
        constraints::check_capacity(
            conn,
            &self.registry,
            &self.config,
            &container,
            scope,
            std::slice::from_ref(&plugin.type_tag),
        )
        .await?;

        let last = layout.last_position();
        let pivot = layout.insertion_pivot(parent_id, placement.position, &HashSet::new());
        let position = match pivot {
            Some(pivot) => {
                PositionAllocator::shift(conn, scope, pivot, last - pivot + 2).await?;
                pivot
            }
            None => last + 1,
        };

        let now = Utc::now();
        let node = Node {
            id,
            container_id: scope.container_id.clone(),
            parent_id: parent_id.map(str::to_string),
            language: scope.language.clone(),
            type_tag: plugin.type_tag,
            position,
            created_at: now,
            changed_at: now,
        };
        PluginStore::insert_node(conn, &node, &plugin.payload).await?;

        if pivot.is_some() {
            self.renumberer.recalculate(conn, scope).await?;
        }

        tracing::debug!(id = %node.id, %scope, position, "added plugin");
        Ok(node)
    }

    /// Move a plugin and its descendants to a new place, possibly in another
    /// container or language
    pub async fn move_plugin(
        &self,
        conn: &Connection,
        id: &str,
        placement: &Placement,
    ) -> Result<MoveOutcome, TreeError> {
        let node = constraints::require_node(conn, id).await?;
        let source = node.scope();
        let target = &placement.scope;
        let container = constraints::require_container(conn, &target.container_id).await?;

        let source_layout = ScopeLayout::load(conn, &source).await?;
        let block: Vec<Node> = source_layout.subtree(id).into_iter().cloned().collect();
        let block_ids: Vec<String> = block.iter().map(|n| n.id.clone()).collect();
        let moving: HashSet<String> = block_ids.iter().cloned().collect();

        let parent_id = placement.parent_id.as_deref();
        if let Some(parent_id) = parent_id {
            if moving.contains(parent_id) {
                return Err(TreeError::integrity(format!(
                    "cannot move {} under its own descendant {}",
                    id, parent_id
                )));
            }
        }

        let same_scope = source == *target;
        let target_layout = if same_scope {
            None
        } else {
            Some(ScopeLayout::load(conn, target).await?)
        };
        let layout = target_layout.as_ref().unwrap_or(&source_layout);

        let parent = constraints::parent_in_scope(conn, layout, parent_id, target).await?;
        constraints::check_types(&self.registry, &node.type_tag, parent)?;

        if !same_scope {
            let incoming: Vec<String> = block.iter().map(|n| n.type_tag.clone()).collect();
            constraints::check_capacity(
                conn,
                &self.registry,
                &self.config,
                &container,
                target,
                &incoming,
            )
            .await?;
        }

        let block_start = block.iter().map(|n| n.position).min().unwrap_or(node.position);
        let block_end = block.iter().map(|n| n.position).max().unwrap_or(node.position);
        let pivot = layout.insertion_pivot(parent_id, placement.position, &moving);

        if same_scope {
            // Everything at or after the pivot jumps past the current maximum;
            // the block then drops into the hole at the pivot.
            let last = source_layout.last_position();
            match pivot {
                Some(pivot) => {
                    PositionAllocator::shift_except(conn, target, pivot, last, &block_ids)
                        .await?;
                    PositionAllocator::shift_nodes(conn, &block_ids, pivot - block_start).await?;
                }
                None => {
                    PositionAllocator::shift_nodes(conn, &block_ids, last + 1 - block_start)
                        .await?;
                }
            }
        } else {
            let span = block_end - block_start + 1;
            match pivot {
                Some(pivot) => {
                    PositionAllocator::shift(conn, target, pivot, span).await?;
                    PositionAllocator::shift_nodes(conn, &block_ids, pivot - block_start).await?;
                }
                None => {
                    let offset = layout.last_position() + 1 - block_start;
                    PositionAllocator::shift_nodes(conn, &block_ids, offset).await?;
                }
            }
            PluginStore::relocate_nodes(conn, &block_ids, target).await?;
        }

        if node.parent_id.as_deref() != parent_id {
            PluginStore::set_parent(conn, id, parent_id).await?;
        }

        self.renumberer.recalculate(conn, target).await?;
        if !same_scope {
            self.renumberer.recalculate(conn, &source).await?;
        }

        let moved = constraints::require_node(conn, id).await?;
        tracing::debug!(
            id,
            from = %source,
            to = %target,
            position = moved.position,
            block = block_ids.len(),
            "moved plugin"
        );

        Ok(MoveOutcome {
            node: moved,
            source_scope: source,
        })
    }

    /// Delete a plugin and all of its descendants, returning the deleted root
    pub async fn delete(&self, conn: &Connection, id: &str) -> Result<Node, TreeError> {
        let node = constraints::require_node(conn, id).await?;
        let scope = node.scope();

        let layout = ScopeLayout::load(conn, &scope).await?;
        let block = layout.subtree(id);
        let block_end = block.iter().map(|n| n.position).max().unwrap_or(node.position);
        let block_ids: Vec<String> = block.iter().map(|n| n.id.clone()).collect();
        let remaining = layout.len() - block_ids.len();

        PluginStore::delete_nodes(conn, &block_ids).await?;

        if remaining > 0 {
            let size = block_ids.len() as i64;
            PositionAllocator::shift(conn, &scope, block_end + 1, -size).await?;
            self.renumberer.recalculate(conn, &scope).await?;
        }

        tracing::debug!(id, %scope, deleted = block_ids.len(), "deleted plugin subtree");
        Ok(node)
    }

    /// Delete every plugin of a scope
    pub async fn clear(&self, conn: &Connection, scope: &Scope) -> Result<u64, TreeError> {
        let deleted = PluginStore::delete_scope(conn, scope).await?;
        tracing::debug!(%scope, deleted, "cleared scope");
        Ok(deleted)
    }

    /// Clear every language scope of a container, returning the scopes cleared
    pub async fn clear_container(
        &self,
        conn: &Connection,
        container_id: &str,
    ) -> Result<Vec<Scope>, TreeError> {
        constraints::require_container(conn, container_id).await?;

        let mut cleared = Vec::new();
        for language in PluginStore::container_languages(conn, container_id).await? {
            let scope = Scope::new(container_id, language);
            self.clear(conn, &scope).await?;
            cleared.push(scope);
        }
        Ok(cleared)
    }

    /// Reorder the children of `parent_id` (the roots when `None`) to match
    /// `ordered_ids`, carrying each child's subtree along
    ///
    /// Returns `false` when the order was already the requested one.
    pub async fn apply_order(
        &self,
        conn: &Connection,
        scope: &Scope,
        parent_id: Option<&str>,
        ordered_ids: &[String],
    ) -> Result<bool, TreeError> {
        let layout = ScopeLayout::load(conn, scope).await?;
        constraints::parent_in_scope(conn, &layout, parent_id, scope).await?;

        let siblings: Vec<&str> = layout
            .children_of(parent_id)
            .into_iter()
            .map(|n| n.id.as_str())
            .collect();

        if ordered_ids.len() != siblings.len() {
            return Err(TreeError::invalid_order(format!(
                "expected {} siblings, got {}",
                siblings.len(),
                ordered_ids.len()
            )));
        }
        let current: HashSet<&str> = siblings.iter().copied().collect();
        let mut seen = HashSet::new();
        for id in ordered_ids {
            if !current.contains(id.as_str()) {
                return Err(TreeError::invalid_order(format!(
                    "{} is not a child of {}",
                    id,
                    parent_id.unwrap_or("the root level")
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(TreeError::invalid_order(format!("{} is listed twice", id)));
            }
        }

        if siblings.iter().zip(ordered_ids).all(|(a, b)| *a == b.as_str()) {
            return Ok(false);
        }

        // Lay the sibling blocks out past the end of the scope in the new
        // order, push whatever followed them further out, then squash.
        let last = layout.last_position();
        let mut region_start = i64::MAX;
        let mut reordered: HashSet<&str> = HashSet::new();
        let mut cursor = last + 1;

        for id in ordered_ids {
            let block = layout.subtree(id);
            let start = block.iter().map(|n| n.position).min().unwrap_or(cursor);
            let end = block.iter().map(|n| n.position).max().unwrap_or(start);
            region_start = region_start.min(start);

            let ids: Vec<String> = block.iter().map(|n| n.id.clone()).collect();
            PositionAllocator::shift_nodes(conn, &ids, cursor - start).await?;
            reordered.extend(block.iter().map(|n| n.id.as_str()));
            cursor += end - start + 1;
        }

        let tail: Vec<String> = layout
            .nodes()
            .iter()
            .filter(|n| n.position > region_start && !reordered.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        PositionAllocator::shift_nodes(conn, &tail, cursor - region_start).await?;

        self.renumberer.recalculate(conn, scope).await?;

        tracing::debug!(%scope, parent = ?parent_id, siblings = siblings.len(), "applied order");
        Ok(true)
    }

    /// Check whether `incoming` plugin types fit into a scope
    pub async fn check_capacity(
        &self,
        conn: &Connection,
        scope: &Scope,
        incoming: &[String],
    ) -> Result<(), TreeError> {
        let container = constraints::require_container(conn, &scope.container_id).await?;
        constraints::check_capacity(
            conn,
            &self.registry,
            &self.config,
            &container,
            scope,
            incoming,
        )
        .await
    }
}

#[cfg(test)]
#[path = "tree_mutator_test.rs"]
mod tree_mutator_test;
