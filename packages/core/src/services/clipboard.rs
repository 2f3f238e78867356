//! Clipboard Coordinator
//!
//! Cut / copy / paste across containers through a per-owner holding area: a
//! container flagged `is_holding_area` that holds at most one root plugin (with
//! its descendants) at any time. Every operation that puts something into the
//! holding area clears it first.

use crate::db::PluginStore;
use crate::models::{Container, ContainerOwner, Node, Placement, Scope};
use crate::services::constraints;
use crate::services::error::TreeError;
use crate::services::subtree_copier::{CopiedPlugin, SubtreeCopier};
use crate::services::tree_mutator::{MoveOutcome, TreeMutator};
use chrono::Utc;
use libsql::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Owner kind recorded on holding-area containers
pub const HOLDING_AREA_OWNER_KIND: &str = "user";

/// Entry of a desired sibling order passed to `paste_copy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEntry {
    /// An existing sibling
    Plugin(String),
    /// Stands in for the root of the pasted copy, whose id is not known yet
    PastedRoot,
}

#[derive(Clone)]
pub struct ClipboardCoordinator {
    mutator: TreeMutator,
    copier: SubtreeCopier,
    holding_slot: String,
}

impl ClipboardCoordinator {
    pub fn new(
        mutator: TreeMutator,
        copier: SubtreeCopier,
        holding_slot: impl Into<String>,
    ) -> Self {
        Self {
            mutator,
            copier,
            holding_slot: holding_slot.into(),
        }
    }

    /// Holding area of an owner, created on first use
    pub async fn holding_area(
        &self,
        conn: &Connection,
        owner_id: &str,
    ) -> Result<Container, TreeError> {
        let owner = ContainerOwner::new(HOLDING_AREA_OWNER_KIND, owner_id);
        if let Some(existing) = PluginStore::containers_for_owner(conn, &owner, true)
            .await?
            .into_iter()
            .next()
        {
            return Ok(existing);
        }

        let container = Container {
            id: Uuid::new_v4().to_string(),
            slot: self.holding_slot.clone(),
            owner: Some(owner),
            is_holding_area: true,
            created_at: Utc::now(),
        };
        PluginStore::insert_container(conn, &container).await?;
        tracing::info!("Created holding area {} for owner {}", container.id, owner_id);
        Ok(container)
    }

    /// Move a plugin subtree into the holding area, replacing whatever it held
    ///
    /// Returns the move and the holding-area scopes that were cleared.
    pub async fn cut(
        &self,
        conn: &Connection,
        node_id: &str,
        holding_id: &str,
    ) -> Result<(MoveOutcome, Vec<Scope>), TreeError> {
        let holding = require_holding_area(conn, holding_id).await?;
        let node = constraints::require_node(conn, node_id).await?;

        if node.container_id == holding.id {
            // Already the held item
            let source_scope = node.scope();
            return Ok((MoveOutcome { node, source_scope }, Vec::new()));
        }

        let cleared = self.mutator.clear_container(conn, &holding.id).await?;
        let target = Placement::append(Scope::new(&holding.id, node.language.as_str()));
        let moved = self.mutator.move_plugin(conn, node_id, &target).await?;

        tracing::debug!(node_id, holding = %holding.id, "cut plugin to holding area");
        Ok((moved, cleared))
    }

    /// Copy a plugin subtree into the holding area, replacing whatever it held
    pub async fn copy_to_holding(
        &self,
        conn: &Connection,
        node_id: &str,
        holding_id: &str,
    ) -> Result<(Vec<CopiedPlugin>, Vec<Scope>), TreeError> {
        let holding = require_holding_area(conn, holding_id).await?;
        let node = constraints::require_node(conn, node_id).await?;

        if node.container_id == holding.id {
            return Err(TreeError::integrity(format!(
                "{} is already in holding area {}",
                node_id, holding.id
            )));
        }

        let cleared = self.mutator.clear_container(conn, &holding.id).await?;
        let target = Placement::append(Scope::new(&holding.id, node.language.as_str()));
        let copies = self
            .copier
            .copy_subtree(conn, &[node_id.to_string()], &target)
            .await?;

        Ok((copies, cleared))
    }

    /// Move the held plugin out of the holding area
    pub async fn paste_move(
        &self,
        conn: &Connection,
        held_id: &str,
        placement: &Placement,
    ) -> Result<MoveOutcome, TreeError> {
        require_held_root(conn, held_id).await?;

        self.mutator.move_plugin(conn, held_id, placement).await
    }

    /// Paste a copy of the held plugin, leaving the holding area untouched
    ///
    /// When `order` is given it must list every sibling at the target level,
    /// with exactly one [`OrderEntry::PastedRoot`] marking where the copy goes;
    /// the siblings are then rearranged to match.
    pub async fn paste_copy(
        &self,
        conn: &Connection,
        held_id: &str,
        placement: &Placement,
        order: Option<&[OrderEntry]>,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        require_held_root(conn, held_id).await?;

        let copies = self
            .copier
            .copy_subtree(conn, &[held_id.to_string()], placement)
            .await?;

        if let Some(order) = order {
            let root = copies
                .iter()
                .find(|c| c.original.id == held_id)
                .map(|c| c.copy.id.clone())
                .ok_or_else(|| TreeError::node_not_found(held_id))?;

            let markers = order
                .iter()
                .filter(|entry| matches!(entry, OrderEntry::PastedRoot))
                .count();
            if markers != 1 {
                return Err(TreeError::invalid_order(format!(
                    "expected exactly one pasted-root marker, found {}",
                    markers
                )));
            }

            let ordered_ids: Vec<String> = order
                .iter()
                .map(|entry| match entry {
                    OrderEntry::Plugin(id) => id.clone(),
                    OrderEntry::PastedRoot => root.clone(),
                })
                .collect();

            let reordered = self
                .mutator
                .apply_order(
                    conn,
                    &placement.scope,
                    placement.parent_id.as_deref(),
                    &ordered_ids,
                )
                .await?;
            if reordered {
                return reload_copies(conn, copies).await;
            }
        }

        Ok(copies)
    }
}

async fn reload_copies(
    conn: &Connection,
    mut copies: Vec<CopiedPlugin>,
) -> Result<Vec<CopiedPlugin>, TreeError> {
    let ids: Vec<String> = copies.iter().map(|c| c.copy.id.clone()).collect();
    let mut fresh: HashMap<String, Node> = PluginStore::get_nodes(conn, &ids)
        .await?
        .into_iter()
        .map(|n| (n.id.clone(), n))
        .collect();

    for copied in &mut copies {
        if let Some(node) = fresh.remove(&copied.copy.id) {
            copied.copy = node;
        }
    }
    Ok(copies)
}

/// The held item is the root of a holding area; its descendants only move
/// or copy along with it
async fn require_held_root(conn: &Connection, held_id: &str) -> Result<Node, TreeError> {
    let held = constraints::require_node(conn, held_id).await?;
    require_holding_area(conn, &held.container_id).await?;
    if let Some(parent_id) = &held.parent_id {
        return Err(TreeError::integrity(format!(
            "{} is nested under {} and cannot be pasted on its own",
            held_id, parent_id
        )));
    }
    Ok(held)
}

async fn require_holding_area(
    conn: &Connection,
    container_id: &str,
) -> Result<Container, TreeError> {
    let container = constraints::require_container(conn, container_id).await?;
    if !container.is_holding_area {
        return Err(TreeError::integrity(format!(
            "container {} is not a holding area",
            container_id
        )));
    }
    Ok(container)
}
