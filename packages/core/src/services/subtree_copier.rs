//! Subtree Copier
//!
//! Clones plugin subtrees into a target container, remapping parent ids and
//! running each type's clone and post-copy hooks.
//!
//! Copying is two-phase:
//!
//! 1. Every source node is cloned in parent-before-child order. The new parent
//!    is looked up in the running [`CopyMap`]; a node whose parent is not part
//!    of the copy set is reattached under the target parent instead of being
//!    dropped.
//! 2. Once every node has its new id, `post_copy` runs for each copy with the
//!    complete map, so payloads can retarget references to any other copied
//!    plugin, not just their own children.
//!
//! Positions are assigned per target language: each language scope gets one
//! gap at its own insertion pivot and one squash at the end.

use crate::behaviors::{BehaviorCache, CopyMap, PluginBehavior, PluginTypeRegistry};
use crate::config::EngineConfig;
use crate::db::{PluginStore, PositionAllocator, Renumberer};
use crate::models::{Node, Placement, Scope};
use crate::services::constraints;
use crate::services::error::TreeError;
use crate::services::layout::ScopeLayout;
use chrono::Utc;
use libsql::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// One copied plugin: the new row and the row it was cloned from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedPlugin {
    pub copy: Node,
    pub original: Node,
}

/// Where a copy batch lands
struct CopyTarget<'a> {
    container_id: &'a str,
    /// `None` keeps each node's source language
    language: Option<&'a str>,
    parent_id: Option<&'a str>,
    position: Option<i64>,
}

#[derive(Clone)]
pub struct SubtreeCopier {
    registry: Arc<PluginTypeRegistry>,
    config: Arc<EngineConfig>,
    renumberer: Renumberer,
}

impl SubtreeCopier {
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

    /// Copy the subtrees rooted at `node_ids` to `placement`
    ///
    /// Returns the copies in copy order; the first entry is the copy of the
    /// first root.
    pub async fn copy_subtree(
        &self,
        conn: &Connection,
        node_ids: &[String],
        placement: &Placement,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        let mut source: Vec<Node> = Vec::new();
        let mut seen = HashSet::new();
        for id in node_ids {
            let subtree = PluginStore::subtree_nodes(conn, id).await?;
            if subtree.is_empty() {
                return Err(TreeError::node_not_found(id));
            }
            source.extend(subtree.into_iter().filter(|n| seen.insert(n.id.clone())));
        }

        let target = CopyTarget {
            container_id: &placement.scope.container_id,
            language: Some(&placement.scope.language),
            parent_id: placement.parent_id.as_deref(),
            position: placement.position,
        };
        self.copy_nodes(conn, source, target).await
    }

    /// Append a copy of every plugin of `source` to `target`
    pub async fn copy_scope(
        &self,
        conn: &Connection,
        source: &Scope,
        target: &Scope,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        constraints::require_container(conn, &source.container_id).await?;
        let nodes = PluginStore::scope_nodes(conn, source).await?;

        let target = CopyTarget {
            container_id: &target.container_id,
            language: Some(&target.language),
            parent_id: None,
            position: None,
        };
        self.copy_nodes(conn, nodes, target).await
    }

    /// Append a copy of every language scope of one container to another,
    /// keeping each plugin's language
    pub async fn copy_container(
        &self,
        conn: &Connection,
        source_container_id: &str,
        target_container_id: &str,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        constraints::require_container(conn, source_container_id).await?;

        let mut nodes = Vec::new();
        for language in PluginStore::container_languages(conn, source_container_id).await? {
            let scope = Scope::new(source_container_id, language);
            nodes.extend(PluginStore::scope_nodes(conn, &scope).await?);
        }

        let target = CopyTarget {
            container_id: target_container_id,
            language: None,
            parent_id: None,
            position: None,
        };
        self.copy_nodes(conn, nodes, target).await
    }

    async fn copy_nodes(
        &self,
        conn: &Connection,
        source: Vec<Node>,
        target: CopyTarget<'_>,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        if source.is_empty() {
            return Ok(Vec::new());
        }

        let container = constraints::require_container(conn, target.container_id).await?;
        let source = copy_order(source);

        let mut cache = BehaviorCache::new(&self.registry);
        let behaviors = source
            .iter()
            .map(|n| {
                cache
                    .get(&n.type_tag)
                    .ok_or_else(|| TreeError::UnknownPluginType(n.type_tag.clone()))
            })
            .collect::<Result<Vec<Arc<dyn PluginBehavior>>, _>>()?;

        let copied_ids: HashSet<&str> = source.iter().map(|n| n.id.as_str()).collect();
        let target_language =
            |n: &Node| target.language.unwrap_or(n.language.as_str()).to_string();

        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, node) in source.iter().enumerate() {
            groups.entry(target_language(node)).or_default().push(i);
        }

        // Validate every target scope and open the gaps
        let mut positions = vec![0i64; source.len()];
        let mut scopes = Vec::with_capacity(groups.len());
        for (language, members) in &groups {
            let scope = Scope::new(target.container_id, language.clone());
            let layout = ScopeLayout::load(conn, &scope).await?;
            let parent =
                constraints::parent_in_scope(conn, &layout, target.parent_id, &scope).await?;

            for &i in members {
                let is_copy_root = source[i]
                    .parent_id
                    .as_deref()
                    .map_or(true, |p| !copied_ids.contains(p));
                if is_copy_root {
                    constraints::check_types(&self.registry, &source[i].type_tag, parent)?;
                }
            }

            let incoming: Vec<String> =
                members.iter().map(|&i| source[i].type_tag.clone()).collect();
            constraints::check_capacity(
                conn,
                &self.registry,
                &self.config,
                &container,
                &scope,
                &incoming,
            )
            .await?;

            let count = members.len() as i64;
            let pivot = layout.insertion_pivot(target.parent_id, target.position, &HashSet::new());
            let start = match pivot {
                Some(pivot) => {
                    PositionAllocator::shift(conn, &scope, pivot, count).await?;
                    pivot
                }
                None => layout.last_position() + 1,
            };
            for (offset, &i) in members.iter().enumerate() {
                positions[i] = start + offset as i64;
            }
            scopes.push(scope);
        }

        let mut payloads: HashMap<String, Value> = HashMap::new();
        let source_scopes: HashSet<Scope> = source.iter().map(Node::scope).collect();
        for scope in &source_scopes {
            payloads.extend(PluginStore::scope_payloads(conn, scope).await?);
        }

        // Phase 1: clone rows and payloads
        let now = Utc::now();
        let mut copies = CopyMap::new();
        let mut cloned: Vec<(usize, Node, Value)> = Vec::with_capacity(source.len());
        for (i, original) in source.iter().enumerate() {
            let language = target_language(original);
            let old_payload = payloads.get(&original.id).cloned().unwrap_or_else(|| json!({}));
            let payload = behaviors[i].clone_payload(&old_payload);

            let parent_id = match original.parent_id.as_deref().and_then(|p| copies.get(p)) {
                Some(parent_copy) if parent_copy.language == language => {
                    Some(parent_copy.id.clone())
                }
                _ => target.parent_id.map(str::to_string),
            };

            let copy = Node {
                id: Uuid::new_v4().to_string(),
                container_id: target.container_id.to_string(),
                parent_id,
                language,
                type_tag: original.type_tag.clone(),
                position: positions[i],
                created_at: now,
                changed_at: now,
            };
            PluginStore::insert_node(conn, &copy, &payload).await?;

            copies.insert(original.id.clone(), copy.clone());
            cloned.push((i, copy, payload));
        }

        // Phase 2: rewrite cross references now that every id is known
        for (i, copy, payload) in cloned.iter_mut() {
            if behaviors[*i].post_copy(&source[*i], payload, &copies)? {
                PluginStore::write_payload(conn, &copy.id, payload).await?;
            }
        }

        for scope in &scopes {
            self.renumberer.recalculate(conn, scope).await?;
        }

        let new_ids: Vec<String> = cloned.iter().map(|(_, copy, _)| copy.id.clone()).collect();
        let mut fresh: HashMap<String, Node> = PluginStore::get_nodes(conn, &new_ids)
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        tracing::debug!(
            container = target.container_id,
            copied = cloned.len(),
            scopes = scopes.len(),
            "copied plugins"
        );

        Ok(cloned
            .into_iter()
            .map(|(i, copy, _)| CopiedPlugin {
                copy: fresh.remove(&copy.id).unwrap_or(copy),
                original: source[i].clone(),
            })
            .collect())
    }
}

/// Depth-first preorder over the copy set: parents before children, siblings
/// by position, each subtree contiguous
///
/// Nodes whose parent is not in the set start their own tree. Rows caught in
/// a parent cycle are appended at the end rather than lost.
fn copy_order(mut nodes: Vec<Node>) -> Vec<Node> {
    nodes.sort_by(|a, b| {
        (&a.container_id, &a.language, a.position, &a.id)
            .cmp(&(&b.container_id, &b.language, b.position, &b.id))
    });

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut roots = Vec::new();
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        match node.parent_id.as_deref().and_then(|p| index.get(p)) {
            Some(&parent) => children.entry(parent).or_default().push(i),
            None => roots.push(i),
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut visited = vec![false; nodes.len()];
    let mut stack: Vec<usize> = roots.into_iter().rev().collect();
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut visited[i], true) {
            continue;
        }
        order.push(i);
        if let Some(kids) = children.get(&i) {
            stack.extend(kids.iter().rev());
        }
    }
    order.extend((0..nodes.len()).filter(|&i| !visited[i]));

    let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
