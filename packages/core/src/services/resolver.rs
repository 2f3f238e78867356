//! Bound Plugin Resolver
//!
//! Turns the flat, position-ordered rows of a scope into a forest of
//! [`BoundPlugin`]s with their payloads and behaviors attached.
//!
//! The forest is assembled in one reverse pass: walking from the last position
//! to the first, every node's children have already been built by the time the
//! node itself is reached, so it can take them from the pending map and hand
//! itself to its parent. No recursion and no per-node queries.

use crate::behaviors::{BehaviorCache, PluginTypeRegistry};
use crate::db::PluginStore;
use crate::models::{BoundPlugin, Node, Scope};
use crate::services::error::TreeError;
use libsql::Connection;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone)]
pub struct BoundPluginResolver {
    registry: Arc<PluginTypeRegistry>,
}

impl BoundPluginResolver {
    pub fn new(registry: Arc<PluginTypeRegistry>) -> Self {
        Self { registry }
    }

    /// Ordered forest of a scope
    pub async fn resolve_scope(
        &self,
        conn: &Connection,
        scope: &Scope,
    ) -> Result<Vec<BoundPlugin>, TreeError> {
        let nodes = PluginStore::scope_nodes(conn, scope).await?;
        let mut payloads = PluginStore::scope_payloads(conn, scope).await?;
        Ok(self.build_forest(nodes, &mut payloads))
    }

    /// One plugin with its descendants
    pub async fn resolve_subtree(
        &self,
        conn: &Connection,
        root_id: &str,
    ) -> Result<Option<BoundPlugin>, TreeError> {
        let nodes = PluginStore::subtree_nodes(conn, root_id).await?;
        let Some(root) = nodes.iter().find(|n| n.id == root_id) else {
            return Ok(None);
        };

        let mut payloads = PluginStore::scope_payloads(conn, &root.scope()).await?;
        Ok(self
            .build_forest(nodes, &mut payloads)
            .into_iter()
            .find(|plugin| plugin.id() == root_id))
    }

    /// Build the forest from position-ordered rows
    ///
    /// Rows whose parent is not among `nodes` become roots. Rows positioned
    /// before their own parent cannot be attached in a single pass; they are
    /// returned as extra roots after the regular ones.
    pub fn build_forest(
        &self,
        nodes: Vec<Node>,
        payloads: &mut HashMap<String, Value>,
    ) -> Vec<BoundPlugin> {
        let mut cache = BehaviorCache::new(&self.registry);
        let present: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();

        let mut pending: HashMap<String, Vec<BoundPlugin>> = HashMap::new();
        let mut roots = Vec::new();

        for node in nodes.into_iter().rev() {
            let behavior = cache.get(&node.type_tag);
            if behavior.is_none() {
                tracing::warn!(
                    "Plugin {} has unregistered type '{}', returning it unbound",
                    node.id,
                    node.type_tag
                );
            }

            let mut children = pending.remove(&node.id).unwrap_or_default();
            children.reverse();

            let payload = payloads.remove(&node.id).unwrap_or_else(|| json!({}));
            let parent_id = node.parent_id.clone();
            let plugin = BoundPlugin {
                node,
                payload,
                children,
                behavior,
            };

            match parent_id {
                Some(parent_id) if present.contains(&parent_id) => {
                    pending.entry(parent_id).or_default().push(plugin)
                }
                _ => roots.push(plugin),
            }
        }
        roots.reverse();

        if !pending.is_empty() {
            let mut detached: Vec<BoundPlugin> = pending.into_values().flatten().collect();
            tracing::warn!(
                "{} plugins are positioned before their parent; returning them as roots",
                detached.len()
            );
            detached.sort_by_key(|p| p.node.position);
            roots.extend(detached);
        }

        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str, parent: Option<&str>, position: i64, type_tag: &str) -> Node {
        let now = Utc::now();
        Node {
            id: id.to_string(),
            container_id: "c1".to_string(),
            parent_id: parent.map(str::to_string),
            language: "en".to_string(),
            type_tag: type_tag.to_string(),
            position,
            created_at: now,
            changed_at: now,
        }
    }

    fn resolver() -> BoundPluginResolver {
        BoundPluginResolver::new(Arc::new(PluginTypeRegistry::with_builtin()))
    }

    fn shape(plugins: &[BoundPlugin]) -> Vec<(String, Vec<String>)> {
        plugins
            .iter()
            .map(|p| {
                (
                    p.id().to_string(),
                    p.children.iter().map(|c| c.id().to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_builds_nested_forest_in_order() {
        let nodes = vec![
            node("a", None, 1, "section"),
            node("a1", Some("a"), 2, "text"),
            node("a1x", Some("a1"), 3, "link"),
            node("a2", Some("a"), 4, "text"),
            node("b", None, 5, "text"),
        ];
        let mut payloads = HashMap::new();
        payloads.insert("a1".to_string(), json!({ "body": "hello" }));

        let forest = resolver().build_forest(nodes, &mut payloads);

        assert_eq!(
            shape(&forest),
            vec![
                ("a".to_string(), vec!["a1".to_string(), "a2".to_string()]),
                ("b".to_string(), vec![]),
            ]
        );
        assert_eq!(forest[0].children[0].children[0].id(), "a1x");
        assert_eq!(forest[0].children[0].payload["body"], "hello");
        assert_eq!(forest[0].subtree_len(), 4);
        assert!(payloads.is_empty());
    }

    #[test]
    fn test_unknown_type_is_returned_unbound() {
        let forest = resolver().build_forest(
            vec![node("v", None, 1, "legacy-video")],
            &mut HashMap::new(),
        );
        assert_eq!(forest.len(), 1);
        assert!(!forest[0].is_bound());
    }

    #[test]
    fn test_child_before_parent_is_detached() {
        let nodes = vec![
            node("child", Some("parent"), 1, "text"),
            node("parent", None, 2, "section"),
        ];
        let forest = resolver().build_forest(nodes, &mut HashMap::new());
        let ids: Vec<&str> = forest.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["parent", "child"]);
    }

    #[test]
    fn test_behavior_lookup_is_memoized() {
        let registry = PluginTypeRegistry::with_builtin();

        let mut cache = BehaviorCache::new(&registry);
        for _ in 0..10 {
            assert!(cache.get("text").is_some());
            assert!(cache.get("missing").is_none());
        }
        assert_eq!(cache.resolved_count(), 2);
    }
}
