//! In-memory view of one scope's rows
//!
//! Loaded once per operation inside the write transaction. All set
//! computations (descendants, sibling blocks, insertion slots) are done by id
//! membership on this snapshot, never by position ranges.

use crate::db::{DatabaseError, PluginStore};
use crate::models::{Node, Scope};
use libsql::Connection;
use std::collections::{HashMap, HashSet};

pub(crate) struct ScopeLayout {
    /// Rows in position order
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    /// Child indices per parent id, in position order
    children: HashMap<String, Vec<usize>>,
}

impl ScopeLayout {
    pub(crate) async fn load(conn: &Connection, scope: &Scope) -> Result<Self, DatabaseError> {
        Ok(Self::from_nodes(PluginStore::scope_nodes(conn, scope).await?))
    }

    pub(crate) fn from_nodes(mut nodes: Vec<Node>) -> Self {
        nodes.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));

        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if let Some(parent_id) = &node.parent_id {
                children.entry(parent_id.clone()).or_default().push(i);
            }
        }

        Self {
            nodes,
            index,
            children,
        }
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub(crate) fn last_position(&self) -> i64 {
        self.nodes.last().map(|n| n.position).unwrap_or(0)
    }

    /// Direct children of `parent_id` in position order; roots when `None`
    ///
    /// A row whose parent is not part of this scope is not a root here.
    pub(crate) fn children_of(&self, parent_id: Option<&str>) -> Vec<&Node> {
        match parent_id {
            Some(parent_id) => self
                .children
                .get(parent_id)
                .map(|list| list.iter().map(|&i| &self.nodes[i]).collect())
                .unwrap_or_default(),
            None => self.nodes.iter().filter(|n| n.parent_id.is_none()).collect(),
        }
    }

    /// The node and all of its descendants, in position order
    pub(crate) fn subtree(&self, id: &str) -> Vec<&Node> {
        let Some(&root) = self.index.get(id) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut stack = vec![root];
        let mut found = Vec::new();
        while let Some(i) = stack.pop() {
            if !seen.insert(i) {
                continue;
            }
            found.push(i);
            if let Some(kids) = self.children.get(&self.nodes[i].id) {
                stack.extend(kids.iter().copied());
            }
        }

        found.sort_unstable();
        found.into_iter().map(|i| &self.nodes[i]).collect()
    }

    /// Position before which a block lands, or `None` to append at the end of
    /// the scope
    ///
    /// `requested` is the wanted final position of the block's root, compared
    /// against the ranks the remaining rows will have once `moving` is taken
    /// out. The block goes before the first sibling under `parent_id` whose
    /// rank is `>= requested`; without such a sibling (or without a request)
    /// it goes right after the parent's last descendant.
    pub(crate) fn insertion_pivot(
        &self,
        parent_id: Option<&str>,
        requested: Option<i64>,
        moving: &HashSet<String>,
    ) -> Option<i64> {
        let mut rank = HashMap::with_capacity(self.nodes.len());
        for node in self.nodes.iter().filter(|n| !moving.contains(&n.id)) {
            rank.insert(node.id.as_str(), rank.len() as i64 + 1);
        }

        if let Some(requested) = requested {
            let before = self
                .children_of(parent_id)
                .into_iter()
                .filter(|n| !moving.contains(&n.id))
                .find(|n| rank.get(n.id.as_str()).copied().unwrap_or(0) >= requested);
            if let Some(sibling) = before {
                return Some(sibling.position);
            }
        }

        let parent_id = parent_id?;
        let block_end = self
            .subtree(parent_id)
            .into_iter()
            .filter(|n| !moving.contains(&n.id))
            .map(|n| n.position)
            .max()?;

        self.nodes
            .iter()
            .find(|n| n.position > block_end && !moving.contains(&n.id))
            .map(|n| n.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str, parent: Option<&str>, position: i64) -> Node {
        let now = Utc::now();
        Node {
            id: id.to_string(),
            container_id: "c1".to_string(),
            parent_id: parent.map(str::to_string),
            language: "en".to_string(),
            type_tag: "section".to_string(),
            position,
            created_at: now,
            changed_at: now,
        }
    }

    // a(1) [b(2) [c(3)]] d(4) [e(5)] f(6)
    fn sample() -> ScopeLayout {
        ScopeLayout::from_nodes(vec![
            node("f", None, 6),
            node("a", None, 1),
            node("b", Some("a"), 2),
            node("c", Some("b"), 3),
            node("d", None, 4),
            node("e", Some("d"), 5),
        ])
    }

    fn ids(nodes: Vec<&Node>) -> Vec<&str> {
        nodes.into_iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_children_and_subtree() {
        let layout = sample();
        assert_eq!(ids(layout.children_of(None)), vec!["a", "d", "f"]);
        assert_eq!(ids(layout.children_of(Some("a"))), vec!["b"]);
        assert_eq!(ids(layout.subtree("a")), vec!["a", "b", "c"]);
        assert!(layout.subtree("missing").is_empty());
        assert_eq!(layout.last_position(), 6);
    }

    #[test]
    fn test_pivot_before_requested_sibling() {
        let layout = sample();
        let none = HashSet::new();
        assert_eq!(layout.insertion_pivot(None, Some(1), &none), Some(1));
        assert_eq!(layout.insertion_pivot(None, Some(2), &none), Some(4));
        assert_eq!(layout.insertion_pivot(None, Some(7), &none), None);
        assert_eq!(layout.insertion_pivot(None, None, &none), None);
    }

    #[test]
    fn test_pivot_appends_after_parent_block() {
        let layout = sample();
        let none = HashSet::new();
        // After c, before d
        assert_eq!(layout.insertion_pivot(Some("a"), None, &none), Some(4));
        // d's block ends at 5, f follows
        assert_eq!(layout.insertion_pivot(Some("d"), None, &none), Some(6));
        assert_eq!(layout.insertion_pivot(Some("f"), None, &none), None);
    }

    #[test]
    fn test_pivot_ranks_exclude_moving_block() {
        let layout = sample();
        let moving: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        // Without a's block: d=1, e=2, f=3. Final position 3 means before f.
        assert_eq!(layout.insertion_pivot(None, Some(3), &moving), Some(6));
        assert_eq!(layout.insertion_pivot(None, Some(4), &moving), None);
    }
}
