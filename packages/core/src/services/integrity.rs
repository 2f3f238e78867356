//! Scope integrity checks
//!
//! Read-only verification of the at-rest invariants of one scope:
//!
//! - positions are exactly `1..=N`
//! - every parent lives in the same container and language
//! - the parent graph has no cycles
//! - every subtree occupies the contiguous block right after its root
//!
//! Used by the dev tools and by the test-suite after every mutation.

use crate::db::{DatabaseError, PluginStore};
use crate::models::{Node, Scope};
use libsql::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityViolation {
    DuplicatePosition {
        position: i64,
        ids: Vec<String>,
    },
    PositionOutOfRange {
        id: String,
        position: i64,
    },
    MissingParent {
        id: String,
        parent_id: String,
    },
    ForeignParent {
        id: String,
        parent_id: String,
        parent_scope: Scope,
    },
    Cycle {
        id: String,
    },
    /// The plugin's descendants do not directly follow it
    SplitSubtree {
        id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub scope: Scope,
    pub node_count: usize,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.violations.is_empty()
    }
}

pub async fn check_integrity(
    conn: &Connection,
    scope: &Scope,
) -> Result<IntegrityReport, DatabaseError> {
    let nodes = PluginStore::scope_nodes(conn, scope).await?;
    let local: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    let mut outside: HashMap<String, Option<Scope>> = HashMap::new();
    for parent_id in nodes.iter().filter_map(|n| n.parent_id.as_deref()) {
        if local.contains(parent_id) || outside.contains_key(parent_id) {
            continue;
        }
        let parent = PluginStore::get_node(conn, parent_id).await?;
        outside.insert(parent_id.to_string(), parent.map(|p| p.scope()));
    }

    Ok(inspect(scope, &nodes, &outside))
}

/// Pure part of the check; `outside` maps parent ids not in `nodes` to their
/// scope (`None` when the parent row does not exist)
pub(crate) fn inspect(
    scope: &Scope,
    nodes: &[Node],
    outside: &HashMap<String, Option<Scope>>,
) -> IntegrityReport {
    let mut violations = Vec::new();
    let count = nodes.len() as i64;

    let mut by_position: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
    for node in nodes {
        by_position.entry(node.position).or_default().push(&node.id);
        if node.position < 1 || node.position > count {
            violations.push(IntegrityViolation::PositionOutOfRange {
                id: node.id.clone(),
                position: node.position,
            });
        }
    }
    for (position, ids) in &by_position {
        if ids.len() > 1 {
            violations.push(IntegrityViolation::DuplicatePosition {
                position: *position,
                ids: ids.iter().map(|s| s.to_string()).collect(),
            });
        }
    }

    let parents: HashMap<&str, Option<&str>> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.parent_id.as_deref()))
        .collect();

    for node in nodes {
        let Some(parent_id) = node.parent_id.as_deref() else {
            continue;
        };
        if parents.contains_key(parent_id) {
            continue;
        }
        match outside.get(parent_id) {
            Some(Some(parent_scope)) => violations.push(IntegrityViolation::ForeignParent {
                id: node.id.clone(),
                parent_id: parent_id.to_string(),
                parent_scope: parent_scope.clone(),
            }),
            _ => violations.push(IntegrityViolation::MissingParent {
                id: node.id.clone(),
                parent_id: parent_id.to_string(),
            }),
        }
    }

    violations.extend(find_cycles(nodes, &parents));
    violations.extend(find_split_subtrees(nodes, &parents));

    IntegrityReport {
        scope: scope.clone(),
        node_count: nodes.len(),
        violations,
    }
}

fn find_cycles(nodes: &[Node], parents: &HashMap<&str, Option<&str>>) -> Vec<IntegrityViolation> {
    // 1 = on the current walk, 2 = known to reach a root
    let mut state: HashMap<&str, u8> = HashMap::new();
    let mut cycles = Vec::new();

    for node in nodes {
        let mut walk = Vec::new();
        let mut current = Some(node.id.as_str());

        while let Some(id) = current {
            match state.get(id) {
                Some(2) => break,
                Some(_) => {
                    cycles.push(IntegrityViolation::Cycle { id: id.to_string() });
                    break;
                }
                None => {}
            }
            state.insert(id, 1);
            walk.push(id);
            current = parents.get(id).copied().flatten();
        }

        for id in walk {
            state.insert(id, 2);
        }
    }

    cycles
}

fn find_split_subtrees(
    nodes: &[Node],
    parents: &HashMap<&str, Option<&str>>,
) -> Vec<IntegrityViolation> {
    let mut ordered: Vec<&Node> = nodes.iter().collect();
    ordered.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));

    // Walking in position order, the chain of ancestors of the current node
    // must be exactly the open blocks on the stack.
    let mut open: Vec<&str> = Vec::new();
    let mut reported = HashSet::new();
    let mut split = Vec::new();

    for node in ordered {
        match node.parent_id.as_deref().filter(|p| parents.contains_key(p)) {
            None => open.clear(),
            Some(parent_id) => {
                while open.last().is_some_and(|top| *top != parent_id) {
                    open.pop();
                }
                if open.is_empty() && reported.insert(parent_id) {
                    split.push(IntegrityViolation::SplitSubtree {
                        id: parent_id.to_string(),
                    });
                }
            }
        }
        open.push(&node.id);
    }

    split
}
