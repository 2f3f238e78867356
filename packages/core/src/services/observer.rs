//! Mutation observer hooks
//!
//! Observers are attached explicitly to a service handle with
//! `PluginTreeService::with_observer`; there is no global broadcast. Each
//! completed mutation produces one [`MutationEvent`] carrying the resulting
//! order of every scope the operation touched.
//!
//! `before_commit` runs inside the write transaction, after the final squash,
//! and can veto the commit. `after_commit` runs once the data is durable.

use crate::models::Scope;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Add,
    Move,
    Delete,
    Clear,
    Copy,
    Cut,
    PasteMove,
    PasteCopy,
    ApplyOrder,
    Repair,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::Clear => "clear",
            Self::Copy => "copy",
            Self::Cut => "cut",
            Self::PasteMove => "paste_move",
            Self::PasteCopy => "paste_copy",
            Self::ApplyOrder => "apply_order",
            Self::Repair => "repair",
        }
    }
}

/// Resulting order of one scope after a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSnapshot {
    pub scope: Scope,
    pub ordered_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    pub kind: MutationKind,

    /// Caller-supplied token, echoed back so audit entries can be correlated
    pub correlation_id: Option<String>,

    pub scopes: Vec<ScopeSnapshot>,
}

impl MutationEvent {
    /// Event name for downstream consumers, e.g. `plugin:move`
    pub fn event_type(&self) -> String {
        format!("plugin:{}", self.kind.as_str())
    }

    pub fn snapshot(&self, scope: &Scope) -> Option<&ScopeSnapshot> {
        self.scopes.iter().find(|s| &s.scope == scope)
    }
}

pub trait MutationObserver: Send + Sync {
    /// Returning an error rolls the mutation back
    fn before_commit(&self, _event: &MutationEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_commit(&self, _event: &MutationEvent) {}
}
