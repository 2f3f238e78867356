//! Tree Services
//!
//! This module contains the ordered-tree logic on top of the database layer:
//!
//! - `TreeMutator` - add, move, delete, clear and reorder inside scopes
//! - `SubtreeCopier` - deep copies of subtrees, scopes and containers
//! - `BoundPluginResolver` - ordered forests with behaviors attached
//! - `ClipboardCoordinator` - cut / copy / paste through holding areas
//! - `PluginTreeService` - transactional facade with mutation observers
//!
//! The components take the connection of an open transaction; only
//! `PluginTreeService` begins and commits transactions.

mod constraints;
pub mod clipboard;
pub mod error;
pub mod integrity;
mod layout;
pub mod observer;
pub mod plugin_tree_service;
pub mod resolver;
pub mod subtree_copier;
pub mod tree_mutator;

pub use clipboard::{ClipboardCoordinator, OrderEntry, HOLDING_AREA_OWNER_KIND};
pub use error::TreeError;
pub use integrity::{check_integrity, IntegrityReport, IntegrityViolation};
pub use observer::{MutationEvent, MutationKind, MutationObserver, ScopeSnapshot};
pub use plugin_tree_service::PluginTreeService;
pub use resolver::BoundPluginResolver;
pub use subtree_copier::{CopiedPlugin, SubtreeCopier};
pub use tree_mutator::{MoveOutcome, TreeMutator};
