//! Plugin Tree Service - transactional entry point
//!
//! This module provides the public API of the engine:
//!
//! - Mutations (add, move, delete, clear, copy, apply_order, clipboard)
//! - Container management (create, lookup, holding areas)
//! - Read operations (ordered tree, rank lists, counts, integrity)
//!
//! # Transactions
//!
//! Every mutation runs as one `BEGIN IMMEDIATE` transaction: all shifts,
//! payload writes and the final squash commit together or not at all. While
//! the transaction is open no other writer can touch any scope, so readers
//! never observe a half-shifted scope. A writer that cannot get the lock within
//! the configured busy timeout fails with `TreeError::ScopeCollision`, and the
//! caller may retry the whole operation.
//!
//! # Observers
//!
//! `with_observer()` returns a handle whose mutations report a
//! [`MutationEvent`] to the observer, once before the commit (able to veto) and
//! once after it.

use crate::behaviors::PluginTypeRegistry;
use crate::config::EngineConfig;
use crate::db::{DatabaseError, DatabaseService, PluginStore, PositionAllocator, Renumberer};
use crate::models::{BoundPlugin, Container, ContainerOwner, NewPlugin, Node, Placement, Scope};
use crate::services::clipboard::{ClipboardCoordinator, OrderEntry};
use crate::services::error::TreeError;
use crate::services::integrity::{self, IntegrityReport};
use crate::services::observer::{MutationEvent, MutationKind, MutationObserver, ScopeSnapshot};
use crate::services::resolver::BoundPluginResolver;
use crate::services::subtree_copier::{CopiedPlugin, SubtreeCopier};
use crate::services::tree_mutator::TreeMutator;
use chrono::Utc;
use libsql::{Connection, Transaction};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Transactional facade over the tree components
///
/// Cheap to clone; clones share the database and registry.
///
/// # Examples
///
/// ```no_run
/// # use blockspace_core::behaviors::PluginTypeRegistry;
/// # use blockspace_core::config::EngineConfig;
/// # use blockspace_core::models::{NewPlugin, Placement, Scope};
/// # use blockspace_core::services::PluginTreeService;
/// # use serde_json::json;
/// # use std::sync::Arc;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = PluginTreeService::open(
///     "./data/blockspace.db",
///     Arc::new(PluginTypeRegistry::with_builtin()),
///     EngineConfig::default(),
/// )
/// .await?;
///
/// let container = service.create_container("content", None).await?;
/// let scope = Scope::new(&container.id, "en");
/// service
///     .add(
///         NewPlugin::new("text", json!({ "body": "Hello" })),
///         Placement::append(scope.clone()),
///     )
///     .await?;
///
/// let tree = service.get_ordered_tree(&scope).await?;
/// assert_eq!(tree.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PluginTreeService {
    db: Arc<DatabaseService>,
    registry: Arc<PluginTypeRegistry>,
    config: Arc<EngineConfig>,
    mutator: TreeMutator,
    copier: SubtreeCopier,
    resolver: BoundPluginResolver,
    clipboard: ClipboardCoordinator,

    /// Receives a `MutationEvent` for every mutation made through this handle
    observer: Option<Arc<dyn MutationObserver>>,

    /// Echoed in every event; set together with the observer
    correlation_id: Option<String>,
}

impl PluginTreeService {
    /// Open (or create) a database file and build a service on top of it
    pub async fn open(
        db_path: impl Into<PathBuf>,
        registry: Arc<PluginTypeRegistry>,
        config: EngineConfig,
    ) -> Result<Self, TreeError> {
        let db = DatabaseService::with_busy_timeout(db_path.into(), config.busy_timeout_ms).await?;
        Self::new(Arc::new(db), registry, config).await
    }

    /// Build a service over an existing database, picking the renumber
    /// backend from `config.renumber_strategy`
    pub async fn new(
        db: Arc<DatabaseService>,
        registry: Arc<PluginTypeRegistry>,
        config: EngineConfig,
    ) -> Result<Self, TreeError> {
        let renumberer = Renumberer::for_database(&db, config.renumber_strategy).await?;
        Ok(Self::with_renumberer(db, registry, config, renumberer))
    }

    pub fn with_renumberer(
        db: Arc<DatabaseService>,
        registry: Arc<PluginTypeRegistry>,
        config: EngineConfig,
        renumberer: Renumberer,
    ) -> Self {
        let config = Arc::new(config);
        let mutator = TreeMutator::new(registry.clone(), config.clone(), renumberer.clone());
        let copier = SubtreeCopier::new(registry.clone(), config.clone(), renumberer);
        let clipboard = ClipboardCoordinator::new(
            mutator.clone(),
            copier.clone(),
            config.holding_area_slot.clone(),
        );

        Self {
            db,
            resolver: BoundPluginResolver::new(registry.clone()),
            registry,
            config,
            mutator,
            copier,
            clipboard,
            observer: None,
            correlation_id: None,
        }
    }

    /// Clone of this service that reports every mutation to `observer`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use blockspace_core::services::{MutationEvent, MutationObserver, PluginTreeService};
    /// # use std::sync::Arc;
    /// struct AuditLog;
    ///
    /// impl MutationObserver for AuditLog {
    ///     fn after_commit(&self, event: &MutationEvent) {
    ///         println!("{} {:?}", event.event_type(), event.correlation_id);
    ///     }
    /// }
    ///
    /// # fn scoped(service: &PluginTreeService) {
    /// let audited = service.with_observer(Arc::new(AuditLog), "request-42");
    /// # }
    /// ```
    pub fn with_observer(
        &self,
        observer: Arc<dyn MutationObserver>,
        correlation_id: impl Into<String>,
    ) -> Self {
        let mut cloned = self.clone();
        cloned.observer = Some(observer);
        cloned.correlation_id = Some(correlation_id.into());
        cloned
    }

    pub fn db(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    pub fn registry(&self) -> &Arc<PluginTypeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn renumber_backend(&self) -> &'static str {
        self.mutator.renumberer().backend_name()
    }

    //
    // TRANSACTIONS
    //

    async fn begin_write(&self) -> Result<(Connection, Transaction), TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        let tx = self.db.begin_immediate(&conn).await?;
        Ok((conn, tx))
    }

    /// Commit on success, roll back on failure or observer veto
    async fn finish<T>(
        &self,
        tx: Transaction,
        kind: MutationKind,
        outcome: Result<(T, Vec<Scope>), TreeError>,
    ) -> Result<T, TreeError> {
        let (value, scopes) = match outcome {
            Ok(done) => done,
            Err(error) => {
                rollback(tx).await;
                return Err(error);
            }
        };

        let event = match &self.observer {
            Some(observer) => {
                let event = match self.snapshot(&tx, kind, &scopes).await {
                    Ok(event) => event,
                    Err(error) => {
                        rollback(tx).await;
                        return Err(error);
                    }
                };
                if let Err(reason) = observer.before_commit(&event) {
                    rollback(tx).await;
                    return Err(TreeError::ObserverRejected {
                        reason: reason.to_string(),
                    });
                }
                Some(event)
            }
            None => None,
        };

        tx.commit()
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to commit transaction", e))?;

        tracing::info!(
            "Committed plugin:{} across {} scope(s){}",
            kind.as_str(),
            scopes.len(),
            self.correlation_id
                .as_deref()
                .map(|id| format!(" [{}]", id))
                .unwrap_or_default()
        );

        if let (Some(observer), Some(event)) = (&self.observer, &event) {
            observer.after_commit(event);
        }

        Ok(value)
    }

    async fn snapshot(
        &self,
        conn: &Connection,
        kind: MutationKind,
        scopes: &[Scope],
    ) -> Result<MutationEvent, TreeError> {
        let mut seen = HashSet::new();
        let mut snapshots = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if !seen.insert(scope) {
                continue;
            }
            let ordered_ids = PluginStore::scope_nodes(conn, scope)
                .await?
                .into_iter()
                .map(|n| n.id)
                .collect();
            snapshots.push(ScopeSnapshot {
                scope: scope.clone(),
                ordered_ids,
            });
        }

        Ok(MutationEvent {
            kind,
            correlation_id: self.correlation_id.clone(),
            scopes: snapshots,
        })
    }

    //
    // CONTAINERS
    //

    pub async fn create_container(
        &self,
        slot: impl Into<String>,
        owner: Option<ContainerOwner>,
    ) -> Result<Container, TreeError> {
        let container = Container {
            id: Uuid::new_v4().to_string(),
            slot: slot.into(),
            owner,
            is_holding_area: false,
            created_at: Utc::now(),
        };

        let conn = self.db.connect_with_timeout().await?;
        PluginStore::insert_container(&conn, &container).await?;
        tracing::debug!("Created container {} ({})", container.id, container.slot);
        Ok(container)
    }

    pub async fn get_container(&self, id: &str) -> Result<Option<Container>, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(PluginStore::get_container(&conn, id).await?)
    }

    pub async fn containers_for_owner(
        &self,
        object_kind: &str,
        object_id: &str,
    ) -> Result<Vec<Container>, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        let owner = ContainerOwner::new(object_kind, object_id);
        Ok(PluginStore::containers_for_owner(&conn, &owner, false).await?)
    }

    //
    // MUTATIONS
    //

    pub async fn add(&self, plugin: NewPlugin, placement: Placement) -> Result<Node, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self.mutator.add(&tx, plugin, &placement).await.map(|node| {
            let scopes = vec![node.scope()];
            (node, scopes)
        });
        self.finish(tx, MutationKind::Add, outcome).await
    }

    /// Move a plugin (and its descendants) to `placement`
    pub async fn move_plugin(&self, id: &str, placement: Placement) -> Result<Node, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .mutator
            .move_plugin(&tx, id, &placement)
            .await
            .map(|moved| {
                let scopes = moved.touched_scopes();
                (moved.node, scopes)
            });
        self.finish(tx, MutationKind::Move, outcome).await
    }

    /// Delete a plugin and its descendants
    pub async fn delete(&self, id: &str) -> Result<(), TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .mutator
            .delete(&tx, id)
            .await
            .map(|deleted| ((), vec![deleted.scope()]));
        self.finish(tx, MutationKind::Delete, outcome).await
    }

    /// Delete every plugin of a scope, returning how many were removed
    pub async fn clear(&self, scope: &Scope) -> Result<u64, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .mutator
            .clear(&tx, scope)
            .await
            .map(|deleted| (deleted, vec![scope.clone()]));
        self.finish(tx, MutationKind::Clear, outcome).await
    }

    /// Clear every language scope of a container
    pub async fn clear_container(&self, container_id: &str) -> Result<(), TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .mutator
            .clear_container(&tx, container_id)
            .await
            .map(|cleared| ((), cleared));
        self.finish(tx, MutationKind::Clear, outcome).await
    }

    /// Copy the subtrees rooted at `node_ids` to `placement`
    pub async fn copy_subtree(
        &self,
        node_ids: &[String],
        placement: Placement,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .copier
            .copy_subtree(&tx, node_ids, &placement)
            .await
            .map(|copies| (copies, vec![placement.scope.clone()]));
        self.finish(tx, MutationKind::Copy, outcome).await
    }

    /// Append a copy of one scope's plugins to another scope
    pub async fn copy_scope(
        &self,
        source: &Scope,
        target: &Scope,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .copier
            .copy_scope(&tx, source, target)
            .await
            .map(|copies| (copies, vec![target.clone()]));
        self.finish(tx, MutationKind::Copy, outcome).await
    }

    /// Append a copy of every language of one container to another
    pub async fn copy_container(
        &self,
        source_container_id: &str,
        target_container_id: &str,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .copier
            .copy_container(&tx, source_container_id, target_container_id)
            .await
            .map(|copies| {
                let scopes = copies.iter().map(|c| c.copy.scope()).collect();
                (copies, scopes)
            });
        self.finish(tx, MutationKind::Copy, outcome).await
    }

    /// Reorder the children of `parent_id` (roots when `None`) to `ordered_ids`
    pub async fn apply_order(
        &self,
        scope: &Scope,
        parent_id: Option<&str>,
        ordered_ids: &[String],
    ) -> Result<(), TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .mutator
            .apply_order(&tx, scope, parent_id, ordered_ids)
            .await
            .map(|_| ((), vec![scope.clone()]));
        self.finish(tx, MutationKind::ApplyOrder, outcome).await
    }

    /// Squash a scope back to `1..=N`, returning the number of rows changed
    pub async fn repair_positions(&self, scope: &Scope) -> Result<u64, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .mutator
            .renumberer()
            .recalculate(&tx, scope)
            .await
            .map(|changed| (changed, vec![scope.clone()]))
            .map_err(TreeError::from);
        self.finish(tx, MutationKind::Repair, outcome).await
    }

    //
    // CLIPBOARD
    //

    /// Holding area of an owner, created on first use
    pub async fn holding_area(&self, owner_id: &str) -> Result<Container, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .clipboard
            .holding_area(&tx, owner_id)
            .await
            .map(|container| (container, Vec::new()));
        self.finish(tx, MutationKind::Add, outcome).await
    }

    /// Move a plugin into a holding area, discarding what it held before
    pub async fn cut(&self, id: &str, holding_id: &str) -> Result<Node, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .clipboard
            .cut(&tx, id, holding_id)
            .await
            .map(|(moved, mut cleared)| {
                cleared.extend(moved.touched_scopes());
                (moved.node, cleared)
            });
        self.finish(tx, MutationKind::Cut, outcome).await
    }

    /// Copy a plugin into a holding area, discarding what it held before
    pub async fn copy_to_holding(
        &self,
        id: &str,
        holding_id: &str,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .clipboard
            .copy_to_holding(&tx, id, holding_id)
            .await
            .map(|(copies, mut cleared)| {
                cleared.extend(copies.iter().map(|c| c.copy.scope()));
                (copies, cleared)
            });
        self.finish(tx, MutationKind::Copy, outcome).await
    }

    /// Move the held plugin out of its holding area
    pub async fn paste_move(&self, held_id: &str, placement: Placement) -> Result<Node, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .clipboard
            .paste_move(&tx, held_id, &placement)
            .await
            .map(|moved| {
                let scopes = moved.touched_scopes();
                (moved.node, scopes)
            });
        self.finish(tx, MutationKind::PasteMove, outcome).await
    }

    /// Paste a copy of the held plugin, optionally rearranging the siblings
    /// at the target level to `order`
    pub async fn paste_copy(
        &self,
        held_id: &str,
        placement: Placement,
        order: Option<&[OrderEntry]>,
    ) -> Result<Vec<CopiedPlugin>, TreeError> {
        let (_conn, tx) = self.begin_write().await?;
        let outcome = self
            .clipboard
            .paste_copy(&tx, held_id, &placement, order)
            .await
            .map(|copies| (copies, vec![placement.scope.clone()]));
        self.finish(tx, MutationKind::PasteCopy, outcome).await
    }

    //
    // READS
    //

    /// Forest of bound plugins for a scope, read from one snapshot
    pub async fn get_ordered_tree(&self, scope: &Scope) -> Result<Vec<BoundPlugin>, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to begin read", e))?;
        let tree = self.resolver.resolve_scope(&tx, scope).await;
        rollback(tx).await;
        tree
    }

    /// One bound plugin with its descendants
    pub async fn get_bound_plugin(&self, id: &str) -> Result<Option<BoundPlugin>, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        self.resolver.resolve_subtree(&conn, id).await
    }

    /// Ordered ids of the children of `parent_id`, or of the roots
    pub async fn get_rank_list(
        &self,
        scope: &Scope,
        parent_id: Option<&str>,
    ) -> Result<Vec<String>, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(PluginStore::rank_list(&conn, scope, parent_id).await?)
    }

    pub async fn get_node(&self, id: &str) -> Result<Option<Node>, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(PluginStore::get_node(&conn, id).await?)
    }

    /// Ids of a plugin and all of its descendants, in position order
    pub async fn get_subtree_ids(&self, id: &str) -> Result<Vec<String>, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        let nodes = PluginStore::subtree_nodes(&conn, id).await?;
        if nodes.is_empty() {
            return Err(TreeError::node_not_found(id));
        }
        Ok(nodes.into_iter().map(|n| n.id).collect())
    }

    pub async fn count_in_scope(&self, scope: &Scope) -> Result<usize, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(PluginStore::count_in_scope(&conn, scope).await?)
    }

    pub async fn last_position(&self, scope: &Scope) -> Result<i64, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(PositionAllocator::last_position(&conn, scope).await?)
    }

    /// Pre-check whether plugins of the given types fit into a scope
    pub async fn check_capacity(&self, scope: &Scope, type_tags: &[&str]) -> Result<(), TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        let incoming: Vec<String> = type_tags.iter().map(|t| t.to_string()).collect();
        self.mutator.check_capacity(&conn, scope, &incoming).await
    }

    pub async fn check_integrity(&self, scope: &Scope) -> Result<IntegrityReport, TreeError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(integrity::check_integrity(&conn, scope).await?)
    }
}

async fn rollback(tx: Transaction) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Failed to roll back transaction: {}", e);
    }
}
