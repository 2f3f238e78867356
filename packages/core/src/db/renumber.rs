//! Renumbering: squashing a scope back to the dense sequence `1..=N`
//!
//! The squash keeps the relative order given by the current positions (ties
//! broken by id). Two interchangeable backends exist:
//!
//! - [`WindowRankRenumber`] - one `UPDATE ... FROM` with `ROW_NUMBER() OVER`
//! - [`PortableRenumber`] - read the ordered ids, then point-update the rows
//!   whose position differs from their rank
//!
//! The storage adapter picks the backend ([`Renumberer::for_database`]); the
//! tree engine only ever calls [`Renumberer::recalculate`].

use crate::config::RenumberStrategy;
use crate::db::database::DatabaseService;
use crate::db::error::DatabaseError;
use crate::models::Scope;
use async_trait::async_trait;
use libsql::Connection;
use std::sync::Arc;

/// One way of rewriting a scope's positions to `1..=N`
#[async_trait]
pub trait RenumberBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Renumber the scope, returning the number of rows whose position changed
    async fn renumber(&self, conn: &Connection, scope: &Scope) -> Result<u64, DatabaseError>;
}

/// Bulk rank update (SQLite >= 3.33)
pub struct WindowRankRenumber;

#[async_trait]
impl RenumberBackend for WindowRankRenumber {
    fn name(&self) -> &'static str {
        "window_rank"
    }

    async fn renumber(&self, conn: &Connection, scope: &Scope) -> Result<u64, DatabaseError> {
        conn.execute(
            "UPDATE plugins SET position = ranked.new_position
             FROM (
                SELECT id, ROW_NUMBER() OVER (ORDER BY position, id) AS new_position
                FROM plugins
                WHERE container_id = ?1 AND language = ?2
             ) AS ranked
             WHERE plugins.id = ranked.id AND plugins.position <> ranked.new_position",
            (scope.container_id.as_str(), scope.language.as_str()),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to renumber scope", e))
    }
}

/// Read-then-update fallback for engines without `UPDATE ... FROM`
pub struct PortableRenumber;

#[async_trait]
impl RenumberBackend for PortableRenumber {
    fn name(&self) -> &'static str {
        "portable"
    }

    async fn renumber(&self, conn: &Connection, scope: &Scope) -> Result<u64, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT id, position FROM plugins
                 WHERE container_id = ? AND language = ?
                 ORDER BY position, id",
                (scope.container_id.as_str(), scope.language.as_str()),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to read scope order", e))?;

        let mut ordered = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let id = row
                .get::<String>(0)
                .map_err(|e| DatabaseError::corrupt_row(format!("id: {}", e)))?;
            let position = row
                .get::<i64>(1)
                .map_err(|e| DatabaseError::corrupt_row(format!("position: {}", e)))?;
            ordered.push((id, position));
        }

        let mut changed = 0;
        for (rank, (id, position)) in ordered.iter().enumerate() {
            let rank = rank as i64 + 1;
            if *position == rank {
                continue;
            }
            changed += conn
                .execute(
                    "UPDATE plugins SET position = ? WHERE id = ?",
                    (rank, id.as_str()),
                )
                .await
                .map_err(|e| DatabaseError::from_libsql("Failed to renumber plugin", e))?;
        }
        Ok(changed)
    }
}

/// Squash entry point used by the tree engine
#[derive(Clone)]
pub struct Renumberer {
    backend: Arc<dyn RenumberBackend>,
}

impl Renumberer {
    pub fn new(backend: Arc<dyn RenumberBackend>) -> Self {
        Self { backend }
    }

    /// Select the backend for a strategy, probing the database for `Auto`
    pub async fn for_database(
        db: &DatabaseService,
        strategy: RenumberStrategy,
    ) -> Result<Self, DatabaseError> {
        let backend: Arc<dyn RenumberBackend> = match strategy {
            RenumberStrategy::WindowRank => Arc::new(WindowRankRenumber),
            RenumberStrategy::Portable => Arc::new(PortableRenumber),
            RenumberStrategy::Auto => {
                if db.supports_window_rank().await? {
                    Arc::new(WindowRankRenumber)
                } else {
                    Arc::new(PortableRenumber)
                }
            }
        };
        tracing::info!("Using {} renumber backend", backend.name());
        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Reassign `1..=N` to the scope, preserving relative order. Idempotent.
    pub async fn recalculate(
        &self,
        conn: &Connection,
        scope: &Scope,
    ) -> Result<u64, DatabaseError> {
        let changed = self.backend.renumber(conn, scope).await?;
        tracing::debug!(%scope, changed, backend = self.backend.name(), "squashed scope");
        Ok(changed)
    }
}
