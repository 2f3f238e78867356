//! Database Connection Management
//!
//! This module provides the core database connection and initialization
//! functionality using libsql for Blockspace's plugin tree storage.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: Write-Ahead Logging so readers never wait on a writer
//! - **Foreign keys**: Enabled on every connection (payload rows follow their plugin)
//! - **Immediate transactions**: every mutation takes the write lock up front
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions.** It configures the
//! busy timeout and foreign keys on the new connection; a plain `connect()`
//! handle has neither.
//!
//! ```no_run
//! # use blockspace_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/blocks.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! let tx = db_service.begin_immediate(&conn).await?;
//! // ... shifts, inserts, squash ...
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::DatabaseError;
use libsql::{Builder, Connection, Database, Transaction, TransactionBehavior};
use std::path::PathBuf;
use std::sync::Arc;

/// Default busy timeout applied to new connections (milliseconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// First SQLite release with `UPDATE ... FROM`
const UPDATE_FROM_MIN_VERSION: (u32, u32) = (3, 33);

/// Database service for managing libsql connections and schema
///
/// # Examples
///
/// ```no_run
/// use blockspace_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_service = DatabaseService::new(PathBuf::from("/path/to/blocks.db")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,
}

impl DatabaseService {
    /// Create a new DatabaseService with the default busy timeout
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Create a DatabaseService whose connections wait `busy_timeout_ms` for the
    /// write lock before failing with `DatabaseError::Busy`
    pub async fn with_busy_timeout(
        db_path: PathBuf,
        busy_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
        };

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    pub fn busy_timeout_ms(&self) -> u64 {
        self.busy_timeout_ms
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// # Schema
    ///
    /// - `containers`: named slots, optionally owned by an external object
    /// - `plugins`: tree rows with a dense position per (container, language)
    /// - `plugin_payloads`: 1:1 JSON payload per plugin
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS containers (
                id TEXT PRIMARY KEY,
                slot TEXT NOT NULL,
                object_kind TEXT,
                object_id TEXT,
                is_holding_area INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create containers table: {}", e))
        })?;

        // No UNIQUE constraint on position: SQLite checks uniqueness row by row,
        // so a bulk shift would collide with its own not-yet-updated rows.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugins (
                id TEXT PRIMARY KEY,
                container_id TEXT NOT NULL,
                parent_id TEXT,
                language TEXT NOT NULL,
                type_tag TEXT NOT NULL,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                changed_at TEXT NOT NULL,
                FOREIGN KEY (container_id) REFERENCES containers(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES plugins(id) ON DELETE CASCADE
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create plugins table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugin_payloads (
                node_id TEXT PRIMARY KEY,
                data TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (node_id) REFERENCES plugins(id) ON DELETE CASCADE
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create plugin_payloads table: {}", e))
        })?;

        self.create_core_indexes(&conn).await?;

        // Flush the fresh schema so other connections see it immediately
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    async fn create_core_indexes(&self, conn: &Connection) -> Result<(), DatabaseError> {
        let indexes = [
            (
                "idx_plugins_scope_position",
                "CREATE INDEX IF NOT EXISTS idx_plugins_scope_position
                 ON plugins(container_id, language, position)",
            ),
            (
                "idx_plugins_parent",
                "CREATE INDEX IF NOT EXISTS idx_plugins_parent ON plugins(parent_id)",
            ),
            (
                "idx_plugins_type",
                "CREATE INDEX IF NOT EXISTS idx_plugins_type ON plugins(container_id, language, type_tag)",
            ),
            (
                "idx_containers_owner",
                "CREATE INDEX IF NOT EXISTS idx_containers_owner ON containers(object_kind, object_id)",
            ),
        ];

        for (name, sql) in indexes {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to create index '{}': {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Get a raw connection handle
    ///
    /// **⚠️ Prefer `connect_with_timeout()`**: this handle has no busy timeout
    /// and foreign keys disabled.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get a connection with busy timeout and foreign keys configured
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms),
        )
        .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }

    /// Start a write transaction holding the database write lock
    ///
    /// `BEGIN IMMEDIATE` acquires the reserved lock before the first statement,
    /// so no other writer can interleave with the shift/squash sequence. When
    /// the lock cannot be taken within the busy timeout this returns
    /// `DatabaseError::Busy`.
    pub async fn begin_immediate(&self, conn: &Connection) -> Result<Transaction, DatabaseError> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to begin transaction", e))
    }

    /// SQLite library version reported by the engine (e.g. "3.45.1")
    pub async fn sqlite_version(&self) -> Result<String, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query("SELECT sqlite_version()", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to read version: {}", e)))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
            .ok_or_else(|| DatabaseError::sql_execution("sqlite_version() returned no row"))?;

        row.get::<String>(0)
            .map_err(|e| DatabaseError::corrupt_row(format!("sqlite_version: {}", e)))
    }

    /// Whether the engine supports the window-function bulk renumber
    pub async fn supports_window_rank(&self) -> Result<bool, DatabaseError> {
        let version = self.sqlite_version().await?;
        Ok(version_at_least(&version, UPDATE_FROM_MIN_VERSION))
    }
}

fn version_at_least(version: &str, (major, minor): (u32, u32)) -> bool {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let found_major = parts.next().unwrap_or(0);
    let found_minor = parts.next().unwrap_or(0);
    (found_major, found_minor) >= (major, minor)
}
