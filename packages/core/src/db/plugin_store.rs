//! PluginStore - row-level access to containers, plugins and payloads
//!
//! Every function takes the connection to run on, so callers decide whether a
//! statement runs inside the current write transaction or as a standalone read.
//! Multi-id filters are bound as a single JSON array and expanded with
//! `json_each`, which keeps the statements static.

use crate::db::error::DatabaseError;
use crate::models::{Container, ContainerOwner, Node, Scope};
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Connection, Row};
use serde_json::Value;
use std::collections::HashMap;

const NODE_COLUMNS: &str =
    "id, container_id, parent_id, language, type_tag, position, created_at, changed_at";

const CONTAINER_COLUMNS: &str = "id, slot, object_kind, object_id, is_holding_area, created_at";

pub struct PluginStore;

impl PluginStore {
    /// Parse timestamp from database - handles both SQLite and RFC3339 formats
    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }
        Err(DatabaseError::corrupt_row(format!(
            "Unable to parse timestamp '{}' as RFC3339 or SQLite format",
            s
        )))
    }

    fn text(row: &Row, idx: i32, name: &str) -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::corrupt_row(format!("Failed to get {}: {}", name, e)))
    }

    fn optional_text(row: &Row, idx: i32, name: &str) -> Result<Option<String>, DatabaseError> {
        row.get::<Option<String>>(idx)
            .map_err(|e| DatabaseError::corrupt_row(format!("Failed to get {}: {}", name, e)))
    }

    fn integer(row: &Row, idx: i32, name: &str) -> Result<i64, DatabaseError> {
        row.get::<i64>(idx)
            .map_err(|e| DatabaseError::corrupt_row(format!("Failed to get {}: {}", name, e)))
    }

    /// Convert a libsql::Row (selected with `NODE_COLUMNS`) to a Node
    fn row_to_node(row: &Row) -> Result<Node, DatabaseError> {
        let created_at = Self::text(row, 6, "created_at")?;
        let changed_at = Self::text(row, 7, "changed_at")?;

        Ok(Node {
            id: Self::text(row, 0, "id")?,
            container_id: Self::text(row, 1, "container_id")?,
            parent_id: Self::optional_text(row, 2, "parent_id")?,
            language: Self::text(row, 3, "language")?,
            type_tag: Self::text(row, 4, "type_tag")?,
            position: Self::integer(row, 5, "position")?,
            created_at: Self::parse_timestamp(&created_at)?,
            changed_at: Self::parse_timestamp(&changed_at)?,
        })
    }

    fn row_to_container(row: &Row) -> Result<Container, DatabaseError> {
        let object_kind = Self::optional_text(row, 2, "object_kind")?;
        let object_id = Self::optional_text(row, 3, "object_id")?;
        let is_holding_area = Self::integer(row, 4, "is_holding_area")?;
        let created_at = Self::text(row, 5, "created_at")?;

        let owner = match (object_kind, object_id) {
            (Some(kind), Some(id)) => Some(ContainerOwner::new(kind, id)),
            _ => None,
        };

        Ok(Container {
            id: Self::text(row, 0, "id")?,
            slot: Self::text(row, 1, "slot")?,
            owner,
            is_holding_area: is_holding_area != 0,
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }

    async fn collect_nodes(mut rows: libsql::Rows) -> Result<Vec<Node>, DatabaseError> {
        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    fn id_list(ids: &[String]) -> Result<String, DatabaseError> {
        serde_json::to_string(ids)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to encode id list: {}", e)))
    }

    //
    // CONTAINERS
    //

    pub async fn insert_container(
        conn: &Connection,
        container: &Container,
    ) -> Result<(), DatabaseError> {
        let (kind, object_id) = match &container.owner {
            Some(owner) => (Some(owner.object_kind.as_str()), Some(owner.object_id.as_str())),
            None => (None, None),
        };

        conn.execute(
            "INSERT INTO containers (id, slot, object_kind, object_id, is_holding_area, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                container.id.as_str(),
                container.slot.as_str(),
                kind,
                object_id,
                container.is_holding_area as i64,
                container.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to insert container", e))?;

        Ok(())
    }

    pub async fn get_container(
        conn: &Connection,
        id: &str,
    ) -> Result<Option<Container>, DatabaseError> {
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM containers WHERE id = ?", CONTAINER_COLUMNS),
                [id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query container", e))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_container(&row)?)),
            None => Ok(None),
        }
    }

    /// Containers owned by an object, optionally restricted to holding areas
    pub async fn containers_for_owner(
        conn: &Connection,
        owner: &ContainerOwner,
        holding_areas_only: bool,
    ) -> Result<Vec<Container>, DatabaseError> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM containers
                     WHERE object_kind = ? AND object_id = ? AND (? = 0 OR is_holding_area = 1)
                     ORDER BY created_at, id",
                    CONTAINER_COLUMNS
                ),
                (
                    owner.object_kind.as_str(),
                    owner.object_id.as_str(),
                    holding_areas_only as i64,
                ),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query containers", e))?;

        let mut containers = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            containers.push(Self::row_to_container(&row)?);
        }
        Ok(containers)
    }

    //
    // PLUGIN ROWS
    //

    /// Insert a plugin row and its payload
    pub async fn insert_node(
        conn: &Connection,
        node: &Node,
        payload: &Value,
    ) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO plugins (id, container_id, parent_id, language, type_tag, position, created_at, changed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                node.id.as_str(),
                node.container_id.as_str(),
                node.parent_id.as_deref(),
                node.language.as_str(),
                node.type_tag.as_str(),
                node.position,
                node.created_at.to_rfc3339(),
                node.changed_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to insert plugin", e))?;

        Self::write_payload(conn, &node.id, payload).await
    }

    pub async fn get_node(conn: &Connection, id: &str) -> Result<Option<Node>, DatabaseError> {
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM plugins WHERE id = ?", NODE_COLUMNS),
                [id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query plugin", e))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_nodes(conn: &Connection, ids: &[String]) -> Result<Vec<Node>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM plugins WHERE id IN (SELECT value FROM json_each(?))
                     ORDER BY container_id, language, position, id",
                    NODE_COLUMNS
                ),
                [Self::id_list(ids)?],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query plugins", e))?;

        Self::collect_nodes(rows).await
    }

    /// All nodes of a scope in position order
    pub async fn scope_nodes(conn: &Connection, scope: &Scope) -> Result<Vec<Node>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM plugins WHERE container_id = ? AND language = ?
                     ORDER BY position, id",
                    NODE_COLUMNS
                ),
                (scope.container_id.as_str(), scope.language.as_str()),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query scope", e))?;

        Self::collect_nodes(rows).await
    }

    /// Languages that currently hold plugins in a container
    pub async fn container_languages(
        conn: &Connection,
        container_id: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT DISTINCT language FROM plugins WHERE container_id = ? ORDER BY language",
                [container_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query languages", e))?;

        let mut languages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            languages.push(Self::text(&row, 0, "language")?);
        }
        Ok(languages)
    }

    /// A node and all of its descendants, found by parent membership (not by
    /// position range), in position order
    pub async fn subtree_nodes(conn: &Connection, root_id: &str) -> Result<Vec<Node>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "WITH RECURSIVE subtree(id) AS (
                        SELECT id FROM plugins WHERE id = ?1
                        UNION
                        SELECT p.id FROM plugins p JOIN subtree s ON p.parent_id = s.id
                     )
                     SELECT {} FROM plugins WHERE id IN (SELECT id FROM subtree)
                     ORDER BY position, id",
                    NODE_COLUMNS
                ),
                [root_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query subtree", e))?;

        Self::collect_nodes(rows).await
    }

    /// Ids of the children of `parent_id` (roots when `None`) in position order
    pub async fn rank_list(
        conn: &Connection,
        scope: &Scope,
        parent_id: Option<&str>,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT id FROM plugins
                 WHERE container_id = ?1 AND language = ?2
                   AND ((?3 IS NULL AND parent_id IS NULL) OR parent_id = ?3)
                 ORDER BY position, id",
                (
                    scope.container_id.as_str(),
                    scope.language.as_str(),
                    parent_id,
                ),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query rank list", e))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            ids.push(Self::text(&row, 0, "id")?);
        }
        Ok(ids)
    }

    pub async fn count_in_scope(conn: &Connection, scope: &Scope) -> Result<usize, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM plugins WHERE container_id = ? AND language = ?",
                (scope.container_id.as_str(), scope.language.as_str()),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to count scope", e))?;

        let count = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Self::integer(&row, 0, "count")?,
            None => 0,
        };
        Ok(count.max(0) as usize)
    }

    /// Number of plugins per type tag in a scope
    pub async fn count_by_type(
        conn: &Connection,
        scope: &Scope,
    ) -> Result<HashMap<String, usize>, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT type_tag, COUNT(*) FROM plugins
                 WHERE container_id = ? AND language = ? GROUP BY type_tag",
                (scope.container_id.as_str(), scope.language.as_str()),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to count types", e))?;

        let mut counts = HashMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let type_tag = Self::text(&row, 0, "type_tag")?;
            let count = Self::integer(&row, 1, "count")?;
            counts.insert(type_tag, count.max(0) as usize);
        }
        Ok(counts)
    }

    /// Reassign container and language for a set of nodes (cross-scope move cascade)
    pub async fn relocate_nodes(
        conn: &Connection,
        ids: &[String],
        target: &Scope,
    ) -> Result<u64, DatabaseError> {
        conn.execute(
            "UPDATE plugins SET container_id = ?, language = ?, changed_at = ?
             WHERE id IN (SELECT value FROM json_each(?))",
            (
                target.container_id.as_str(),
                target.language.as_str(),
                Utc::now().to_rfc3339(),
                Self::id_list(ids)?,
            ),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to relocate plugins", e))
    }

    pub async fn set_parent(
        conn: &Connection,
        id: &str,
        parent_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        conn.execute(
            "UPDATE plugins SET parent_id = ?, changed_at = ? WHERE id = ?",
            (parent_id, Utc::now().to_rfc3339(), id),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to set parent", e))?;
        Ok(())
    }

    /// Delete a set of plugins and their payloads
    pub async fn delete_nodes(conn: &Connection, ids: &[String]) -> Result<u64, DatabaseError> {
        let id_list = Self::id_list(ids)?;

        conn.execute(
            "DELETE FROM plugin_payloads WHERE node_id IN (SELECT value FROM json_each(?))",
            [id_list.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to delete payloads", e))?;

        conn.execute(
            "DELETE FROM plugins WHERE id IN (SELECT value FROM json_each(?))",
            [id_list.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to delete plugins", e))
    }

    /// Delete every plugin in a scope
    pub async fn delete_scope(conn: &Connection, scope: &Scope) -> Result<u64, DatabaseError> {
        conn.execute(
            "DELETE FROM plugin_payloads WHERE node_id IN (
                SELECT id FROM plugins WHERE container_id = ? AND language = ?
             )",
            (scope.container_id.as_str(), scope.language.as_str()),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to delete scope payloads", e))?;

        conn.execute(
            "DELETE FROM plugins WHERE container_id = ? AND language = ?",
            (scope.container_id.as_str(), scope.language.as_str()),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to delete scope", e))
    }

    //
    // PAYLOADS
    //

    pub async fn get_payload(conn: &Connection, node_id: &str) -> Result<Option<Value>, DatabaseError> {
        let mut rows = conn
            .query("SELECT data FROM plugin_payloads WHERE node_id = ?", [node_id])
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query payload", e))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => {
                let data = Self::text(&row, 0, "data")?;
                let value = serde_json::from_str(&data).map_err(|e| {
                    DatabaseError::corrupt_row(format!("Payload of {} is not JSON: {}", node_id, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Payloads of every plugin in a scope, keyed by node id
    pub async fn scope_payloads(
        conn: &Connection,
        scope: &Scope,
    ) -> Result<HashMap<String, Value>, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT pp.node_id, pp.data FROM plugin_payloads pp
                 JOIN plugins p ON p.id = pp.node_id
                 WHERE p.container_id = ? AND p.language = ?",
                (scope.container_id.as_str(), scope.language.as_str()),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query payloads", e))?;

        let mut payloads = HashMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let node_id = Self::text(&row, 0, "node_id")?;
            let data = Self::text(&row, 1, "data")?;
            let value = serde_json::from_str(&data).map_err(|e| {
                DatabaseError::corrupt_row(format!("Payload of {} is not JSON: {}", node_id, e))
            })?;
            payloads.insert(node_id, value);
        }
        Ok(payloads)
    }

    /// Insert or replace a payload
    pub async fn write_payload(
        conn: &Connection,
        node_id: &str,
        payload: &Value,
    ) -> Result<(), DatabaseError> {
        let data = serde_json::to_string(payload).map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to serialize payload: {}", e))
        })?;

        conn.execute(
            "INSERT INTO plugin_payloads (node_id, data) VALUES (?, ?)
             ON CONFLICT(node_id) DO UPDATE SET data = excluded.data",
            (node_id, data),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to write payload", e))?;
        Ok(())
    }
}
