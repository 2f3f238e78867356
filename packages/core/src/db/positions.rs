//! Position allocation: opening gaps in a scope's position sequence
//!
//! Every shift leaves the scope transiently non-dense. Callers must follow it
//! with a squash (`Renumberer::recalculate`) inside the same transaction.

use crate::db::error::DatabaseError;
use crate::models::Scope;
use libsql::Connection;

pub struct PositionAllocator;

impl PositionAllocator {
    /// Highest position in the scope (0 when the scope is empty)
    pub async fn last_position(
        conn: &Connection,
        scope: &Scope,
    ) -> Result<i64, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT COALESCE(MAX(position), 0) FROM plugins WHERE container_id = ? AND language = ?",
                (scope.container_id.as_str(), scope.language.as_str()),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to read last position", e))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::corrupt_row(format!("last position: {}", e))),
            None => Ok(0),
        }
    }

    /// Add `offset` to every position `>= start` in the scope
    ///
    /// A positive offset never creates duplicates. A negative one is only safe
    /// when the `-offset` positions right before `start` are free.
    pub async fn shift(
        conn: &Connection,
        scope: &Scope,
        start: i64,
        offset: i64,
    ) -> Result<u64, DatabaseError> {
        let shifted = conn
            .execute(
                "UPDATE plugins SET position = position + ?
                 WHERE container_id = ? AND language = ? AND position >= ?",
                (
                    offset,
                    scope.container_id.as_str(),
                    scope.language.as_str(),
                    start,
                ),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to shift positions", e))?;

        tracing::debug!(%scope, start, offset, shifted, "shifted scope tail");
        Ok(shifted)
    }

    /// Like `shift`, but leaves the listed nodes where they are
    pub async fn shift_except(
        conn: &Connection,
        scope: &Scope,
        start: i64,
        offset: i64,
        except: &[String],
    ) -> Result<u64, DatabaseError> {
        let except = serde_json::to_string(except)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to encode id list: {}", e)))?;

        let shifted = conn
            .execute(
                "UPDATE plugins SET position = position + ?
                 WHERE container_id = ? AND language = ? AND position >= ?
                   AND id NOT IN (SELECT value FROM json_each(?))",
                (
                    offset,
                    scope.container_id.as_str(),
                    scope.language.as_str(),
                    start,
                    except,
                ),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to shift positions", e))?;

        tracing::debug!(%scope, start, offset, shifted, "shifted scope tail around moving block");
        Ok(shifted)
    }

    /// Add `offset` to the positions of an explicit set of nodes
    pub async fn shift_nodes(
        conn: &Connection,
        ids: &[String],
        offset: i64,
    ) -> Result<u64, DatabaseError> {
        if ids.is_empty() || offset == 0 {
            return Ok(0);
        }

        let id_list = serde_json::to_string(ids)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to encode id list: {}", e)))?;

        let shifted = conn
            .execute(
                "UPDATE plugins SET position = position + ?
                 WHERE id IN (SELECT value FROM json_each(?))",
                (offset, id_list),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to shift block", e))?;

        tracing::debug!(offset, shifted, "shifted block");
        Ok(shifted)
    }
}
