//! Concurrency Tests
//!
//! Writers on the same scope are serialized by `BEGIN IMMEDIATE`; a writer that
//! cannot get the lock in time fails with a retryable `ScopeCollision` and
//! leaves nothing behind.

#[cfg(test)]
mod concurrency_tests {
    use anyhow::Result;
    use blockspace_core::behaviors::PluginTypeRegistry;
    use blockspace_core::config::EngineConfig;
    use blockspace_core::db::DatabaseService;
    use blockspace_core::models::{NewPlugin, Placement, Scope};
    use blockspace_core::services::{PluginTreeService, TreeError};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn text(body: &str) -> NewPlugin {
        NewPlugin::new("text", json!({ "body": body }))
    }

    #[tokio::test]
    async fn test_locked_scope_reports_collision() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("locked.db");
        let service = PluginTreeService::open(
            &db_path,
            Arc::new(PluginTypeRegistry::with_builtin()),
            EngineConfig {
                busy_timeout_ms: 100,
                ..Default::default()
            },
        )
        .await?;
        let container = service.create_container("content", None).await?;
        let scope = Scope::new(&container.id, "en");
        service.add(text("first"), Placement::append(scope.clone())).await?;

        // A second process holds the write lock
        let other = DatabaseService::new(db_path.clone()).await?;
        let other_conn = other.connect_with_timeout().await?;
        let held = other.begin_immediate(&other_conn).await?;

        let result = service.add(text("blocked"), Placement::at(scope.clone(), 1)).await;
        match result {
            Err(error @ TreeError::ScopeCollision { .. }) => assert!(error.is_retryable()),
            other => panic!("expected ScopeCollision, got {:?}", other),
        }

        // Readers are not blocked by a pending writer
        assert_eq!(service.get_ordered_tree(&scope).await?.len(), 1);

        held.rollback().await?;

        let retried = service.add(text("retried"), Placement::at(scope.clone(), 1)).await?;
        assert_eq!(retried.position, 1);
        assert!(service.check_integrity(&scope).await?.is_intact());
        assert_eq!(service.count_in_scope(&scope).await?, 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_writers_keep_positions_dense() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let service = PluginTreeService::open(
            temp_dir.path().join("parallel.db"),
            Arc::new(PluginTypeRegistry::with_builtin()),
            EngineConfig::default(),
        )
        .await?;
        let container = service.create_container("content", None).await?;
        let scope = Scope::new(&container.id, "en");

        let mut handles = Vec::new();
        for writer in 0..4 {
            let service = service.clone();
            let scope = scope.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..5 {
                    // Alternate between front inserts and appends
                    let placement = if i % 2 == 0 {
                        Placement::at(scope.clone(), 1)
                    } else {
                        Placement::append(scope.clone())
                    };
                    service
                        .add(text(&format!("writer {} item {}", writer, i)), placement)
                        .await?;
                }
                Ok::<_, TreeError>(())
            }));
        }
        for handle in handles {
            handle.await??;
        }

        let report = service.check_integrity(&scope).await?;
        assert!(report.is_intact(), "{:?}", report.violations);
        assert_eq!(report.node_count, 20);
        assert_eq!(service.last_position(&scope).await?, 20);
        Ok(())
    }
}
