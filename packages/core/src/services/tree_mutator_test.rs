//! Tests for TreeMutator position handling
//!
//! Every test runs against a real libsql file database and checks the scope
//! with `check_integrity` after each mutation.

#[cfg(test)]
mod tests {
    use crate::behaviors::PluginTypeRegistry;
    use crate::config::EngineConfig;
    use crate::db::{DatabaseService, PluginStore, PortableRenumber, Renumberer};
    use crate::models::{Container, NewPlugin, Node, Placement, Scope, ValidationError};
    use crate::services::error::TreeError;
    use crate::services::integrity::check_integrity;
    use crate::services::tree_mutator::TreeMutator;
    use chrono::Utc;
    use libsql::Connection;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        mutator: TreeMutator,
        conn: Connection,
        scope: Scope,
        _db: DatabaseService,
        _temp_dir: TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_config(EngineConfig::default()).await
        }

        async fn with_config(config: EngineConfig) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let db = DatabaseService::new(temp_dir.path().join("mutator.db"))
                .await
                .unwrap();
            let conn = db.connect_with_timeout().await.unwrap();

            PluginStore::insert_container(
                &conn,
                &Container {
                    id: "page".to_string(),
                    slot: "content".to_string(),
                    owner: None,
                    is_holding_area: false,
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();

            let mutator = TreeMutator::new(
                Arc::new(PluginTypeRegistry::with_builtin()),
                Arc::new(config),
                Renumberer::new(Arc::new(PortableRenumber)),
            );

            Self {
                mutator,
                conn,
                scope: Scope::new("page", "en"),
                _db: db,
                _temp_dir: temp_dir,
            }
        }

        async fn add(&self, id: &str, type_tag: &str, placement: Placement) -> Node {
            let payload = match type_tag {
                "text" => json!({ "body": id }),
                "link" => json!({ "label": id, "url": "https://example.com" }),
                _ => json!({}),
            };
            self.mutator
                .add(&self.conn, NewPlugin::new(type_tag, payload).with_id(id), &placement)
                .await
                .unwrap()
        }

        async fn add_root(&self, id: &str, type_tag: &str) -> Node {
            self.add(id, type_tag, Placement::append(self.scope.clone()))
                .await
        }

        async fn add_child(&self, id: &str, parent: &str) -> Node {
            self.add(id, "text", Placement::append(self.scope.clone()).under(parent))
                .await
        }

        /// (id, position) in position order, after asserting the scope is intact
        async fn order(&self, scope: &Scope) -> Vec<(String, i64)> {
            let report = check_integrity(&self.conn, scope).await.unwrap();
            assert!(report.is_intact(), "{:?}", report.violations);

            PluginStore::scope_nodes(&self.conn, scope)
                .await
                .unwrap()
                .into_iter()
                .map(|n| (n.id, n.position))
                .collect()
        }

        async fn ids(&self, scope: &Scope) -> Vec<String> {
            self.order(scope).await.into_iter().map(|(id, _)| id).collect()
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_append_assigns_dense_positions() {
        let fx = Fixture::new().await;
        fx.add_root("a", "text").await;
        fx.add_root("b", "text").await;
        let c = fx.add_root("c", "text").await;

        assert_eq!(c.position, 3);
        assert_eq!(
            fx.order(&fx.scope).await,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 3)
            ]
        );
    }

    #[tokio::test]
    async fn test_insert_at_position_shifts_following() {
        let fx = Fixture::new().await;
        fx.add_root("a", "text").await;
        fx.add_root("b", "text").await;
        fx.add_root("c", "text").await;

        fx.add("x", "text", Placement::at(fx.scope.clone(), 2)).await;

        assert_eq!(fx.ids(&fx.scope).await, ids(&["a", "x", "b", "c"]));
    }

    #[tokio::test]
    async fn test_out_of_range_positions_are_normalised() {
        let fx = Fixture::new().await;
        fx.add_root("a", "text").await;
        fx.add_root("b", "text").await;

        fx.add("late", "text", Placement::at(fx.scope.clone(), 99)).await;
        fx.add("early", "text", Placement::at(fx.scope.clone(), -5)).await;

        assert_eq!(fx.ids(&fx.scope).await, ids(&["early", "a", "b", "late"]));
    }

    #[tokio::test]
    async fn test_child_lands_inside_parent_block() {
        let fx = Fixture::new().await;
        fx.add_root("s", "section").await;
        fx.add_root("t", "text").await;

        fx.add_child("s1", "s").await;
        fx.add_child("s2", "s").await;

        assert_eq!(fx.ids(&fx.scope).await, ids(&["s", "s1", "s2", "t"]));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_id_and_unknown_type() {
        let fx = Fixture::new().await;
        fx.add_root("a", "text").await;

        let duplicate = fx
            .mutator
            .add(
                &fx.conn,
                NewPlugin::new("text", json!({ "body": "again" })).with_id("a"),
                &Placement::append(fx.scope.clone()),
            )
            .await;
        assert!(matches!(
            duplicate,
            Err(TreeError::Validation(ValidationError::InvalidId(_)))
        ));

        let unknown = fx
            .mutator
            .add(
                &fx.conn,
                NewPlugin::new("video", json!({})),
                &Placement::append(fx.scope.clone()),
            )
            .await;
        assert!(matches!(unknown, Err(TreeError::UnknownPluginType(t)) if t == "video"));

        assert_eq!(fx.ids(&fx.scope).await, ids(&["a"]));
    }

    #[tokio::test]
    async fn test_links_do_not_accept_children() {
        let fx = Fixture::new().await;
        fx.add_root("l", "link").await;

        let result = fx
            .mutator
            .add(
                &fx.conn,
                NewPlugin::new("text", json!({ "body": "nested" })),
                &Placement::append(fx.scope.clone()).under("l"),
            )
            .await;

        assert!(matches!(result, Err(TreeError::TreeIntegrity { .. })));
        assert_eq!(fx.ids(&fx.scope).await, ids(&["l"]));
    }

    #[tokio::test]
    async fn test_scope_capacity_is_enforced() {
        let fx = Fixture::with_config(EngineConfig {
            max_plugins_per_scope: Some(2),
            ..Default::default()
        })
        .await;
        fx.add_root("a", "text").await;
        fx.add_root("b", "text").await;

        let result = fx
            .mutator
            .add(
                &fx.conn,
                NewPlugin::new("text", json!({ "body": "c" })),
                &Placement::append(fx.scope.clone()),
            )
            .await;

        assert!(matches!(
            result,
            Err(TreeError::CapacityExceeded { limit: 2, .. })
        ));
        assert_eq!(fx.ids(&fx.scope).await, ids(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_move_subtree_to_end() {
        let fx = Fixture::new().await;
        fx.add_root("s", "section").await;
        fx.add_child("s1", "s").await;
        fx.add_child("s2", "s").await;
        fx.add_root("t", "text").await;

        let outcome = fx
            .mutator
            .move_plugin(&fx.conn, "s", &Placement::append(fx.scope.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.node.position, 2);
        assert_eq!(outcome.touched_scopes(), vec![fx.scope.clone()]);
        assert_eq!(fx.ids(&fx.scope).await, ids(&["t", "s", "s1", "s2"]));
    }

    #[tokio::test]
    async fn test_move_to_front_of_scope() {
        let fx = Fixture::new().await;
        fx.add_root("s", "section").await;
        fx.add_child("s1", "s").await;
        fx.add_child("s2", "s").await;
        fx.add_root("t", "text").await;

        let outcome = fx
            .mutator
            .move_plugin(&fx.conn, "t", &Placement::at(fx.scope.clone(), 1))
            .await
            .unwrap();

        assert_eq!(outcome.node.position, 1);
        assert_eq!(fx.ids(&fx.scope).await, ids(&["t", "s", "s1", "s2"]));
    }

    #[tokio::test]
    async fn test_move_reparents_into_section() {
        let fx = Fixture::new().await;
        fx.add_root("s", "section").await;
        fx.add_child("s1", "s").await;
        fx.add_root("t", "text").await;
        fx.add_root("u", "text").await;

        let outcome = fx
            .mutator
            .move_plugin(
                &fx.conn,
                "u",
                &Placement::at(fx.scope.clone(), 2).under("s"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.node.parent_id.as_deref(), Some("s"));
        assert_eq!(fx.ids(&fx.scope).await, ids(&["s", "u", "s1", "t"]));
    }

    #[tokio::test]
    async fn test_move_under_own_descendant_is_rejected() {
        let fx = Fixture::new().await;
        fx.add_root("s", "section").await;
        fx.add_child("s1", "s").await;

        let result = fx
            .mutator
            .move_plugin(&fx.conn, "s", &Placement::append(fx.scope.clone()).under("s1"))
            .await;

        assert!(matches!(result, Err(TreeError::TreeIntegrity { .. })));
        assert_eq!(fx.ids(&fx.scope).await, ids(&["s", "s1"]));
    }

    #[tokio::test]
    async fn test_move_across_languages_compacts_both_scopes() {
        let fx = Fixture::new().await;
        let de = fx.scope.with_language("de");
        fx.add_root("a", "text").await;
        fx.add_root("s", "section").await;
        fx.add_child("s1", "s").await;
        fx.add_root("t", "text").await;
        fx.add("d1", "text", Placement::append(de.clone())).await;

        let outcome = fx
            .mutator
            .move_plugin(&fx.conn, "s", &Placement::append(de.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.source_scope, fx.scope);
        assert_eq!(outcome.touched_scopes(), vec![fx.scope.clone(), de.clone()]);
        assert_eq!(fx.order(&fx.scope).await, vec![
            ("a".to_string(), 1),
            ("t".to_string(), 2)
        ]);
        assert_eq!(fx.ids(&de).await, ids(&["d1", "s", "s1"]));

        let child = PluginStore::get_node(&fx.conn, "s1").await.unwrap().unwrap();
        assert_eq!(child.language, "de");
        assert_eq!(child.parent_id.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_delete_removes_subtree_and_closes_gap() {
        let fx = Fixture::new().await;
        fx.add_root("a", "text").await;
        fx.add_root("s", "section").await;
        fx.add_child("s1", "s").await;
        fx.add_child("s2", "s").await;
        fx.add_root("t", "text").await;

        let deleted = fx.mutator.delete(&fx.conn, "s").await.unwrap();

        assert_eq!(deleted.id, "s");
        assert_eq!(fx.order(&fx.scope).await, vec![
            ("a".to_string(), 1),
            ("t".to_string(), 2)
        ]);
        assert!(PluginStore::get_payload(&fx.conn, "s1").await.unwrap().is_none());
        assert!(matches!(
            fx.mutator.delete(&fx.conn, "s").await,
            Err(TreeError::NodeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_order_carries_subtrees() {
        let fx = Fixture::new().await;
        fx.add_root("a", "text").await;
        fx.add_root("s", "section").await;
        fx.add_child("s1", "s").await;
        fx.add_root("b", "text").await;

        let changed = fx
            .mutator
            .apply_order(&fx.conn, &fx.scope, None, &ids(&["b", "s", "a"]))
            .await
            .unwrap();

        assert!(changed);
        assert_eq!(fx.ids(&fx.scope).await, ids(&["b", "s", "s1", "a"]));
    }

    #[tokio::test]
    async fn test_apply_order_among_children_keeps_tail() {
        let fx = Fixture::new().await;
        fx.add_root("s", "section").await;
        fx.add_child("s1", "s").await;
        fx.add_child("s2", "s").await;
        fx.add_root("t", "text").await;

        fx.mutator
            .apply_order(&fx.conn, &fx.scope, Some("s"), &ids(&["s2", "s1"]))
            .await
            .unwrap();

        assert_eq!(fx.ids(&fx.scope).await, ids(&["s", "s2", "s1", "t"]));
    }

    #[tokio::test]
    async fn test_apply_order_validates_permutation() {
        let fx = Fixture::new().await;
        fx.add_root("a", "text").await;
        fx.add_root("b", "text").await;

        let unchanged = fx
            .mutator
            .apply_order(&fx.conn, &fx.scope, None, &ids(&["a", "b"]))
            .await
            .unwrap();
        assert!(!unchanged);

        for bad in [ids(&["a"]), ids(&["a", "a"]), ids(&["a", "zzz"])] {
            let result = fx.mutator.apply_order(&fx.conn, &fx.scope, None, &bad).await;
            assert!(matches!(result, Err(TreeError::InvalidOrder { .. })), "{:?}", bad);
        }
        assert_eq!(fx.ids(&fx.scope).await, ids(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_clear_container_empties_every_language() {
        let fx = Fixture::new().await;
        let de = fx.scope.with_language("de");
        fx.add_root("a", "text").await;
        fx.add("d", "text", Placement::append(de.clone())).await;

        let mut cleared = fx.mutator.clear_container(&fx.conn, "page").await.unwrap();
        cleared.sort();

        assert_eq!(cleared, vec![de.clone(), fx.scope.clone()]);
        assert!(fx.ids(&fx.scope).await.is_empty());
        assert!(fx.ids(&de).await.is_empty());
    }
}
