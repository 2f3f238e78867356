//! Clipboard Tests
//!
//! Cut / copy / paste through per-owner holding areas.

#[cfg(test)]
mod clipboard_tests {
    use anyhow::Result;
    use blockspace_core::behaviors::PluginTypeRegistry;
    use blockspace_core::config::EngineConfig;
    use blockspace_core::models::{NewPlugin, Node, Placement, Scope};
    use blockspace_core::services::{
        OrderEntry, PluginTreeService, TreeError, HOLDING_AREA_OWNER_KIND,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_service() -> Result<(PluginTreeService, TempDir)> {
        let temp_dir = TempDir::new()?;
        let service = PluginTreeService::open(
            temp_dir.path().join("clipboard.db"),
            Arc::new(PluginTypeRegistry::with_builtin()),
            EngineConfig::default(),
        )
        .await?;
        Ok((service, temp_dir))
    }

    async fn create_page(service: &PluginTreeService) -> Result<Scope> {
        let container = service.create_container("content", None).await?;
        Ok(Scope::new(container.id, "en"))
    }

    async fn add_text(service: &PluginTreeService, scope: &Scope, body: &str) -> Result<Node> {
        Ok(service
            .add(
                NewPlugin::new("text", json!({ "body": body })),
                Placement::append(scope.clone()),
            )
            .await?)
    }

    async fn assert_intact(service: &PluginTreeService, scope: &Scope) -> Result<()> {
        let report = service.check_integrity(scope).await?;
        assert!(report.is_intact(), "{:?}", report.violations);
        Ok(())
    }

    #[tokio::test]
    async fn test_holding_area_is_created_once_per_owner() -> Result<()> {
        let (service, _temp_dir) = create_test_service().await?;

        let first = service.holding_area("user-1").await?;
        let again = service.holding_area("user-1").await?;
        let other = service.holding_area("user-2").await?;

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, other.id);
        assert!(first.is_holding_area);
        assert_eq!(first.slot, "clipboard");
        assert_eq!(
            first.owner.as_ref().map(|o| o.object_kind.as_str()),
            Some(HOLDING_AREA_OWNER_KIND)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_cut_replaces_held_item() -> Result<()> {
        let (service, _temp_dir) = create_test_service().await?;
        let page = create_page(&service).await?;
        let x = add_text(&service, &page, "X").await?;
        let y = add_text(&service, &page, "Y").await?;
        let z = add_text(&service, &page, "Z").await?;
        let holding = service.holding_area("user-1").await?;
        let held_scope = Scope::new(&holding.id, "en");

        service.cut(&y.id, &holding.id).await?;
        assert_eq!(service.get_rank_list(&held_scope, None).await?, vec![y.id.clone()]);

        let cut = service.cut(&x.id, &holding.id).await?;

        assert_eq!(cut.container_id, holding.id);
        assert_eq!(cut.position, 1);
        assert_eq!(service.get_rank_list(&held_scope, None).await?, vec![x.id.clone()]);
        assert!(service.get_node(&y.id).await?.is_none());
        assert_eq!(service.get_rank_list(&page, None).await?, vec![z.id]);
        assert_intact(&service, &page).await?;
        assert_intact(&service, &held_scope).await?;

        // Cutting the held item again changes nothing
        service.cut(&x.id, &holding.id).await?;
        assert_eq!(service.count_in_scope(&held_scope).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_paste_move_empties_holding_area() -> Result<()> {
        let (service, _temp_dir) = create_test_service().await?;
        let page = create_page(&service).await?;
        let target = create_page(&service).await?;
        let x = add_text(&service, &page, "X").await?;
        let t = add_text(&service, &target, "T").await?;
        let holding = service.holding_area("user-1").await?;

        service.cut(&x.id, &holding.id).await?;
        let pasted = service
            .paste_move(&x.id, Placement::at(target.clone(), 1))
            .await?;

        assert_eq!(pasted.container_id, target.container_id);
        assert_eq!(service.get_rank_list(&target, None).await?, vec![x.id.clone(), t.id]);
        assert_eq!(
            service.count_in_scope(&Scope::new(&holding.id, "en")).await?,
            0
        );
        assert_intact(&service, &target).await?;

        // Only held plugins can be paste-moved
        let result = service
            .paste_move(&x.id, Placement::append(page.clone()))
            .await;
        assert!(matches!(result, Err(TreeError::TreeIntegrity { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_paste_copy_follows_marker_order() -> Result<()> {
        let (service, _temp_dir) = create_test_service().await?;
        let page = create_page(&service).await?;
        let a = add_text(&service, &page, "a").await?;
        let b = add_text(&service, &page, "b").await?;
        let holding = service.holding_area("user-1").await?;

        let held = service.copy_to_holding(&a.id, &holding.id).await?;
        let held_id = held[0].copy.id.clone();
        assert_eq!(held[0].original.id, a.id);

        let order = vec![
            OrderEntry::Plugin(b.id.clone()),
            OrderEntry::PastedRoot,
            OrderEntry::Plugin(a.id.clone()),
        ];
        let pasted = service
            .paste_copy(&held_id, Placement::append(page.clone()), Some(&order))
            .await?;
        let pasted_id = pasted[0].copy.id.clone();

        assert_eq!(pasted[0].copy.position, 2);
        assert_eq!(
            service.get_rank_list(&page, None).await?,
            vec![b.id.clone(), pasted_id, a.id.clone()]
        );
        assert_intact(&service, &page).await?;

        // The holding area keeps its content, so pasting again works
        service
            .paste_copy(&held_id, Placement::append(page.clone()), None)
            .await?;
        assert_eq!(service.count_in_scope(&page).await?, 4);
        assert_eq!(
            service
                .get_rank_list(&Scope::new(&holding.id, "en"), None)
                .await?,
            vec![held_id]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_paste_copy_rejects_bad_marker_count() -> Result<()> {
        let (service, _temp_dir) = create_test_service().await?;
        let page = create_page(&service).await?;
        let a = add_text(&service, &page, "a").await?;
        let holding = service.holding_area("user-1").await?;
        let held = service.copy_to_holding(&a.id, &holding.id).await?;

        let order = vec![OrderEntry::PastedRoot, OrderEntry::PastedRoot];
        let result = service
            .paste_copy(&held[0].copy.id, Placement::append(page.clone()), Some(&order))
            .await;

        assert!(matches!(result, Err(TreeError::InvalidOrder { .. })));
        // The whole paste was rolled back
        assert_eq!(service.get_rank_list(&page, None).await?, vec![a.id]);
        Ok(())
    }

    #[tokio::test]
    async fn test_paste_requires_held_root() -> Result<()> {
        let (service, _temp_dir) = create_test_service().await?;
        let page = create_page(&service).await?;
        let target = create_page(&service).await?;
        let section = service
            .add(
                NewPlugin::new("section", json!({ "title": "held" })),
                Placement::append(page.clone()),
            )
            .await?;
        let child = service
            .add(
                NewPlugin::new("text", json!({ "body": "nested" })),
                Placement::append(page.clone()).under(&section.id),
            )
            .await?;
        let holding = service.holding_area("user-1").await?;
        let held_scope = Scope::new(&holding.id, "en");
        service.cut(&section.id, &holding.id).await?;

        let moved = service
            .paste_move(&child.id, Placement::append(target.clone()))
            .await;
        assert!(matches!(moved, Err(TreeError::TreeIntegrity { .. })));
        let copied = service
            .paste_copy(&child.id, Placement::append(target.clone()), None)
            .await;
        assert!(matches!(copied, Err(TreeError::TreeIntegrity { .. })));

        assert_eq!(
            service.get_rank_list(&held_scope, None).await?,
            vec![section.id.clone()]
        );
        assert_eq!(service.count_in_scope(&held_scope).await?, 2);
        assert_eq!(service.count_in_scope(&target).await?, 0);
        assert_intact(&service, &held_scope).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_to_holding_rejects_held_source() -> Result<()> {
        let (service, _temp_dir) = create_test_service().await?;
        let page = create_page(&service).await?;
        let a = add_text(&service, &page, "a").await?;
        let holding = service.holding_area("user-1").await?;
        service.cut(&a.id, &holding.id).await?;

        let result = service.copy_to_holding(&a.id, &holding.id).await;
        assert!(matches!(result, Err(TreeError::TreeIntegrity { .. })));

        let not_holding = service.cut(&a.id, &page.container_id).await;
        assert!(matches!(not_holding, Err(TreeError::TreeIntegrity { .. })));
        Ok(())
    }
}
