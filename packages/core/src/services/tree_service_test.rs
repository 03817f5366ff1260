//! Tests for TreeService insert/upsert, delete, and read paths.

use crate::db::database::DbNodeRowParams;
use crate::db::DatabaseService;
use crate::models::{NodeDraft, NodeKind};
use crate::ordering::WEIGHT_MAX;
use crate::services::{TreeService, TreeServiceError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_ok;

const MAX_LAYER: u64 = 4;

async fn setup() -> anyhow::Result<(TempDir, Arc<TreeService>)> {
    let dir = TempDir::new()?;
    let db = Arc::new(DatabaseService::new(dir.path().join("tree.db")).await?);
    Ok((dir, Arc::new(TreeService::new(db))))
}

#[tokio::test]
async fn test_append_assigns_gap_weights() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let a = assert_ok!(
        service
            .insert_node(NodeDraft::new(NodeKind::Leaf, "alpha", None), MAX_LAYER)
            .await
    );
    let b = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "beta", None), MAX_LAYER)
        .await?;

    let children = service.list_children(None).await?;
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].id, a);
    assert_eq!(children[0].sort_weight, 512);
    assert_eq!(children[1].id, b);
    assert_eq!(children[1].sort_weight, 1024);
    Ok(())
}

#[tokio::test]
async fn test_insert_under_group() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let group = service
        .insert_node(NodeDraft::new(NodeKind::Group, "Finance", None), MAX_LAYER)
        .await?;
    let leaf = service
        .insert_node(
            NodeDraft::new(NodeKind::Leaf, "Salary data", Some(group))
                .with_description("payroll figures")
                .with_properties(serde_json::json!({ "sensitive": true })),
            MAX_LAYER,
        )
        .await?;

    assert!(service.exists_under_parent(leaf, Some(group)).await?);
    assert!(!service.exists_under_parent(leaf, None).await?);
    assert_eq!(service.node_name(leaf).await?, "Salary data");

    let children = service.list_children(Some(group)).await?;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].sort_weight, 512);
    assert_eq!(children[0].description, "payroll figures");
    assert_eq!(
        children[0].properties,
        serde_json::json!({ "sensitive": true })
    );
    Ok(())
}

#[tokio::test]
async fn test_insert_under_missing_parent_fails() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let result = service
        .insert_node(
            NodeDraft::new(NodeKind::Leaf, "orphan", Some(424242)),
            MAX_LAYER,
        )
        .await;

    assert!(matches!(
        result,
        Err(TreeServiceError::NotFound { id: 424242 })
    ));
    Ok(())
}

#[tokio::test]
async fn test_upsert_rewrites_fields_keeps_position() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let _a = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "first", None), MAX_LAYER)
        .await?;
    let b = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "second", None), MAX_LAYER)
        .await?;
    let _c = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "third", None), MAX_LAYER)
        .await?;

    let upserted = service
        .insert_node(
            NodeDraft::new(NodeKind::Leaf, "second (renamed)", None)
                .with_id(b)
                .with_icon("tag"),
            MAX_LAYER,
        )
        .await?;
    assert_eq!(upserted, b);

    let children = service.list_children(None).await?;
    assert_eq!(children.len(), 3);
    assert_eq!(children[1].id, b);
    assert_eq!(children[1].sort_weight, 1024);
    assert_eq!(children[1].name, "second (renamed)");
    assert_eq!(children[1].icon, "tag");
    Ok(())
}

#[tokio::test]
async fn test_upsert_parent_change_appends_under_new_parent() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let group = service
        .insert_node(NodeDraft::new(NodeKind::Group, "Finance", None), MAX_LAYER)
        .await?;
    let leaf = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "invoice", None), MAX_LAYER)
        .await?;

    service
        .insert_node(
            NodeDraft::new(NodeKind::Leaf, "invoice", Some(group)).with_id(leaf),
            MAX_LAYER,
        )
        .await?;

    assert!(service.exists_under_parent(leaf, Some(group)).await?);
    assert!(!service.exists_under_parent(leaf, None).await?);

    let children = service.list_children(Some(group)).await?;
    assert_eq!(children[0].id, leaf);
    assert_eq!(children[0].sort_weight, 512);
    Ok(())
}

#[tokio::test]
async fn test_upsert_into_own_subtree_fails() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let group = service
        .insert_node(NodeDraft::new(NodeKind::Group, "g", None), MAX_LAYER)
        .await?;
    let child = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "c", Some(group)), MAX_LAYER)
        .await?;

    // Reparenting via upsert is a move in disguise and must reject cycles
    // the same way, instead of writing a cyclic parent chain.
    let result = service
        .insert_node(
            NodeDraft::new(NodeKind::Group, "g", Some(child)).with_id(group),
            MAX_LAYER,
        )
        .await;
    assert!(matches!(
        result,
        Err(TreeServiceError::MoveToSubtree { .. })
    ));

    // Directly under itself is the degenerate cycle.
    let result = service
        .insert_node(
            NodeDraft::new(NodeKind::Group, "g", Some(group)).with_id(group),
            MAX_LAYER,
        )
        .await;
    assert!(matches!(
        result,
        Err(TreeServiceError::MoveToSubtree { .. })
    ));

    assert!(service.exists_under_parent(group, None).await?);
    assert!(service.exists_under_parent(child, Some(group)).await?);
    Ok(())
}

#[tokio::test]
async fn test_upsert_reparent_checks_subtree_depth() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;
    let max_layer = 3;

    let r1 = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "r1", None), max_layer)
        .await?;
    let r2 = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "r2", Some(r1)), max_layer)
        .await?;

    let x = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "x", None), max_layer)
        .await?;
    let _y = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "y", Some(x)), max_layer)
        .await?;

    // x itself would fit at depth 3, but its child y would land at depth 4.
    let result = service
        .insert_node(
            NodeDraft::new(NodeKind::Leaf, "x", Some(r2)).with_id(x),
            max_layer,
        )
        .await;
    assert!(matches!(
        result,
        Err(TreeServiceError::OverflowMaxLayer {
            layer: 4,
            max_layer: 3
        })
    ));

    // The rewrite was rolled back with the rest of the transaction.
    assert!(service.exists_under_parent(x, None).await?);
    assert!(service.list_children(Some(r2)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_overflowed_weight_triggers_rebalance_on_insert() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = Arc::new(DatabaseService::new(dir.path().join("tree.db")).await?);
    let service = TreeService::new(Arc::clone(&db));

    // Seed a sibling whose weight sits past the usable ceiling, as repeated
    // appends would eventually leave it.
    let conn = db.connect_with_timeout().await?;
    db.db_insert_node(
        &conn,
        DbNodeRowParams {
            id: 1,
            parent_id: None,
            kind: NodeKind::Leaf,
            sort_weight: WEIGHT_MAX + 512,
            name: "old",
            description: "",
            icon: "",
            properties: "{}",
        },
    )
    .await?;

    // The append finds no room, rebalances the sibling set, and retries.
    let new = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "new", None), MAX_LAYER)
        .await?;

    let children = service.list_children(None).await?;
    let ids: Vec<u64> = children.iter().map(|n| n.id).collect();
    let weights: Vec<u64> = children.iter().map(|n| n.sort_weight).collect();
    assert_eq!(ids, vec![1, new]);
    assert_eq!(weights, vec![512, 1024]);
    Ok(())
}

#[tokio::test]
async fn test_depth_budget_boundary() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    // Chain exactly MAX_LAYER deep: group > group > leaf > leaf.
    let l1 = service
        .insert_node(NodeDraft::new(NodeKind::Group, "l1", None), MAX_LAYER)
        .await?;
    let l2 = service
        .insert_node(NodeDraft::new(NodeKind::Group, "l2", Some(l1)), MAX_LAYER)
        .await?;
    let l3 = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "l3", Some(l2)), MAX_LAYER)
        .await?;
    let l4 = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "l4", Some(l3)), MAX_LAYER)
        .await?;

    // One layer past the budget fails.
    let result = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "l5", Some(l4)), MAX_LAYER)
        .await;
    assert!(matches!(
        result,
        Err(TreeServiceError::OverflowMaxLayer {
            layer: 5,
            max_layer: 4
        })
    ));

    // The failed insert rolled back: no child under l4.
    assert!(service.list_children(Some(l4)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_group_nesting_budget() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let g1 = service
        .insert_node(NodeDraft::new(NodeKind::Group, "g1", None), MAX_LAYER)
        .await?;
    let g2 = service
        .insert_node(NodeDraft::new(NodeKind::Group, "g2", Some(g1)), MAX_LAYER)
        .await?;

    // A third group on the chain exceeds the group budget even though the
    // total depth budget still has room.
    let result = service
        .insert_node(NodeDraft::new(NodeKind::Group, "g3", Some(g2)), MAX_LAYER)
        .await;
    assert!(matches!(
        result,
        Err(TreeServiceError::OverflowMaxLayerGroup {
            layer: 3,
            max_layer: 2
        })
    ));

    // A leaf at the same position is fine.
    service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "leaf", Some(g2)), MAX_LAYER)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_delete_subtree_cascades() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let root = service
        .insert_node(NodeDraft::new(NodeKind::Group, "root", None), MAX_LAYER)
        .await?;
    let child_a = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "a", Some(root)), MAX_LAYER)
        .await?;
    let child_b = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "b", Some(root)), MAX_LAYER)
        .await?;
    let grandchild = service
        .insert_node(
            NodeDraft::new(NodeKind::Leaf, "aa", Some(child_a)),
            MAX_LAYER,
        )
        .await?;
    let bystander = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "other", None), MAX_LAYER)
        .await?;

    let deletion = service.delete_subtree(root).await?;
    assert!(deletion.existed);
    let removed: HashSet<u64> = deletion.removed_ids.iter().copied().collect();
    assert_eq!(
        removed,
        HashSet::from([root, child_a, child_b, grandchild])
    );
    assert_eq!(deletion.removed_ids[0], root);

    assert!(!service.exists_under_parent(root, None).await?);
    assert!(matches!(
        service.node_name(grandchild).await,
        Err(TreeServiceError::NotFound { .. })
    ));
    assert!(service.exists_under_parent(bystander, None).await?);
    Ok(())
}

#[tokio::test]
async fn test_delete_absent_is_idempotent() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let deletion = service.delete_subtree(999).await?;
    assert!(!deletion.existed);
    assert!(deletion.removed_ids.is_empty());

    let id = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "once", None), MAX_LAYER)
        .await?;
    assert!(service.delete_subtree(id).await?.existed);
    assert!(!service.delete_subtree(id).await?.existed);
    Ok(())
}

#[tokio::test]
async fn test_weight_slot_reuse_after_delete() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let a = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "a", None), MAX_LAYER)
        .await?;
    service.delete_subtree(a).await?;

    // The unique index only covers live rows, so the freed slot is
    // immediately reusable.
    let b = service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "b", None), MAX_LAYER)
        .await?;
    let children = service.list_children(None).await?;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, b);
    assert_eq!(children[0].sort_weight, 512);
    Ok(())
}

#[tokio::test]
async fn test_node_name_not_found() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    assert!(matches!(
        service.node_name(31337).await,
        Err(TreeServiceError::NotFound { id: 31337 })
    ));
    Ok(())
}

#[tokio::test]
async fn test_search_collects_ancestors_and_boundary_children() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let finance = service
        .insert_node(NodeDraft::new(NodeKind::Group, "Finance", None), MAX_LAYER)
        .await?;
    let payroll = service
        .insert_node(
            NodeDraft::new(NodeKind::Group, "Payroll", Some(finance)),
            MAX_LAYER,
        )
        .await?;
    let salary = service
        .insert_node(
            NodeDraft::new(NodeKind::Leaf, "Salary data", Some(payroll)),
            MAX_LAYER,
        )
        .await?;
    let _engineering = service
        .insert_node(
            NodeDraft::new(NodeKind::Group, "Engineering", None),
            MAX_LAYER,
        )
        .await?;

    let results = service.search_with_ancestors("Payroll").await?;
    let by_id: HashMap<u64, _> = results.into_iter().map(|r| (r.node.id, r)).collect();

    // Hit + its ancestor + one generation below the boundary hit.
    assert_eq!(by_id.len(), 3);

    let hit = &by_id[&payroll];
    assert!(hit.is_hit);
    assert!(!hit.default_expanded);

    let ancestor = &by_id[&finance];
    assert!(!ancestor.is_hit);
    assert!(ancestor.default_expanded);

    let child = &by_id[&salary];
    assert!(!child.is_hit);
    assert!(child.default_expanded);
    Ok(())
}

#[tokio::test]
async fn test_search_hit_under_hit_parent_auto_expands() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let data = service
        .insert_node(NodeDraft::new(NodeKind::Group, "Data", None), MAX_LAYER)
        .await?;
    let lake = service
        .insert_node(
            NodeDraft::new(NodeKind::Leaf, "Data lake", Some(data)),
            MAX_LAYER,
        )
        .await?;

    let results = service.search_with_ancestors("Data").await?;
    let by_id: HashMap<u64, _> = results.into_iter().map(|r| (r.node.id, r)).collect();

    // Only the topmost hit sits at the match boundary.
    assert!(by_id[&data].is_hit);
    assert!(!by_id[&data].default_expanded);
    assert!(by_id[&lake].is_hit);
    assert!(by_id[&lake].default_expanded);
    Ok(())
}

#[tokio::test]
async fn test_search_no_hits_is_empty() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    service
        .insert_node(NodeDraft::new(NodeKind::Leaf, "alpha", None), MAX_LAYER)
        .await?;

    assert!(service.search_with_ancestors("zzz").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_appends_get_unique_weights() -> anyhow::Result<()> {
    let (_dir, service) = setup().await?;

    let parent = service
        .insert_node(NodeDraft::new(NodeKind::Group, "busy", None), MAX_LAYER)
        .await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .insert_node(
                    NodeDraft::new(NodeKind::Leaf, format!("leaf-{}", i), Some(parent)),
                    MAX_LAYER,
                )
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let children = service.list_children(Some(parent)).await?;
    assert_eq!(children.len(), 8);

    let weights: HashSet<u64> = children.iter().map(|c| c.sort_weight).collect();
    assert_eq!(weights.len(), 8, "sibling weights must be unique");
    Ok(())
}
