//! Structural Validation
//!
//! Cycle and depth checks for insert/move operations. Both run inside the
//! caller's transaction so the check is consistent with the write. Ancestor
//! chains are walked one row at a time (repeated point queries rather than a
//! recursive CTE, which keeps the store requirements minimal); a missing
//! intermediate row stops the walk instead of failing the operation.

use crate::db::DatabaseService;
use crate::models::NodeKind;
use crate::services::error::TreeServiceError;
use libsql::Connection;
use std::collections::VecDeque;

/// Maximum number of Group-typed nodes on any stored root-to-leaf chain.
/// The implicit root is not a stored row and never enters the count.
pub const MAX_GROUP_LAYER: u64 = 2;

/// Rejects moves that would place a node inside its own subtree.
pub(crate) struct CycleGuard;

impl CycleGuard {
    /// Walk `dest_parent_id`'s ancestor chain upward; finding `id` on that
    /// chain means the move would create a cycle.
    pub async fn ensure_no_cycle(
        db: &DatabaseService,
        conn: &Connection,
        id: u64,
        dest_parent_id: Option<u64>,
    ) -> Result<(), TreeServiceError> {
        let Some(dest) = dest_parent_id else {
            // Implicit root can never be inside anyone's subtree.
            return Ok(());
        };

        let mut cursor = Some(dest);
        while let Some(cur) = cursor {
            if cur == id {
                return Err(TreeServiceError::MoveToSubtree {
                    id,
                    dest_parent_id: dest,
                });
            }
            cursor = match db.db_get_node(conn, cur).await? {
                Some(node) => node.parent_id,
                // Missing intermediate: stop walking upward.
                None => None,
            };
        }

        Ok(())
    }
}

/// Enforces the total depth budget and the group-nesting budget.
pub(crate) struct DepthValidator;

impl DepthValidator {
    /// Count ancestors of a position: total stored layers above it, and how
    /// many of those are groups.
    async fn ancestor_counts(
        db: &DatabaseService,
        conn: &Connection,
        parent_id: Option<u64>,
    ) -> Result<(u64, u64), TreeServiceError> {
        let mut layers = 0u64;
        let mut groups = 0u64;
        let mut cursor = parent_id;

        while let Some(cur) = cursor {
            let Some(node) = db.db_get_node(conn, cur).await? else {
                break;
            };
            layers += 1;
            if node.kind.is_group() {
                groups += 1;
            }
            cursor = node.parent_id;
        }

        Ok((layers, groups))
    }

    /// Validate placing a single `kind`-typed node directly under
    /// `parent_id`. Walks upward only (the node has no descendants yet, or
    /// keeps them at unchanged relative depth).
    pub async fn validate_insert(
        db: &DatabaseService,
        conn: &Connection,
        parent_id: Option<u64>,
        kind: NodeKind,
        max_layer: u64,
    ) -> Result<(), TreeServiceError> {
        let (layers, groups) = Self::ancestor_counts(db, conn, parent_id).await?;

        let depth = layers + 1;
        if depth > max_layer {
            return Err(TreeServiceError::OverflowMaxLayer {
                layer: depth,
                max_layer,
            });
        }

        let group_depth = groups + u64::from(kind.is_group());
        if group_depth > MAX_GROUP_LAYER {
            return Err(TreeServiceError::OverflowMaxLayerGroup {
                layer: group_depth,
                max_layer: MAX_GROUP_LAYER,
            });
        }

        Ok(())
    }

    /// Validate a subtree rooted at `id` (of kind `kind`) sitting under
    /// `parent_id`. Walks upward from the parent and breadth-first downward
    /// through the subtree: moving a shallow node deep can drag its deepest
    /// leaf below the floor, so every descendant depth must still fit.
    ///
    /// Call after the parent rewrite, inside the same transaction.
    pub async fn validate_move(
        db: &DatabaseService,
        conn: &Connection,
        id: u64,
        kind: NodeKind,
        parent_id: Option<u64>,
        max_layer: u64,
    ) -> Result<(), TreeServiceError> {
        let (layers, groups) = Self::ancestor_counts(db, conn, parent_id).await?;

        // (node id, depth within subtree, groups on the chain down to it)
        let mut queue: VecDeque<(u64, u64, u64)> =
            VecDeque::from([(id, 1, u64::from(kind.is_group()))]);

        while let Some((cur, depth, group_depth)) = queue.pop_front() {
            let total_depth = layers + depth;
            if total_depth > max_layer {
                return Err(TreeServiceError::OverflowMaxLayer {
                    layer: total_depth,
                    max_layer,
                });
            }

            let total_groups = groups + group_depth;
            if total_groups > MAX_GROUP_LAYER {
                return Err(TreeServiceError::OverflowMaxLayerGroup {
                    layer: total_groups,
                    max_layer: MAX_GROUP_LAYER,
                });
            }

            for child in db.db_get_children(conn, Some(cur)).await? {
                queue.push_back((
                    child.id,
                    depth + 1,
                    group_depth + u64::from(child.kind.is_group()),
                ));
            }
        }

        Ok(())
    }
}
