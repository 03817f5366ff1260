//! Sibling Set Rebalancing
//!
//! When the gap between two siblings closes (or the weight space overflows),
//! the whole sibling set of one parent is renumbered to contiguous, evenly
//! spaced weights: `Start, Start+Inc, Start+2*Inc, ...`.
//!
//! The rewrite runs inside the caller's transaction. Because the unique
//! index on `(parent, sort_weight)` is checked per statement, writing
//! ascending targets into slots still occupied by not-yet-moved larger
//! weights can collide mid-rewrite. Colliding rows are deferred and
//! re-applied in reverse order after the first pass, which resolves the
//! shift conflict without weakening the constraint.

use crate::db::{DatabaseError, DatabaseService};
use crate::ordering::weight::{WEIGHT_INCREMENT, WEIGHT_MAX, WEIGHT_START};
use libsql::Connection;
use thiserror::Error;

/// Rebalance failures.
#[derive(Error, Debug)]
pub enum RebalanceError {
    /// The sibling set has too many children to represent in the weight
    /// space. Unrecoverable: retrying cannot help.
    #[error("Sibling set under parent {parent_id:?} has {children} children and cannot be renumbered within the weight space")]
    Capacity {
        parent_id: Option<u64>,
        children: usize,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Renumbers one parent's live children to contiguous weights.
pub struct Rebalancer;

impl Rebalancer {
    /// Rewrite every live child of `parent_id` to evenly spaced weights,
    /// preserving relative order. Must be called inside an open write
    /// transaction; the caller commits or rolls back.
    ///
    /// Returns the fringe: the first unused weight slot after the set,
    /// i.e. the weight a subsequent append would take.
    pub async fn rebalance(
        db: &DatabaseService,
        conn: &Connection,
        parent_id: Option<u64>,
    ) -> Result<u64, RebalanceError> {
        let children = db.db_get_children(conn, parent_id).await?;

        let mut deferred: Vec<(u64, u64)> = Vec::new();

        for (i, child) in children.iter().enumerate() {
            let target = WEIGHT_START + (i as u64) * WEIGHT_INCREMENT;
            if target > WEIGHT_MAX {
                return Err(RebalanceError::Capacity {
                    parent_id,
                    children: children.len(),
                });
            }
            if child.sort_weight == target {
                continue;
            }
            match db.db_set_weight(conn, child.id, target).await {
                Ok(_) => {}
                // Target slot still held by a sibling later in the pass.
                Err(e) if e.is_unique_violation() => deferred.push((child.id, target)),
                Err(e) => return Err(e.into()),
            }
        }

        // Replaying in reverse clears each occupied slot before it is needed.
        for (id, target) in deferred.into_iter().rev() {
            db.db_set_weight(conn, id, target).await?;
        }

        let fringe = WEIGHT_START + (children.len() as u64) * WEIGHT_INCREMENT;
        if fringe > WEIGHT_MAX {
            return Err(RebalanceError::Capacity {
                parent_id,
                children: children.len(),
            });
        }

        tracing::debug!(
            parent_id = ?parent_id,
            children = children.len(),
            fringe,
            "rebalanced sibling set"
        );

        Ok(fringe)
    }
}
