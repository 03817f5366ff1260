//! Error types for tree operations
//!
//! The taxonomy the engine surfaces to callers. Transient conflicts are
//! consumed internally by the retry loop; everything else is returned typed
//! and verbatim, with enough context (offending id, computed layer) for the
//! owning service to produce a user-facing message. The engine itself never
//! formats messages beyond these display strings.

use crate::db::DatabaseError;
use crate::ordering::RebalanceError;
use thiserror::Error;

/// Errors that can occur during tree operations
#[derive(Error, Debug)]
pub enum TreeServiceError {
    /// Referenced node/parent/sibling does not exist, or does not exist
    /// under the expected parent
    #[error("Node '{id}' does not exist")]
    NotFound { id: u64 },

    /// Attempted move would place a node inside its own subtree
    #[error("Cannot move node '{id}' under '{dest_parent_id}': destination is inside its own subtree")]
    MoveToSubtree { id: u64, dest_parent_id: u64 },

    /// Resulting position violates the total depth budget
    #[error("Tree depth {layer} exceeds the maximum of {max_layer} layers")]
    OverflowMaxLayer { layer: u64, max_layer: u64 },

    /// Resulting position violates the group-nesting budget
    #[error("Group nesting depth {layer} exceeds the maximum of {max_layer} group layers")]
    OverflowMaxLayerGroup { layer: u64, max_layer: u64 },

    /// A sibling set cannot be represented within the weight space even
    /// after a full rebalance. Hard failure, never retried.
    #[error("Sibling set under parent {parent_id:?} cannot be represented in the weight space")]
    CapacityExhausted { parent_id: Option<u64> },

    /// Internal marker for a detected need-to-rebalance or slot race.
    /// Always handled by the retry loop; callers only see it if the retry
    /// budget machinery is bypassed.
    #[error("Transient write conflict")]
    Conflict,

    /// Storage failure
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Retry-budget exhaustion or any unexpected state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TreeServiceError {
    /// Create a NotFound error
    pub fn not_found(id: u64) -> Self {
        Self::NotFound { id }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the retry loop may consume this error and try again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict => true,
            Self::Database(e) => e.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<RebalanceError> for TreeServiceError {
    fn from(err: RebalanceError) -> Self {
        match err {
            RebalanceError::Capacity { parent_id, .. } => Self::CapacityExhausted { parent_id },
            RebalanceError::Database(e) => Self::Database(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = TreeServiceError::not_found(42);
        assert_eq!(format!("{}", err), "Node '42' does not exist");
    }

    #[test]
    fn test_move_to_subtree_display() {
        let err = TreeServiceError::MoveToSubtree {
            id: 2,
            dest_parent_id: 3,
        };
        assert_eq!(
            format!("{}", err),
            "Cannot move node '2' under '3': destination is inside its own subtree"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(TreeServiceError::Conflict.is_transient());
        assert!(!TreeServiceError::not_found(1).is_transient());

        let unique = TreeServiceError::Database(DatabaseError::sql_execution(
            "UNIQUE constraint failed: nodes.sort_weight",
        ));
        assert!(unique.is_transient());

        let other = TreeServiceError::Database(DatabaseError::sql_execution("disk I/O error"));
        assert!(!other.is_transient());
    }

    #[test]
    fn test_rebalance_capacity_maps_to_capacity_exhausted() {
        let err: TreeServiceError = RebalanceError::Capacity {
            parent_id: Some(9),
            children: 100,
        }
        .into();
        assert!(matches!(
            err,
            TreeServiceError::CapacityExhausted { parent_id: Some(9) }
        ));
    }
}
