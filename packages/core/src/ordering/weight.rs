//! Weight Space and Allocation
//!
//! Siblings are ordered by an unsigned 64-bit `sort_weight`. Weights are
//! deliberately sparse: appends step by a fixed increment and positional
//! inserts take the midpoint of the two neighbouring weights, so ordinary
//! operations never renumber the sibling set. Only when a gap closes (or the
//! weight space overflows) does the rebalancer rewrite the whole set.

/// Weight assigned to the first child of an empty parent.
pub const WEIGHT_START: u64 = 1 << 9;

/// Step between consecutive appended siblings.
pub const WEIGHT_INCREMENT: u64 = 1 << 9;

/// Ceiling of the usable weight space (2^62). A sibling weight above this
/// signals that the set must be rebalanced before further appends.
pub const WEIGHT_MAX: u64 = 1 << 62;

/// Outcome of an append-weight computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Weight to assign to the new last child
    Weight(u64),
    /// The sibling set has outgrown the weight space; rebalance first
    NeedsRebalance,
}

/// Computes sort weights for appends and positional inserts.
///
/// Pure computation over caller-supplied neighbour weights; the storage side
/// effects (and the rebalance escalation) belong to the callers.
pub struct WeightAllocator;

impl WeightAllocator {
    /// Weight for a new last child, given the current maximum weight among
    /// the parent's children (`None` = parent has no children).
    pub fn allocate_append(max_weight: Option<u64>) -> Allocation {
        match max_weight {
            None => Allocation::Weight(WEIGHT_START),
            Some(max) if max > WEIGHT_MAX => Allocation::NeedsRebalance,
            Some(max) => Allocation::Weight(max + WEIGHT_INCREMENT),
        }
    }

    /// Midpoint strictly between two sibling weights, or `None` when the gap
    /// admits no strictly-between value (the insert-before path must then
    /// rebalance).
    pub fn midpoint(pre_weight: u64, next_weight: u64) -> Option<u64> {
        if next_weight <= pre_weight + 1 {
            return None;
        }
        let mid = pre_weight + (next_weight - pre_weight) / 2;
        (mid > pre_weight && mid < next_weight).then_some(mid)
    }
}
