//! Sibling Ordering
//!
//! The gap sort-key algebra: weight constants, append/midpoint allocation,
//! and the online rebalancer that renumbers a sibling set when gaps run out.

pub mod rebalance;
pub mod weight;

pub use rebalance::{RebalanceError, Rebalancer};
pub use weight::{Allocation, WeightAllocator, WEIGHT_INCREMENT, WEIGHT_MAX, WEIGHT_START};
