//! Data Structures
//!
//! Core row model for tree nodes plus the id generator used when the caller
//! does not supply an id of their own.

pub mod id;
pub mod node;

pub use id::NodeIdGenerator;
pub use node::{NodeDraft, NodeKind, SubtreeDeletion, TreeNode};
