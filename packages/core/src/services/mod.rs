//! Business Services
//!
//! This module contains the tree engine and its supporting pieces:
//!
//! - `TreeService` - insert/move/delete/search operations with bounded retry
//! - `TreeAssembler` - flat-row to nested-tree reconstruction
//! - validation helpers - cycle and depth/group-nesting guards
//!
//! Services coordinate between the database layer and the ordering algebra,
//! keeping every mutation inside one transaction.

pub mod assembler;
pub mod error;
pub mod tree_service;
pub(crate) mod validate;

pub use assembler::{SearchNode, TreeAssembler, TreeView};
pub use error::TreeServiceError;
pub use tree_service::TreeService;
pub use validate::MAX_GROUP_LAYER;
