//! Gradetree Core - Ordered Tree Store
//!
//! This crate maintains a mutable hierarchical classification tree (data-grade
//! labels) inside a single relational table, keeping siblings totally ordered
//! without renumbering the whole sibling set on every insert.
//!
//! # Architecture
//!
//! - **Gap sort keys**: siblings carry a `sort_weight`; new appends land at
//!   `max + increment`, positional moves take the midpoint of the two
//!   neighbouring weights. Renumbering happens only when a gap closes.
//! - **libsql/Turso**: embedded SQLite-compatible database; a partial unique
//!   index on `(parent, sort_weight)` is the single source of ordering truth.
//! - **Optimistic concurrency**: writers run in short `BEGIN IMMEDIATE`
//!   transactions and retry a bounded number of times on conflict.
//!
//! # Modules
//!
//! - [`models`] - Data structures (TreeNode, NodeDraft, id generation)
//! - [`ordering`] - Weight allocation and sibling rebalancing
//! - [`services`] - TreeService (insert/move/delete/search) and tree assembly
//! - [`db`] - Database layer with libsql integration

pub mod db;
pub mod models;
pub mod ordering;
pub mod services;

// Re-export commonly used types
pub use models::*;
pub use services::*;
