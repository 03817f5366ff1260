//! Tree Node Data Structures
//!
//! This module defines the `TreeNode` row model and related types for the
//! classification tree.
//!
//! # Architecture
//!
//! - **One row per node**: the whole tree lives in a single `nodes` table.
//! - **Option-typed parent**: `parent_id = None` means "attached directly
//!   under the implicit root"; the implicit root is never a stored row.
//! - **Opaque properties**: leaf-only attributes (sensitivity flags, sharing
//!   policy) travel in a JSON `properties` field and are passed through
//!   unchanged by the tree engine.
//!
//! # Examples
//!
//! ```rust
//! use gradetree_core::models::{NodeDraft, NodeKind};
//! use serde_json::json;
//!
//! // A group attached under the implicit root
//! let group = NodeDraft::new(NodeKind::Group, "Finance", None);
//!
//! // A leaf with passthrough attributes
//! let leaf = NodeDraft::new(NodeKind::Leaf, "Salary data", Some(42))
//!     .with_properties(json!({ "sensitive": true, "sharePolicy": "internal" }));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a tree node.
///
/// Groups are containers that count toward a separate, stricter nesting-depth
/// budget than ordinary leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Leaf = 1,
    Group = 2,
}

impl NodeKind {
    /// Integer form stored in the `node_kind` column.
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Parse the stored integer form. Unknown values are rejected.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Leaf),
            2 => Some(Self::Group),
            _ => None,
        }
    }

    pub fn is_group(self) -> bool {
        matches!(self, Self::Group)
    }
}

/// One live row of the classification tree.
///
/// # Fields
///
/// - `id`: globally unique, roughly monotonic 64-bit identifier
/// - `parent_id`: containing node, `None` = under the implicit root
/// - `kind`: leaf or group
/// - `sort_weight`: position among siblings (lower sorts first, gaps are
///   intentional and not required to be contiguous)
/// - `name` / `description` / `icon`: display fields, opaque to the engine
/// - `properties`: leaf-only attributes as pure JSON, opaque to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Unique identifier (snowflake-style, assigned outside the tree algebra)
    pub id: u64,

    /// Parent node id; `None` means attached under the implicit root
    pub parent_id: Option<u64>,

    /// Leaf or group
    pub kind: NodeKind,

    /// Position among siblings; unique per live sibling set
    pub sort_weight: u64,

    /// Display name (also the keyword-search target)
    pub name: String,

    /// Free-form description
    pub description: String,

    /// Icon reference
    pub icon: String,

    /// Entity-specific passthrough fields (pure JSON)
    pub properties: serde_json::Value,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,
}

/// Input for creating or upserting a node.
///
/// When `id` is present and names an existing row, the insert path becomes an
/// upsert: display fields are rewritten, and the current position is kept
/// unless the parent changed (a parent change re-appends under the new
/// parent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDraft {
    /// Caller-supplied id; `None` lets the service assign a fresh one
    pub id: Option<u64>,

    /// Destination parent; `None` = under the implicit root
    pub parent_id: Option<u64>,

    pub kind: NodeKind,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub properties: serde_json::Value,
}

impl NodeDraft {
    /// Create a draft with empty display fields and `{}` properties.
    pub fn new(kind: NodeKind, name: impl Into<String>, parent_id: Option<u64>) -> Self {
        Self {
            id: None,
            parent_id,
            kind,
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            properties: serde_json::json!({}),
        }
    }

    /// Target an existing row (upsert path).
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Result of a cascading subtree deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtreeDeletion {
    /// Every id removed, root of the subtree first, then layer by layer
    pub removed_ids: Vec<u64>,

    /// Whether any live row was actually affected (absent node = `false`,
    /// not an error)
    pub existed: bool,
}
