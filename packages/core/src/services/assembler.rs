//! Tree Assembly
//!
//! Reconstructs the nested parent/children structure from a flat set of
//! rows. Pure computation: the flat set comes from `list` or keyword-search
//! queries, and may be a pruned superset of the tree (hits plus ancestors),
//! so a node whose parent is absent from the set is treated as a root.

use crate::models::TreeNode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One node of an assembled tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeView {
    pub node: TreeNode,
    /// Whether the node has at least one child in the assembled set
    pub expandable: bool,
    pub children: Vec<TreeView>,
}

/// Flat search-result row: a tree node plus its role in the result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchNode {
    pub node: TreeNode,
    /// The node's name matched the keyword
    pub is_hit: bool,
    /// Whether a UI should auto-expand this node's children. Hits at the
    /// match boundary (parent not itself a hit) are not auto-expanded.
    pub default_expanded: bool,
}

/// Groups flat rows into parent -> children adjacency and builds the nested
/// structure.
pub struct TreeAssembler;

impl TreeAssembler {
    /// Build the nested tree from a flat node set.
    ///
    /// Children are ordered by `sort_weight`; a node is a root of the output
    /// when it has no parent or its parent is not part of the set.
    pub fn assemble(nodes: Vec<TreeNode>) -> Vec<TreeView> {
        let ids: HashSet<u64> = nodes.iter().map(|n| n.id).collect();

        let mut roots: Vec<TreeNode> = Vec::new();
        let mut by_parent: HashMap<u64, Vec<TreeNode>> = HashMap::new();

        for node in nodes {
            match node.parent_id {
                Some(parent) if ids.contains(&parent) => {
                    by_parent.entry(parent).or_default().push(node);
                }
                _ => roots.push(node),
            }
        }

        roots.sort_by_key(|n| n.sort_weight);
        for children in by_parent.values_mut() {
            children.sort_by_key(|n| n.sort_weight);
        }

        roots
            .into_iter()
            .map(|root| Self::build(root, &mut by_parent))
            .collect()
    }

    fn build(node: TreeNode, by_parent: &mut HashMap<u64, Vec<TreeNode>>) -> TreeView {
        let children: Vec<TreeView> = by_parent
            .remove(&node.id)
            .unwrap_or_default()
            .into_iter()
            .map(|child| Self::build(child, by_parent))
            .collect();

        TreeView {
            expandable: !children.is_empty(),
            node,
            children,
        }
    }
}
