//! Tree Service
//!
//! The public surface of the ordered tree store: insert/upsert, positional
//! move, cascading delete, and the read paths (listing, keyword search with
//! ancestor context, existence probes).
//!
//! # Concurrency
//!
//! Every mutation runs inside one `BEGIN IMMEDIATE` transaction. Conflicts
//! are handled optimistically: a uniqueness violation on the
//! `(parent, sort_weight)` index means another writer raced the same slot,
//! and the whole transaction is retried with a freshly computed weight. A
//! closed gap (no midpoint available, or weight-space overflow) aborts the
//! transaction, rebalances the sibling set in its own transaction, and
//! retries the operation.
//!
//! Both retry budgets are small and fixed: 3 attempts per operation, 2
//! rebalances per operation. Retries after the first sleep a uniformly
//! jittered 100-400 ms to reduce thundering-herd contention. A sibling set
//! that still has no usable gap after the rebalance budget is treated as a
//! capacity error, not retried forever.

use crate::db::database::DbNodeRowParams;
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{NodeDraft, NodeIdGenerator, SubtreeDeletion, TreeNode};
use crate::ordering::{Allocation, Rebalancer, WeightAllocator};
use crate::services::assembler::SearchNode;
use crate::services::error::TreeServiceError;
use crate::services::validate::{CycleGuard, DepthValidator};
use libsql::Connection;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Duration;

/// Total attempts per public mutation (first try included).
const MAX_ATTEMPTS: u32 = 3;

/// Rebalances one operation may trigger before giving up.
const MAX_REBALANCE_ATTEMPTS: u32 = 2;

const BACKOFF_MIN_MS: u64 = 100;
const BACKOFF_MAX_MS: u64 = 400;

/// Outcome of one transactional move attempt.
enum Attempt {
    Done,
    /// Gap closed or weight space overflowed; rebalance the destination
    /// sibling set and run the attempt again.
    NeedsRebalance,
}

/// Outcome of one transactional insert attempt.
enum InsertAttempt {
    Done(u64),
    NeedsRebalance,
}

/// Ordered tree store operations.
///
/// # Examples
///
/// ```no_run
/// use gradetree_core::db::DatabaseService;
/// use gradetree_core::models::{NodeDraft, NodeKind};
/// use gradetree_core::services::TreeService;
/// use std::path::PathBuf;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = Arc::new(DatabaseService::new(PathBuf::from("./data/tree.db")).await?);
///     let service = TreeService::new(db);
///
///     let group = service
///         .insert_node(NodeDraft::new(NodeKind::Group, "Finance", None), 4)
///         .await?;
///     let leaf = service
///         .insert_node(NodeDraft::new(NodeKind::Leaf, "Salary data", Some(group)), 4)
///         .await?;
///
///     // Move the leaf to the front of its sibling set later on:
///     // service.move_node(leaf, Some(group), Some(first_sibling), 4).await?;
///     let _ = leaf;
///     Ok(())
/// }
/// ```
pub struct TreeService {
    db: Arc<DatabaseService>,
    ids: NodeIdGenerator,
}

impl TreeService {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self {
            db,
            ids: NodeIdGenerator::new(),
        }
    }

    //
    // TRANSACTION HELPERS
    //

    async fn begin(&self, conn: &Connection) -> Result<(), TreeServiceError> {
        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e))
        })?;
        Ok(())
    }

    async fn commit(&self, conn: &Connection) -> Result<(), TreeServiceError> {
        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::sql_execution(format!(
                "Failed to commit transaction: {}",
                e
            ))
            .into());
        }
        Ok(())
    }

    /// Best effort; a failed rollback leaves the connection to be dropped.
    async fn rollback(&self, conn: &Connection) {
        let _ = conn.execute("ROLLBACK", ()).await;
    }

    async fn backoff(&self) {
        let ms = rand::thread_rng().gen_range(BACKOFF_MIN_MS..=BACKOFF_MAX_MS);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Rebalance one parent's sibling set in its own transaction.
    async fn rebalance_parent(&self, parent_id: Option<u64>) -> Result<u64, TreeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        self.begin(&conn).await?;
        match Rebalancer::rebalance(&self.db, &conn, parent_id).await {
            Ok(fringe) => {
                self.commit(&conn).await?;
                Ok(fringe)
            }
            Err(e) => {
                self.rollback(&conn).await;
                Err(e.into())
            }
        }
    }

    //
    // INSERT / UPSERT
    //

    /// Create a new node, or upsert an existing one when the draft carries
    /// an id that names a live row. Returns the node's id.
    ///
    /// On upsert the current position is preserved unless the parent
    /// changed, in which case the node is appended under the new parent
    /// with the same cycle and subtree-depth checks as [`Self::move_node`].
    /// The ancestor chain is validated against `max_layer` and the
    /// group-nesting budget as part of the same transaction.
    pub async fn insert_node(
        &self,
        draft: NodeDraft,
        max_layer: u64,
    ) -> Result<u64, TreeServiceError> {
        let mut attempts = 0u32;
        let mut rebalances = 0u32;

        loop {
            let conn = self.db.connect_with_timeout().await?;
            self.begin(&conn).await?;

            match self.insert_in_txn(&conn, &draft, max_layer).await {
                Ok(InsertAttempt::Done(id)) => {
                    self.commit(&conn).await?;
                    return Ok(id);
                }
                Ok(InsertAttempt::NeedsRebalance) => {
                    self.rollback(&conn).await;
                    if rebalances >= MAX_REBALANCE_ATTEMPTS {
                        return Err(TreeServiceError::CapacityExhausted {
                            parent_id: draft.parent_id,
                        });
                    }
                    self.rebalance_parent(draft.parent_id).await?;
                    rebalances += 1;
                    tracing::debug!(
                        parent_id = ?draft.parent_id,
                        rebalances,
                        "retrying insert after rebalance"
                    );
                }
                Err(e) if e.is_transient() => {
                    self.rollback(&conn).await;
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Err(TreeServiceError::internal(format!(
                            "retry budget exhausted inserting under parent {:?}",
                            draft.parent_id
                        )));
                    }
                    tracing::debug!(
                        parent_id = ?draft.parent_id,
                        attempts,
                        error = %e,
                        "transient conflict during insert, retrying"
                    );
                    if attempts > 1 {
                        self.backoff().await;
                    }
                }
                Err(e) => {
                    self.rollback(&conn).await;
                    return Err(e);
                }
            }
        }
    }

    async fn insert_in_txn(
        &self,
        conn: &Connection,
        draft: &NodeDraft,
        max_layer: u64,
    ) -> Result<InsertAttempt, TreeServiceError> {
        if let Some(parent) = draft.parent_id {
            if self.db.db_get_node(conn, parent).await?.is_none() {
                return Err(TreeServiceError::NotFound { id: parent });
            }
        }

        let properties = serde_json::to_string(&draft.properties).map_err(|e| {
            TreeServiceError::internal(format!("Failed to serialize properties: {}", e))
        })?;

        if let Some(id) = draft.id {
            if let Some(existing) = self.db.db_get_node(conn, id).await? {
                // Upsert: keep the current position unless the parent changed.
                // A parent change is a move in disguise, so it gets the same
                // cycle guard and whole-subtree depth validation as move_node.
                let reparented = existing.parent_id != draft.parent_id;
                if reparented {
                    CycleGuard::ensure_no_cycle(&self.db, conn, id, draft.parent_id).await?;
                    let max_child = self.db.db_max_weight_child(conn, draft.parent_id).await?;
                    let weight =
                        match WeightAllocator::allocate_append(max_child.map(|c| c.sort_weight)) {
                            Allocation::NeedsRebalance => return Ok(InsertAttempt::NeedsRebalance),
                            Allocation::Weight(weight) => weight,
                        };
                    self.db
                        .db_set_position(conn, id, draft.parent_id, weight)
                        .await?;
                }
                self.db
                    .db_update_fields(
                        conn,
                        id,
                        draft.kind,
                        &draft.name,
                        &draft.description,
                        &draft.icon,
                        &properties,
                    )
                    .await?;
                if reparented {
                    DepthValidator::validate_move(
                        &self.db,
                        conn,
                        id,
                        draft.kind,
                        draft.parent_id,
                        max_layer,
                    )
                    .await?;
                } else {
                    DepthValidator::validate_insert(
                        &self.db,
                        conn,
                        draft.parent_id,
                        draft.kind,
                        max_layer,
                    )
                    .await?;
                }
                return Ok(InsertAttempt::Done(id));
            }
        }

        let id = match draft.id {
            Some(id) => id,
            None => self.ids.next_id(),
        };

        let max_child = self.db.db_max_weight_child(conn, draft.parent_id).await?;
        let weight = match WeightAllocator::allocate_append(max_child.map(|c| c.sort_weight)) {
            Allocation::NeedsRebalance => return Ok(InsertAttempt::NeedsRebalance),
            Allocation::Weight(weight) => weight,
        };

        self.db
            .db_insert_node(
                conn,
                DbNodeRowParams {
                    id,
                    parent_id: draft.parent_id,
                    kind: draft.kind,
                    sort_weight: weight,
                    name: &draft.name,
                    description: &draft.description,
                    icon: &draft.icon,
                    properties: &properties,
                },
            )
            .await?;

        DepthValidator::validate_insert(&self.db, conn, draft.parent_id, draft.kind, max_layer)
            .await?;

        Ok(InsertAttempt::Done(id))
    }

    //
    // MOVE
    //

    /// Move a node under `dest_parent_id`.
    ///
    /// With `next_id = Some(n)` the node lands immediately before `n` (which
    /// must be a live child of the destination parent); with `None` it lands
    /// at the tail. Moving a node to the position it already occupies is a
    /// no-op that performs zero writes.
    pub async fn move_node(
        &self,
        id: u64,
        dest_parent_id: Option<u64>,
        next_id: Option<u64>,
        max_layer: u64,
    ) -> Result<(), TreeServiceError> {
        let mut attempts = 0u32;
        let mut rebalances = 0u32;

        loop {
            let conn = self.db.connect_with_timeout().await?;
            self.begin(&conn).await?;

            let outcome = match next_id {
                Some(next) => {
                    self.move_before_in_txn(&conn, id, dest_parent_id, next, max_layer)
                        .await
                }
                None => {
                    self.move_to_tail_in_txn(&conn, id, dest_parent_id, max_layer)
                        .await
                }
            };

            match outcome {
                Ok(Attempt::Done) => {
                    self.commit(&conn).await?;
                    return Ok(());
                }
                Ok(Attempt::NeedsRebalance) => {
                    self.rollback(&conn).await;
                    if rebalances >= MAX_REBALANCE_ATTEMPTS {
                        return Err(TreeServiceError::CapacityExhausted {
                            parent_id: dest_parent_id,
                        });
                    }
                    self.rebalance_parent(dest_parent_id).await?;
                    rebalances += 1;
                    tracing::debug!(
                        id,
                        parent_id = ?dest_parent_id,
                        rebalances,
                        "retrying move after rebalance"
                    );
                }
                Err(e) if e.is_transient() => {
                    self.rollback(&conn).await;
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Err(TreeServiceError::internal(format!(
                            "retry budget exhausted moving node {}",
                            id
                        )));
                    }
                    tracing::debug!(
                        id,
                        attempts,
                        error = %e,
                        "transient conflict during move, retrying"
                    );
                    if attempts > 1 {
                        self.backoff().await;
                    }
                }
                Err(e) => {
                    self.rollback(&conn).await;
                    return Err(e);
                }
            }
        }
    }

    /// Insert-before-sibling policy: midpoint of the two neighbour weights.
    async fn move_before_in_txn(
        &self,
        conn: &Connection,
        id: u64,
        dest_parent_id: Option<u64>,
        next_id: u64,
        max_layer: u64,
    ) -> Result<Attempt, TreeServiceError> {
        CycleGuard::ensure_no_cycle(&self.db, conn, id, dest_parent_id).await?;

        if next_id == id {
            return Ok(Attempt::Done);
        }

        let node = self
            .db
            .db_get_node(conn, id)
            .await?
            .ok_or(TreeServiceError::NotFound { id })?;

        let next = self
            .db
            .db_get_node_under_parent(conn, next_id, dest_parent_id)
            .await?
            .ok_or(TreeServiceError::NotFound { id: next_id })?;

        let pre = self
            .db
            .db_predecessor_by_weight(conn, dest_parent_id, next.sort_weight)
            .await?;
        if let Some(ref pre) = pre {
            if pre.id == id {
                // Already immediately before the target sibling.
                return Ok(Attempt::Done);
            }
        }
        let pre_weight = pre.map(|p| p.sort_weight).unwrap_or(0);

        let Some(mid) = WeightAllocator::midpoint(pre_weight, next.sort_weight) else {
            return Ok(Attempt::NeedsRebalance);
        };

        self.db.db_set_position(conn, id, dest_parent_id, mid).await?;

        DepthValidator::validate_move(&self.db, conn, id, node.kind, dest_parent_id, max_layer)
            .await?;

        Ok(Attempt::Done)
    }

    /// Insert-at-tail policy: append semantics via the weight allocator.
    async fn move_to_tail_in_txn(
        &self,
        conn: &Connection,
        id: u64,
        dest_parent_id: Option<u64>,
        max_layer: u64,
    ) -> Result<Attempt, TreeServiceError> {
        CycleGuard::ensure_no_cycle(&self.db, conn, id, dest_parent_id).await?;

        let node = self
            .db
            .db_get_node(conn, id)
            .await?
            .ok_or(TreeServiceError::NotFound { id })?;

        if let Some(parent) = dest_parent_id {
            if self.db.db_get_node(conn, parent).await?.is_none() {
                return Err(TreeServiceError::NotFound { id: parent });
            }
        }

        let max_child = self.db.db_max_weight_child(conn, dest_parent_id).await?;
        if let Some(ref max_child) = max_child {
            if max_child.id == id {
                // Already the tail of the destination sibling set.
                return Ok(Attempt::Done);
            }
        }

        match WeightAllocator::allocate_append(max_child.map(|c| c.sort_weight)) {
            Allocation::NeedsRebalance => Ok(Attempt::NeedsRebalance),
            Allocation::Weight(weight) => {
                self.db
                    .db_set_position(conn, id, dest_parent_id, weight)
                    .await?;
                DepthValidator::validate_move(
                    &self.db,
                    conn,
                    id,
                    node.kind,
                    dest_parent_id,
                    max_layer,
                )
                .await?;
                Ok(Attempt::Done)
            }
        }
    }

    //
    // CASCADING DELETE
    //

    /// Remove a node and every live descendant in one transaction.
    ///
    /// Idempotent: deleting an absent node reports `existed: false` rather
    /// than erroring.
    pub async fn delete_subtree(&self, id: u64) -> Result<SubtreeDeletion, TreeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        self.begin(&conn).await?;

        match self.delete_in_txn(&conn, id).await {
            Ok(result) => {
                self.commit(&conn).await?;
                if result.existed {
                    tracing::debug!(id, removed = result.removed_ids.len(), "deleted subtree");
                }
                Ok(result)
            }
            Err(e) => {
                self.rollback(&conn).await;
                Err(e)
            }
        }
    }

    async fn delete_in_txn(
        &self,
        conn: &Connection,
        id: u64,
    ) -> Result<SubtreeDeletion, TreeServiceError> {
        if self.db.db_get_node(conn, id).await?.is_none() {
            return Ok(SubtreeDeletion {
                removed_ids: Vec::new(),
                existed: false,
            });
        }

        // Breadth-first frontier expansion until a layer comes back empty.
        let mut removed_ids = vec![id];
        let mut frontier = vec![id];
        while !frontier.is_empty() {
            let mut next_layer = Vec::new();
            for parent in &frontier {
                for child in self.db.db_get_children(conn, Some(*parent)).await? {
                    next_layer.push(child.id);
                }
            }
            removed_ids.extend(&next_layer);
            frontier = next_layer;
        }

        let mut affected = 0u64;
        for removed in &removed_ids {
            affected += self.db.db_soft_delete(conn, *removed).await?;
        }

        Ok(SubtreeDeletion {
            removed_ids,
            existed: affected > 0,
        })
    }

    //
    // READ PATHS (lock-free: no write transaction taken)
    //

    /// Live children of a parent, ordered by sort weight.
    pub async fn list_children(
        &self,
        parent_id: Option<u64>,
    ) -> Result<Vec<TreeNode>, TreeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(self.db.db_get_children(&conn, parent_id).await?)
    }

    /// Display name of a node.
    pub async fn node_name(&self, id: u64) -> Result<String, TreeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let node = self
            .db
            .db_get_node(&conn, id)
            .await?
            .ok_or(TreeServiceError::NotFound { id })?;
        Ok(node.name)
    }

    /// Whether a live node with this id sits directly under the parent.
    pub async fn exists_under_parent(
        &self,
        id: u64,
        parent_id: Option<u64>,
    ) -> Result<bool, TreeServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(self
            .db
            .db_get_node_under_parent(&conn, id, parent_id)
            .await?
            .is_some())
    }

    /// Keyword search with ancestor context.
    ///
    /// Returns the flat superset of {name hits} ∪ {their ancestors}, plus
    /// one generation of children for hits at the match boundary. Callers
    /// assemble the nested structure with [`crate::services::TreeAssembler`].
    pub async fn search_with_ancestors(
        &self,
        keyword: &str,
    ) -> Result<Vec<SearchNode>, TreeServiceError> {
        let conn = self.db.connect_with_timeout().await?;

        let hits = self.db.db_search_by_name(&conn, keyword).await?;
        let hit_ids: HashSet<u64> = hits.iter().map(|n| n.id).collect();

        let mut collected: HashMap<u64, TreeNode> = HashMap::new();
        let mut pending: Vec<u64> = Vec::new();
        for hit in hits {
            if let Some(parent) = hit.parent_id {
                pending.push(parent);
            }
            collected.insert(hit.id, hit);
        }

        // Fetch each hit's ancestor chain until reaching nodes already
        // collected. A missing intermediate stops that chain's walk.
        while let Some(cur) = pending.pop() {
            if collected.contains_key(&cur) {
                continue;
            }
            let Some(node) = self.db.db_get_node(&conn, cur).await? else {
                continue;
            };
            if let Some(parent) = node.parent_id {
                if !collected.contains_key(&parent) {
                    pending.push(parent);
                }
            }
            collected.insert(cur, node);
        }

        // A hit whose parent is not itself a hit is the match boundary: it
        // is not auto-expanded, but carries one generation of children so a
        // UI can show its immediate contents on demand.
        let boundary: Vec<u64> = hit_ids
            .iter()
            .copied()
            .filter(|hit_id| {
                collected
                    .get(hit_id)
                    .and_then(|n| n.parent_id)
                    .map_or(true, |parent| !hit_ids.contains(&parent))
            })
            .collect();

        for hit_id in &boundary {
            for child in self.db.db_get_children(&conn, Some(*hit_id)).await? {
                collected.entry(child.id).or_insert(child);
            }
        }

        let boundary: HashSet<u64> = boundary.into_iter().collect();
        let mut results: Vec<SearchNode> = collected
            .into_values()
            .map(|node| {
                let is_hit = hit_ids.contains(&node.id);
                let default_expanded = !boundary.contains(&node.id);
                SearchNode {
                    node,
                    is_hit,
                    default_expanded,
                }
            })
            .collect();
        results.sort_by_key(|r| (r.node.parent_id.unwrap_or(0), r.node.sort_weight));

        Ok(results)
    }
}

// Comprehensive tests in separate modules
#[cfg(test)]
#[path = "tree_service_test.rs"]
mod tree_service_test;

#[cfg(test)]
#[path = "tree_service_move_test.rs"]
mod tree_service_move_test;
