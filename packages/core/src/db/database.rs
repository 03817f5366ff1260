//! Database Connection Management
//!
//! Core database connection and schema initialization using libsql/Turso,
//! plus the point queries the tree engines compose inside transactions.
//!
//! # Architecture
//!
//! - **Single table**: the whole classification tree is one `nodes` table.
//! - **Ordering truth**: a partial UNIQUE index on
//!   `(COALESCE(parent_id, 0), sort_weight)` over live rows enforces that no
//!   two live siblings share a weight. The COALESCE is required because
//!   SQLite treats NULLs as distinct in unique indexes.
//! - **Soft delete**: rows carry `deleted_at`; every read filters on
//!   `deleted_at IS NULL`, so a deleted slot is immediately reusable.
//! - **WAL mode**: Write-Ahead Logging for better concurrency.
//!
//! # Connection pattern
//!
//! Use `connect_with_timeout()` in async functions. The 5-second busy
//! timeout lets concurrent writers wait and retry instead of failing
//! immediately with `SQLITE_BUSY`.
//!
//! # Transactions
//!
//! The query methods here take an explicit `&Connection` so that callers can
//! compose several of them inside one `BEGIN IMMEDIATE` transaction. SQLite
//! has no `SELECT ... FOR UPDATE`; `BEGIN IMMEDIATE` takes the writer lock
//! up front, which serializes concurrent rebalances of the same parent.

use crate::db::error::DatabaseError;
use crate::models::{NodeKind, TreeNode};
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Builder, Connection, Database, Row};
use std::path::PathBuf;
use std::sync::Arc;

/// Column list shared by every node SELECT (order matters for row decoding).
const NODE_COLUMNS: &str =
    "id, parent_id, node_kind, sort_weight, name, description, icon, properties, \
     created_at, modified_at";

/// Parameters for node insertion (avoids too-many-arguments lint)
pub struct DbNodeRowParams<'a> {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub kind: NodeKind,
    pub sort_weight: u64,
    pub name: &'a str,
    pub description: &'a str,
    pub icon: &'a str,
    pub properties: &'a str,
}

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use gradetree_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = DatabaseService::new(PathBuf::from("./data/gradetree.db")).await?;
///     let conn = db.connect_with_timeout().await?;
///     let roots = db.db_get_children(&conn, None).await?;
///     println!("{} top-level nodes", roots.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    /// 4. Enable SQLite features (WAL mode, foreign keys)
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Open database connection using Builder pattern
        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema().await?;

        Ok(service)
    }

    /// Get a connection handle to the database
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db
            .connect()
            .map_err(|e| DatabaseError::connection_failed(self.db_path.clone(), e))
    }

    /// Get a connection with the busy timeout applied.
    ///
    /// Always use this in async functions: the timeout makes concurrent
    /// writers wait for the database lock instead of failing immediately.
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        Ok(conn)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of
    /// execute(). This helper encapsulates that pattern.
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Uses CREATE TABLE IF NOT EXISTS throughout, so initialization is
    /// idempotent (safe to call multiple times).
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        // Enable WAL mode for better concurrency
        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        // Enable foreign key constraints
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER,
                node_kind INTEGER NOT NULL,
                sort_weight INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                icon TEXT NOT NULL DEFAULT '',
                properties JSON NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                modified_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                deleted_at DATETIME,
                FOREIGN KEY (parent_id) REFERENCES nodes(id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create nodes table: {}", e))
        })?;

        self.create_core_indexes(&conn).await?;

        Ok(())
    }

    /// Create core indexes for the nodes table
    async fn create_core_indexes(&self, conn: &Connection) -> Result<(), DatabaseError> {
        // Sibling-order uniqueness over live rows. This index is the
        // concurrency primitive: two writers racing the same weight slot
        // collide here, and the loser retries.
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_parent_weight
             ON nodes(COALESCE(parent_id, 0), sort_weight)
             WHERE deleted_at IS NULL",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create index 'idx_nodes_parent_weight': {}",
                e
            ))
        })?;

        // Index on parent_id (child scans, ancestor walks)
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create index 'idx_nodes_parent': {}",
                e
            ))
        })?;

        // Index on name (keyword search)
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create index 'idx_nodes_name': {}", e))
        })?;

        Ok(())
    }

    /// Parse a timestamp from the database - handles both SQLite and RFC3339 formats
    ///
    /// SQLite CURRENT_TIMESTAMP returns: "YYYY-MM-DD HH:MM:SS"
    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        Err(DatabaseError::row_decode(format!(
            "Unable to parse timestamp '{}' as SQLite or RFC3339 format",
            s
        )))
    }

    /// Convert a libsql Row (in NODE_COLUMNS order) to a TreeNode
    fn row_to_node(row: &Row) -> Result<TreeNode, DatabaseError> {
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get id: {}", e)))?;
        let parent_id: Option<i64> = row
            .get(1)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get parent_id: {}", e)))?;
        let kind_raw: i64 = row
            .get(2)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get node_kind: {}", e)))?;
        let sort_weight: i64 = row
            .get(3)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get sort_weight: {}", e)))?;
        let name: String = row
            .get(4)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get name: {}", e)))?;
        let description: String = row
            .get(5)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get description: {}", e)))?;
        let icon: String = row
            .get(6)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get icon: {}", e)))?;
        let properties_json: String = row
            .get(7)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get properties: {}", e)))?;
        let created_at_str: String = row
            .get(8)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get created_at: {}", e)))?;
        let modified_at_str: String = row
            .get(9)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to get modified_at: {}", e)))?;

        let kind = NodeKind::from_i64(kind_raw)
            .ok_or_else(|| DatabaseError::row_decode(format!("Unknown node_kind {}", kind_raw)))?;

        let properties: serde_json::Value = serde_json::from_str(&properties_json)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to parse properties: {}", e)))?;

        Ok(TreeNode {
            id: id as u64,
            parent_id: parent_id.map(|p| p as u64),
            kind,
            sort_weight: sort_weight as u64,
            name,
            description,
            icon,
            properties,
            created_at: Self::parse_timestamp(&created_at_str)?,
            modified_at: Self::parse_timestamp(&modified_at_str)?,
        })
    }

    /// Drain a Rows cursor into decoded nodes
    async fn collect_nodes(mut rows: libsql::Rows) -> Result<Vec<TreeNode>, DatabaseError> {
        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    //
    // NODE QUERIES (transaction-scoped: callers pass the connection)
    //

    /// Get a live node by id
    pub async fn db_get_node(
        &self,
        conn: &Connection,
        id: u64,
    ) -> Result<Option<TreeNode>, DatabaseError> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM nodes WHERE id = ? AND deleted_at IS NULL",
                NODE_COLUMNS
            ))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare get_node query: {}", e))
            })?;

        let mut rows = stmt.query([id as i64]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute get_node query: {}", e))
        })?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a live node by id, but only if it sits under the given parent
    pub async fn db_get_node_under_parent(
        &self,
        conn: &Connection,
        id: u64,
        parent_id: Option<u64>,
    ) -> Result<Option<TreeNode>, DatabaseError> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM nodes
                 WHERE id = ? AND COALESCE(parent_id, 0) = ? AND deleted_at IS NULL",
                NODE_COLUMNS
            ))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to prepare get_node_under_parent query: {}",
                    e
                ))
            })?;

        let mut rows = stmt
            .query((id as i64, parent_key(parent_id)))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to execute get_node_under_parent query: {}",
                    e
                ))
            })?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    /// All live children of a parent, ordered by sort_weight ascending
    pub async fn db_get_children(
        &self,
        conn: &Connection,
        parent_id: Option<u64>,
    ) -> Result<Vec<TreeNode>, DatabaseError> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM nodes
                 WHERE COALESCE(parent_id, 0) = ? AND deleted_at IS NULL
                 ORDER BY sort_weight ASC",
                NODE_COLUMNS
            ))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare get_children query: {}", e))
            })?;

        let rows = stmt.query([parent_key(parent_id)]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute get_children query: {}", e))
        })?;

        Self::collect_nodes(rows).await
    }

    /// The live child with the greatest sort_weight under a parent
    pub async fn db_max_weight_child(
        &self,
        conn: &Connection,
        parent_id: Option<u64>,
    ) -> Result<Option<TreeNode>, DatabaseError> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM nodes
                 WHERE COALESCE(parent_id, 0) = ? AND deleted_at IS NULL
                 ORDER BY sort_weight DESC LIMIT 1",
                NODE_COLUMNS
            ))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to prepare max_weight_child query: {}",
                    e
                ))
            })?;

        let mut rows = stmt.query([parent_key(parent_id)]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute max_weight_child query: {}", e))
        })?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    /// The live sibling immediately preceding `below_weight` under a parent
    pub async fn db_predecessor_by_weight(
        &self,
        conn: &Connection,
        parent_id: Option<u64>,
        below_weight: u64,
    ) -> Result<Option<TreeNode>, DatabaseError> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM nodes
                 WHERE COALESCE(parent_id, 0) = ? AND sort_weight < ? AND deleted_at IS NULL
                 ORDER BY sort_weight DESC LIMIT 1",
                NODE_COLUMNS
            ))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to prepare predecessor query: {}",
                    e
                ))
            })?;

        let mut rows = stmt
            .query((parent_key(parent_id), below_weight as i64))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to execute predecessor query: {}", e))
            })?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    /// Live nodes whose name contains the keyword (case-sensitive substring)
    pub async fn db_search_by_name(
        &self,
        conn: &Connection,
        keyword: &str,
    ) -> Result<Vec<TreeNode>, DatabaseError> {
        let pattern = format!("%{}%", keyword);

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM nodes
                 WHERE name LIKE ? AND deleted_at IS NULL
                 ORDER BY sort_weight ASC",
                NODE_COLUMNS
            ))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to prepare search_by_name query: {}",
                    e
                ))
            })?;

        let rows = stmt.query([pattern]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute search_by_name query: {}", e))
        })?;

        Self::collect_nodes(rows).await
    }

    //
    // NODE MUTATIONS (transaction-scoped)
    //

    /// Insert a fresh node row
    pub async fn db_insert_node(
        &self,
        conn: &Connection,
        params: DbNodeRowParams<'_>,
    ) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO nodes (id, parent_id, node_kind, sort_weight, name, description, icon, properties)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                params.id as i64,
                params.parent_id.map(|p| p as i64),
                params.kind.as_i64(),
                params.sort_weight as i64,
                params.name,
                params.description,
                params.icon,
                params.properties,
            ),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to insert node {}: {}", params.id, e))
        })?;

        Ok(())
    }

    /// Rewrite a node's display fields (upsert path; position untouched)
    pub async fn db_update_fields(
        &self,
        conn: &Connection,
        id: u64,
        kind: NodeKind,
        name: &str,
        description: &str,
        icon: &str,
        properties: &str,
    ) -> Result<u64, DatabaseError> {
        conn.execute(
            "UPDATE nodes
             SET node_kind = ?, name = ?, description = ?, icon = ?, properties = ?,
                 modified_at = CURRENT_TIMESTAMP
             WHERE id = ? AND deleted_at IS NULL",
            (kind.as_i64(), name, description, icon, properties, id as i64),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to update fields of node {}: {}", id, e))
        })
    }

    /// Rewrite a node's parent and sort weight in one statement
    pub async fn db_set_position(
        &self,
        conn: &Connection,
        id: u64,
        parent_id: Option<u64>,
        sort_weight: u64,
    ) -> Result<u64, DatabaseError> {
        conn.execute(
            "UPDATE nodes
             SET parent_id = ?, sort_weight = ?, modified_at = CURRENT_TIMESTAMP
             WHERE id = ? AND deleted_at IS NULL",
            (
                parent_id.map(|p| p as i64),
                sort_weight as i64,
                id as i64,
            ),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to reposition node {}: {}", id, e))
        })
    }

    /// Rewrite only the sort weight (rebalance path)
    pub async fn db_set_weight(
        &self,
        conn: &Connection,
        id: u64,
        sort_weight: u64,
    ) -> Result<u64, DatabaseError> {
        conn.execute(
            "UPDATE nodes
             SET sort_weight = ?, modified_at = CURRENT_TIMESTAMP
             WHERE id = ? AND deleted_at IS NULL",
            (sort_weight as i64, id as i64),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to update weight of node {}: {}",
                id, e
            ))
        })
    }

    /// Soft-delete one node. Returns the number of rows affected (0 if the
    /// node was already absent).
    pub async fn db_soft_delete(&self, conn: &Connection, id: u64) -> Result<u64, DatabaseError> {
        conn.execute(
            "UPDATE nodes
             SET deleted_at = CURRENT_TIMESTAMP
             WHERE id = ? AND deleted_at IS NULL",
            [id as i64],
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to delete node {}: {}", id, e)))
    }
}

/// Key used for sibling-set lookups: the implicit root maps to 0, matching
/// the COALESCE expression in the unique index.
fn parent_key(parent_id: Option<u64>) -> i64 {
    parent_id.map(|p| p as i64).unwrap_or(0)
}
