//! Tree Store - Parent-Pointer Forest Engine
//!
//! This module implements the generic tree engine shared by every Canopy
//! hierarchy (content folders, user groups). Nodes live in the shared
//! `nodes` table, disjoint per domain; each `TreeStore` instance is scoped
//! to one domain and parameterized by that domain's deletion hook.
//!
//! # Invariants
//!
//! Checked transactionally on every mutation:
//!
//! 1. **Acyclicity**: following `parent_id` from any node terminates at a
//!    forest root.
//! 2. **Referential integrity**: a non-null `parent_id` references an
//!    existing node in the same domain at the time of write.
//! 3. **Single ownership**: only this store writes `parent_id`; domain
//!    services never touch it directly.
//!
//! # Concurrency
//!
//! Every mutating operation (`create_node`, `reparent`, `delete_subtree`)
//! runs its check-then-write sequence inside a single `BEGIN IMMEDIATE`
//! transaction. The immediate transaction takes SQLite's write lock up
//! front, so no other writer can interleave between the existence/cycle
//! check and the `parent_id` write - two racing reparents serialize, and the
//! loser re-checks against the winner's committed state. A lock that cannot
//! be acquired within the busy timeout surfaces as
//! [`TreeStoreError::TransactionConflict`]; the store never retries on its
//! own.
//!
//! Read-only operations run without a transaction; a stale read is
//! acceptable for display purposes.
//!
//! # Defensive traversal
//!
//! Descendant and ancestor traversals are bounded by a visited set rather
//! than trusting acyclicity: the invariant is enforced on write, but a read
//! must not loop forever if storage was ever corrupted by a bug or a manual
//! edit. A revisit is logged and skipped.
//!
//! # Examples
//!
//! ```no_run
//! use canopy_core::db::DatabaseService;
//! use canopy_core::tree::{DeletionHook, TreeStore};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # struct NoHook;
//! # #[async_trait::async_trait]
//! # impl DeletionHook for NoHook {
//! #     async fn delete_owned(
//! #         &self,
//! #         _conn: &libsql::Connection,
//! #         _ids: &[String],
//! #     ) -> Result<(), canopy_core::db::DatabaseError> {
//! #         Ok(())
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Arc::new(DatabaseService::new(PathBuf::from("./data/canopy.db")).await?);
//!     let tree = TreeStore::new(db, "content", Arc::new(NoHook));
//!
//!     let root = tree.create_node("folder-1", None).await?;
//!     tree.create_node("folder-2", Some(&root.id)).await?;
//!     let ids = tree.get_descendant_ids(&root.id).await?;
//!     assert_eq!(ids.len(), 2);
//!     Ok(())
//! }
//! ```

use crate::db::{DatabaseError, DatabaseService};
use crate::models::{DeleteResult, Node};
use crate::tree::error::TreeStoreError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Connection, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bound variables used per `IN (...)` batch.
///
/// SQLite's default host-parameter limit is 999; staying well below leaves
/// room for the extra parameters in each statement.
pub(crate) const IN_BATCH_SIZE: usize = 500;

/// Domain-supplied cascading-delete hook.
///
/// Invoked exactly once per [`TreeStore::delete_subtree`] call, inside the
/// same transaction that removes the node rows, with the full doomed id set
/// (subtree root plus all descendants). The implementation must delete every
/// domain payload row and leaf row referencing any of those ids, using the
/// supplied connection so the work commits or rolls back with the node
/// deletion.
#[async_trait]
pub trait DeletionHook: Send + Sync {
    /// Delete all domain-owned rows referencing any id in `ids`.
    async fn delete_owned(
        &self,
        conn: &libsql::Connection,
        ids: &[String],
    ) -> Result<(), DatabaseError>;
}

/// Domain-scoped parent-pointer tree engine over the shared `nodes` table.
///
/// Construction registers the domain's deletion hook; there is exactly one
/// hook per instance, supplied once at startup by the owning service.
pub struct TreeStore {
    /// Underlying database service (connections + schema)
    db: Arc<DatabaseService>,

    /// Domain discriminator; rows of different domains never interact
    domain: &'static str,

    /// Cascading-delete hook for this domain's payload rows
    deletion_hook: Arc<dyn DeletionHook>,
}

impl TreeStore {
    /// Create a tree store scoped to `domain`, registering the domain's
    /// deletion hook.
    pub fn new(
        db: Arc<DatabaseService>,
        domain: &'static str,
        deletion_hook: Arc<dyn DeletionHook>,
    ) -> Self {
        Self {
            db,
            domain,
            deletion_hook,
        }
    }

    /// The domain this store is scoped to.
    pub fn domain(&self) -> &'static str {
        self.domain
    }

    /// Parse a timestamp from the database - handles both SQLite and
    /// RFC 3339 formats.
    ///
    /// SQLite CURRENT_TIMESTAMP returns "YYYY-MM-DD HH:MM:SS"; imported
    /// data might use RFC 3339.
    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        Err(DatabaseError::sql_execution(format!(
            "Unable to parse timestamp '{}' as SQLite or RFC 3339 format",
            s
        )))
    }

    /// Convert a `libsql::Row` to a Node.
    ///
    /// Expected columns (in order): id, parent_id, created_at, modified_at.
    fn row_to_node(row: &Row) -> Result<Node, DatabaseError> {
        let id: String = row
            .get(0)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get id: {}", e)))?;
        let parent_id: Option<String> = row
            .get(1)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get parent_id: {}", e)))?;
        let created_at_str: String = row
            .get(2)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get created_at: {}", e)))?;
        let modified_at_str: String = row.get(3).map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to get modified_at: {}", e))
        })?;

        Ok(Node {
            id,
            parent_id,
            created_at: Self::parse_timestamp(&created_at_str)?,
            modified_at: Self::parse_timestamp(&modified_at_str)?,
        })
    }

    /// Map a statement failure to `TransactionConflict` when the database
    /// was locked, or to a plain database fault otherwise.
    fn lock_error(context: &str, e: libsql::Error) -> TreeStoreError {
        let msg = e.to_string();
        if msg.contains("locked") || msg.contains("busy") {
            TreeStoreError::transaction_conflict(format!("{}: {}", context, msg))
        } else {
            TreeStoreError::Database(DatabaseError::sql_execution(format!(
                "Failed to {}: {}",
                context, msg
            )))
        }
    }

    /// Open the single write transaction every mutation runs in.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front so the subsequent
    /// check-then-write sequence cannot interleave with another writer.
    async fn begin_immediate(&self, conn: &Connection) -> Result<(), TreeStoreError> {
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map(|_| ())
            .map_err(|e| Self::lock_error("begin transaction", e))
    }

    async fn commit(&self, conn: &Connection) -> Result<(), TreeStoreError> {
        conn.execute("COMMIT", ())
            .await
            .map(|_| ())
            .map_err(|e| Self::lock_error("commit transaction", e))
    }

    async fn rollback(conn: &Connection) {
        // Rollback failures are not actionable; the connection is dropped
        // right after and SQLite discards the open transaction with it.
        let _ = conn.execute("ROLLBACK", ()).await;
    }

    //
    // ROW HELPERS (shared by plain reads and in-transaction checks)
    //

    async fn get_node_on(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<Option<Node>, DatabaseError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, parent_id, created_at, modified_at
                 FROM nodes WHERE domain = ? AND id = ?",
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare node lookup: {}", e))
            })?;

        let mut rows = stmt.query((self.domain, id)).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query node {}: {}", id, e))
        })?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch node row: {}", e)))?
        {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    async fn exists_on(&self, conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
        let mut stmt = conn
            .prepare("SELECT 1 FROM nodes WHERE domain = ? AND id = ? LIMIT 1")
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare existence check: {}", e))
            })?;

        let mut rows = stmt.query((self.domain, id)).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to check node {}: {}", id, e))
        })?;

        Ok(rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
            .is_some())
    }

    /// Breadth-first descendant closure starting at (and including) `id`.
    ///
    /// Frontier-batched `IN` queries keep round trips proportional to tree
    /// depth, not node count. The visited set bounds the walk even if
    /// storage already holds a cycle.
    async fn descendant_ids_on(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut order: Vec<String> = Vec::new();

        visited.insert(id.to_string());
        order.push(id.to_string());

        let mut frontier = vec![id.to_string()];
        while !frontier.is_empty() {
            let mut next = Vec::new();

            for chunk in frontier.chunks(IN_BATCH_SIZE) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT id FROM nodes WHERE domain = ? AND parent_id IN ({})",
                    placeholders
                );

                let params = libsql::params_from_iter(
                    std::iter::once(self.domain.to_string()).chain(chunk.iter().cloned()),
                );

                let mut rows = conn.query(&sql, params).await.map_err(|e| {
                    DatabaseError::sql_execution(format!(
                        "Failed to query children of frontier: {}",
                        e
                    ))
                })?;

                while let Some(row) = rows.next().await.map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to fetch child row: {}", e))
                })? {
                    let child: String = row.get(0).map_err(|e| {
                        DatabaseError::sql_execution(format!("Failed to get child id: {}", e))
                    })?;

                    if visited.insert(child.clone()) {
                        order.push(child.clone());
                        next.push(child);
                    } else {
                        // Single-parent rows can only produce a revisit if
                        // the stored chain loops back on itself.
                        warn!(
                            domain = self.domain,
                            node = %child,
                            "descendant traversal revisited a node; storage may contain a cycle"
                        );
                    }
                }
            }

            frontier = next;
        }

        Ok(order)
    }

    //
    // READ OPERATIONS
    //

    /// Get a node by id.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` if no node with `id` exists in this domain.
    pub async fn get_node(&self, id: &str) -> Result<Node, TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;
        self.get_node_on(&conn, id)
            .await?
            .ok_or_else(|| TreeStoreError::node_not_found(id))
    }

    /// Get a node's parent, or `None` for a forest root.
    ///
    /// Every store round trip is an explicit call here - there is no
    /// implicit property access that quietly queries on read.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` if `id` itself does not exist.
    pub async fn get_parent(&self, id: &str) -> Result<Option<Node>, TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;
        let node = self
            .get_node_on(&conn, id)
            .await?
            .ok_or_else(|| TreeStoreError::node_not_found(id))?;

        match node.parent_id {
            Some(parent_id) => Ok(self.get_node_on(&conn, &parent_id).await?),
            None => Ok(None),
        }
    }

    /// Get the direct children of `parent_id`.
    ///
    /// Returns an empty vec - not an error - when the node has no children
    /// or does not exist.
    pub async fn get_children(&self, parent_id: &str) -> Result<Vec<Node>, TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut stmt = conn
            .prepare(
                "SELECT id, parent_id, created_at, modified_at
                 FROM nodes WHERE domain = ? AND parent_id = ?
                 ORDER BY created_at, id",
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare children query: {}", e))
            })?;

        let mut rows = stmt.query((self.domain, parent_id)).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query children: {}", e))
        })?;

        let mut children = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to fetch child row: {}", e))
        })? {
            children.push(Self::row_to_node(&row)?);
        }

        Ok(children)
    }

    /// List the forest roots of this domain (`parent_id IS NULL`).
    pub async fn list_roots(&self) -> Result<Vec<Node>, TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut stmt = conn
            .prepare(
                "SELECT id, parent_id, created_at, modified_at
                 FROM nodes WHERE domain = ? AND parent_id IS NULL
                 ORDER BY created_at, id",
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare roots query: {}", e))
            })?;

        let mut rows = stmt
            .query([self.domain])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query roots: {}", e)))?;

        let mut roots = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to fetch root row: {}", e))
        })? {
            roots.push(Self::row_to_node(&row)?);
        }

        Ok(roots)
    }

    /// Transitive descendant closure of `id`, including `id` itself.
    ///
    /// Correct for trees of unbounded depth and guaranteed to terminate even
    /// if storage already contains a cycle.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` if `id` does not exist.
    pub async fn get_descendant_ids(&self, id: &str) -> Result<Vec<String>, TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;

        if !self.exists_on(&conn, id).await? {
            return Err(TreeStoreError::node_not_found(id));
        }

        Ok(self.descendant_ids_on(&conn, id).await?)
    }

    /// Ancestor path of `id`, root-first, ending at `id`.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` if `id` does not exist.
    pub async fn get_ancestor_path(&self, id: &str) -> Result<Vec<Node>, TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let start = self
            .get_node_on(&conn, id)
            .await?
            .ok_or_else(|| TreeStoreError::node_not_found(id))?;

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(start.id.clone());

        let mut next_parent = start.parent_id.clone();
        let mut path = vec![start];

        while let Some(parent_id) = next_parent {
            if !seen.insert(parent_id.clone()) {
                warn!(
                    domain = self.domain,
                    node = %parent_id,
                    "ancestor walk revisited a node; storage may contain a cycle"
                );
                break;
            }

            match self.get_node_on(&conn, &parent_id).await? {
                Some(parent) => {
                    next_parent = parent.parent_id.clone();
                    path.push(parent);
                }
                None => {
                    warn!(
                        domain = self.domain,
                        node = %parent_id,
                        "ancestor walk hit a dangling parent reference"
                    );
                    break;
                }
            }
        }

        path.reverse();
        Ok(path)
    }

    //
    // MUTATING OPERATIONS (single-transaction check-then-write)
    //

    /// Create a node with a caller-generated id and an optional parent.
    ///
    /// The parent existence check and the insert run in one transaction.
    ///
    /// # Errors
    ///
    /// - `NodeExists` if `id` is already taken (ids are never reused)
    /// - `NodeNotFound` if `parent_id` does not exist
    pub async fn create_node(
        &self,
        id: &str,
        parent_id: Option<&str>,
    ) -> Result<Node, TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;

        match self.create_node_in_tx(&conn, id, parent_id).await {
            Ok(()) => {
                self.commit(&conn).await?;
                debug!(domain = self.domain, node = %id, parent = ?parent_id, "node created");
                self.get_node_on(&conn, id)
                    .await?
                    .ok_or_else(|| TreeStoreError::node_not_found(id))
            }
            Err(e) => {
                Self::rollback(&conn).await;
                Err(e)
            }
        }
    }

    async fn create_node_in_tx(
        &self,
        conn: &Connection,
        id: &str,
        parent_id: Option<&str>,
    ) -> Result<(), TreeStoreError> {
        if self.exists_on(conn, id).await? {
            return Err(TreeStoreError::node_exists(id));
        }

        if let Some(parent_id) = parent_id {
            if !self.exists_on(conn, parent_id).await? {
                return Err(TreeStoreError::node_not_found(parent_id));
            }
        }

        conn.execute(
            "INSERT INTO nodes (domain, id, parent_id) VALUES (?, ?, ?)",
            (self.domain, id, parent_id),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to insert node {}: {}", id, e))
        })?;

        Ok(())
    }

    /// Move `id` under `new_parent_id` (or make it a root with `None`).
    ///
    /// Existence checks, the descendant-closure cycle check, and the
    /// `parent_id` write all happen inside one transaction - this is the
    /// correctness-critical sequencing point that closes the
    /// check-then-write race between concurrent structural mutations.
    ///
    /// Setting the current parent again is a success no-op; the operation is
    /// idempotent for identical arguments.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if `id` or `new_parent_id` does not exist
    /// - `CycleDetected` if `new_parent_id` is `id` itself or any of its
    ///   descendants
    /// - `TransactionConflict` if the write lock could not be acquired
    pub async fn reparent(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<(), TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;

        match self.reparent_in_tx(&conn, id, new_parent_id).await {
            Ok(()) => {
                self.commit(&conn).await?;
                debug!(domain = self.domain, node = %id, parent = ?new_parent_id, "node reparented");
                Ok(())
            }
            Err(e) => {
                Self::rollback(&conn).await;
                Err(e)
            }
        }
    }

    async fn reparent_in_tx(
        &self,
        conn: &Connection,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<(), TreeStoreError> {
        if !self.exists_on(conn, id).await? {
            return Err(TreeStoreError::node_not_found(id));
        }

        if let Some(parent_id) = new_parent_id {
            if !self.exists_on(conn, parent_id).await? {
                return Err(TreeStoreError::node_not_found(parent_id));
            }

            // The closure includes `id` itself, so parent == self is caught
            // by the same membership test.
            let descendants = self.descendant_ids_on(conn, id).await?;
            if descendants.iter().any(|d| d == parent_id) {
                return Err(TreeStoreError::cycle_detected(id, parent_id));
            }
        }

        conn.execute(
            "UPDATE nodes SET parent_id = ?, modified_at = CURRENT_TIMESTAMP
             WHERE domain = ? AND id = ?",
            (new_parent_id, self.domain, id),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to update parent of {}: {}", id, e))
        })?;

        Ok(())
    }

    /// Delete `id` and every descendant, atomically.
    ///
    /// Computes the descendant closure, invokes the domain deletion hook
    /// exactly once with the full doomed id set, then removes all node rows
    /// in the set - all inside one transaction. Either the whole subtree and
    /// its payload disappear, or nothing does.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if `id` does not exist (a repeated delete
    ///   legitimately ends up here)
    /// - `TransactionConflict` if the write lock could not be acquired
    pub async fn delete_subtree(&self, id: &str) -> Result<DeleteResult, TreeStoreError> {
        let conn = self.db.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;

        match self.delete_subtree_in_tx(&conn, id).await {
            Ok(result) => {
                self.commit(&conn).await?;
                debug!(
                    domain = self.domain,
                    node = %id,
                    deleted = result.deleted_nodes,
                    "subtree deleted"
                );
                Ok(result)
            }
            Err(e) => {
                Self::rollback(&conn).await;
                Err(e)
            }
        }
    }

    async fn delete_subtree_in_tx(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<DeleteResult, TreeStoreError> {
        if !self.exists_on(conn, id).await? {
            return Err(TreeStoreError::node_not_found(id));
        }

        let doomed = self.descendant_ids_on(conn, id).await?;

        // One hook invocation with the full set, inside this transaction.
        self.deletion_hook.delete_owned(conn, &doomed).await?;

        // The parent FK cascades, so deletion order within a batch does not
        // matter: a parent removed ahead of its children takes them along,
        // and the closure is referentially closed. Row counts from the
        // statements would undercount cascaded rows, so the closure size is
        // the authoritative total - nothing else can change inside the
        // immediate transaction.
        for chunk in doomed.chunks(IN_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM nodes WHERE domain = ? AND id IN ({})",
                placeholders
            );

            let params = libsql::params_from_iter(
                std::iter::once(self.domain.to_string()).chain(chunk.iter().cloned()),
            );

            conn.execute(&sql, params).await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete subtree rows: {}", e))
            })?;
        }

        Ok(DeleteResult {
            deleted_nodes: doomed.len() as u64,
        })
    }
}
