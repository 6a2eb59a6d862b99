//! Database Connection Management
//!
//! This module provides the core database connection and initialization
//! functionality using libsql for Canopy's hierarchical storage.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf for the database file
//! - **Idempotent schema**: CREATE TABLE IF NOT EXISTS, safe to call repeatedly
//! - **WAL mode**: Write-Ahead Logging for better concurrency
//! - **Foreign keys**: Enabled for referential integrity
//!
//! # Database Connection Patterns
//!
//! **Always use `connect_with_timeout()` in async functions** to avoid SQLite
//! thread-safety violations when the Tokio runtime moves futures between
//! threads. The 5-second busy timeout allows concurrent operations to wait
//! and retry instead of failing immediately with `SQLITE_BUSY` errors.
//!
//! ```no_run
//! # use canopy_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/canopy.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::DatabaseError;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use canopy_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("/path/to/canopy.db");
///     let db_service = DatabaseService::new(db_path).await?;
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
    /// 4. Enable SQLite features (WAL mode, foreign keys, busy timeout)
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the database file
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        // Whether the file exists decides if we checkpoint after schema setup
        let is_new_database = !db_path.exists();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
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

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of
    /// execute(). This helper encapsulates that pattern.
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
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
    /// Creates tables and indexes using CREATE TABLE IF NOT EXISTS,
    /// ensuring idempotent initialization (safe to call multiple times).
    ///
    /// # Schema
    ///
    /// - `nodes` table: shared parent-pointer rows for every tree domain
    /// - `folders` / `content` tables: content domain payload and leaf rows
    /// - `user_groups` / `group_members` tables: group domain payload and
    ///   membership rows
    ///
    /// # SQLite Configuration
    ///
    /// - WAL mode: Write-Ahead Logging for better concurrency
    /// - Foreign keys: Enabled for referential integrity
    /// - Busy timeout: 5s so concurrent writers queue instead of failing
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;

        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        // Shared tree table. Every domain's nodes live here, disjoint by the
        // domain column; payload stays in the per-domain tables below.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                domain TEXT NOT NULL,
                id TEXT NOT NULL,
                parent_id TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                modified_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (domain, id),
                -- Parent deletion cascades to children (tree structure)
                FOREIGN KEY (domain, parent_id) REFERENCES nodes(domain, id) ON DELETE CASCADE
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create nodes table: {}", e))
        })?;

        // Content domain payload: folder names
        conn.execute(
            "CREATE TABLE IF NOT EXISTS folders (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create folders table: {}", e))
        })?;

        // Content domain leaves: items parented to a folder node
        conn.execute(
            "CREATE TABLE IF NOT EXISTS content (
                id TEXT PRIMARY KEY,
                folder_id TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'string',
                data TEXT
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create content table: {}", e))
        })?;

        // Group domain payload: group names and display colors
        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                color TEXT
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create user_groups table: {}", e))
        })?;

        // Group domain leaves: user memberships parented to a group node
        conn.execute(
            "CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                PRIMARY KEY (group_id, user_id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create group_members table: {}", e))
        })?;

        self.create_core_indexes(&conn).await?;

        // Force WAL checkpoint only for newly created databases. This
        // prevents race conditions where rapid database swaps in tests cause
        // "no such table" errors due to WAL entries not being flushed.
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    /// Create core indexes
    ///
    /// These indexes are essential for hierarchy query performance and never
    /// change (no ALTER TABLE required on user machines).
    async fn create_core_indexes(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        // Index on (domain, parent_id): children and roots queries
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(domain, parent_id)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create index 'idx_nodes_parent': {}",
                e
            ))
        })?;

        // Index on folder_id: direct-content and subtree-content queries
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_content_folder ON content(folder_id)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create index 'idx_content_folder': {}",
                e
            ))
        })?;

        // Index on user_id: reverse membership lookups
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create index 'idx_group_members_user': {}",
                e
            ))
        })?;

        Ok(())
    }

    /// Get a synchronous connection to the database
    ///
    /// Only use this in synchronous, single-threaded contexts. In async
    /// functions use `connect_with_timeout()` instead to avoid SQLite
    /// thread-safety violations.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with busy timeout configured
    ///
    /// This is the safe default for all async code. Sets a 5-second busy
    /// timeout so concurrent operations wait and retry instead of failing
    /// immediately when the database is locked.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use canopy_core::db::DatabaseService;
    /// # use std::path::PathBuf;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let db_service = DatabaseService::new(PathBuf::from("./data/canopy.db")).await?;
    /// let conn = db_service.connect_with_timeout().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        // The synchronous connect() call is safe here because it only creates
        // the connection handle; the actual SQLite operations happen later.
        let conn = self.connect()?;

        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;

        Ok(conn)
    }

    /// Flush pending writes and release resources
    ///
    /// Should be called when shutting down so all WAL entries are
    /// checkpointed into the main database file.
    pub async fn db_close(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_db() -> (DatabaseService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = DatabaseService::new(db_path).await.unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_database_creation() {
        let (db, _temp_dir) = create_test_db().await;
        assert!(db.db_path.exists());
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let (db, _temp_dir) = create_test_db().await;
        let conn = db.connect_with_timeout().await.unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                (),
            )
            .await
            .unwrap();

        let mut tables = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let name: String = row.get(0).unwrap();
            tables.push(name);
        }

        for expected in ["nodes", "folders", "content", "user_groups", "group_members"] {
            assert!(
                tables.iter().any(|t| t == expected),
                "missing table: {}",
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_wal_mode_enabled() {
        let (db, _temp_dir) = create_test_db().await;
        let conn = db.connect_with_timeout().await.unwrap();

        let mut rows = conn.query("PRAGMA journal_mode", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let mode: String = row.get(0).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_idempotent_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _first = DatabaseService::new(db_path.clone()).await.unwrap();
        // Opening the same file again must not fail or clobber the schema
        let second = DatabaseService::new(db_path).await.unwrap();

        let conn = second.connect_with_timeout().await.unwrap();
        conn.execute(
            "INSERT INTO nodes (domain, id, parent_id) VALUES ('content', 'n1', NULL)",
            (),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_close_flushes_wal() {
        let (db, _temp_dir) = create_test_db().await;

        let conn = db.connect_with_timeout().await.unwrap();
        conn.execute(
            "INSERT INTO nodes (domain, id, parent_id) VALUES ('content', 'n1', NULL)",
            (),
        )
        .await
        .unwrap();

        db.db_close().await.unwrap();
    }

    #[tokio::test]
    async fn test_parent_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dirs").join("test.db");

        let db = DatabaseService::new(db_path.clone()).await.unwrap();
        assert!(db.db_path.exists());
    }
}
