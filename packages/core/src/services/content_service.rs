//! Content Service - Folder Hierarchy and Content Items
//!
//! Business logic for the content domain: folders form the tree (via the
//! shared tree store), content items are leaves attached to a folder. This
//! service owns the payload rows (`folders`, `content` tables) and the
//! domain validation; every structural mutation is delegated to the tree
//! store, whose typed failures are translated into [`ServiceError`].
//!
//! The deletion hook supplied to the tree store removes all folder payload
//! rows and every content item parented to a doomed folder, inside the same
//! transaction that removes the node rows.

use crate::db::{DatabaseError, DatabaseService};
use crate::models::{ContentFolder, ContentItem, ContentKind, DeleteResult, PathEntry};
use crate::services::error::ServiceError;
use crate::tree::{DeletionHook, TreeStore, IN_BATCH_SIZE};
use async_trait::async_trait;
use libsql::Connection;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Domain discriminator for content rows in the shared `nodes` table
const CONTENT_DOMAIN: &str = "content";

/// Folder and item names: 1 to 32 characters
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.{1,32}$").unwrap());

/// Cascading-delete hook for the content domain.
///
/// Removes content items parented to any doomed folder, then the folder
/// payload rows themselves. Runs on the delete transaction's connection.
struct ContentDeletionHook;

#[async_trait]
impl DeletionHook for ContentDeletionHook {
    async fn delete_owned(
        &self,
        conn: &libsql::Connection,
        ids: &[String],
    ) -> Result<(), DatabaseError> {
        for chunk in ids.chunks(IN_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");

            let sql = format!("DELETE FROM content WHERE folder_id IN ({})", placeholders);
            conn.execute(&sql, libsql::params_from_iter(chunk.iter().cloned()))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to delete folder content: {}", e))
                })?;

            let sql = format!("DELETE FROM folders WHERE id IN ({})", placeholders);
            conn.execute(&sql, libsql::params_from_iter(chunk.iter().cloned()))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to delete folder rows: {}", e))
                })?;
        }

        Ok(())
    }
}

/// Content domain service
///
/// # Examples
///
/// ```no_run
/// use canopy_core::db::DatabaseService;
/// use canopy_core::services::ContentService;
/// use std::path::PathBuf;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = Arc::new(DatabaseService::new(PathBuf::from("./data/canopy.db")).await?);
///     let content = ContentService::new(db);
///
///     let docs = content.create_folder("Documents", None).await?;
///     let reports = content.create_folder("Reports", Some(&docs.id)).await?;
///     content.move_folder(&reports.id, None).await?;
///     Ok(())
/// }
/// ```
pub struct ContentService {
    db: Arc<DatabaseService>,
    tree: TreeStore,
}

impl ContentService {
    /// Create a new ContentService, registering the content deletion hook
    /// with its tree store.
    pub fn new(db: Arc<DatabaseService>) -> Self {
        let tree = TreeStore::new(db.clone(), CONTENT_DOMAIN, Arc::new(ContentDeletionHook));
        Self { db, tree }
    }

    /// Access to the underlying tree store, for hierarchy queries that need
    /// no payload (descendant closures, raw ancestor paths).
    pub fn tree(&self) -> &TreeStore {
        &self.tree
    }

    fn validate_name(name: &str) -> Result<(), ServiceError> {
        if NAME_PATTERN.is_match(name) {
            Ok(())
        } else {
            Err(ServiceError::invalid_name(
                "name must be within 1 and 32 characters long",
            ))
        }
    }

    async fn folder_name_on(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let mut stmt = conn
            .prepare("SELECT name FROM folders WHERE id = ?")
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare folder lookup: {}", e))
            })?;

        let mut rows = stmt.query([id]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query folder {}: {}", id, e))
        })?;

        match rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to fetch folder row: {}", e))
        })? {
            Some(row) => {
                let name: String = row.get(0).map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to get folder name: {}", e))
                })?;
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    fn row_to_item(row: &libsql::Row) -> Result<ContentItem, DatabaseError> {
        let id: String = row
            .get(0)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get item id: {}", e)))?;
        let folder_id: String = row
            .get(1)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get folder_id: {}", e)))?;
        let name: String = row
            .get(2)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get item name: {}", e)))?;
        let kind_str: String = row
            .get(3)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get item kind: {}", e)))?;
        let data: Option<String> = row
            .get(4)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get item data: {}", e)))?;

        let kind = ContentKind::parse(&kind_str).ok_or_else(|| {
            DatabaseError::sql_execution(format!("Unexpected content kind '{}'", kind_str))
        })?;

        Ok(ContentItem {
            id,
            folder_id,
            name,
            kind,
            data,
        })
    }

    //
    // FOLDER OPERATIONS
    //

    /// Create a folder, optionally under a parent folder.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if the name fails validation
    /// - `NotFound` if the parent folder does not exist
    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<ContentFolder, ServiceError> {
        Self::validate_name(name)?;

        let id = Uuid::new_v4().to_string();
        self.tree.create_node(&id, parent_id).await?;

        let conn = self.db.connect_with_timeout().await?;
        let inserted = conn
            .execute(
                "INSERT INTO folders (id, name) VALUES (?, ?)",
                (id.as_str(), name),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to insert folder row: {}", e))
            });

        if let Err(e) = inserted {
            // Drop the orphan structure row before surfacing the fault
            let _ = self.tree.delete_subtree(&id).await;
            return Err(e.into());
        }

        debug!(folder = %id, parent = ?parent_id, "folder created");

        Ok(ContentFolder {
            id,
            name: name.to_string(),
            parent_id: parent_id.map(String::from),
        })
    }

    /// Get a folder by id, with its parent reference merged in.
    pub async fn get_folder(&self, id: &str) -> Result<ContentFolder, ServiceError> {
        let node = self.tree.get_node(id).await?;

        let conn = self.db.connect_with_timeout().await?;
        match self.folder_name_on(&conn, id).await? {
            Some(name) => Ok(ContentFolder {
                id: node.id,
                name,
                parent_id: node.parent_id,
            }),
            None => {
                warn!(folder = %id, "folder node has no payload row");
                Err(ServiceError::not_found(id))
            }
        }
    }

    /// List top-level (parentless) folders.
    pub async fn top_level_folders(&self) -> Result<Vec<ContentFolder>, ServiceError> {
        let roots = self.tree.list_roots().await?;
        let conn = self.db.connect_with_timeout().await?;

        let mut folders = Vec::new();
        for node in roots {
            match self.folder_name_on(&conn, &node.id).await? {
                Some(name) => folders.push(ContentFolder {
                    id: node.id,
                    name,
                    parent_id: node.parent_id,
                }),
                None => warn!(folder = %node.id, "folder node has no payload row"),
            }
        }

        Ok(folders)
    }

    /// List the direct child folders of `id`. Empty when the folder has no
    /// children or does not exist.
    pub async fn folder_children(&self, id: &str) -> Result<Vec<ContentFolder>, ServiceError> {
        let children = self.tree.get_children(id).await?;
        let conn = self.db.connect_with_timeout().await?;

        let mut folders = Vec::new();
        for node in children {
            match self.folder_name_on(&conn, &node.id).await? {
                Some(name) => folders.push(ContentFolder {
                    id: node.id,
                    name,
                    parent_id: node.parent_id,
                }),
                None => warn!(folder = %node.id, "folder node has no payload row"),
            }
        }

        Ok(folders)
    }

    /// The folder's path from its root, root-first, as `(id, name)` pairs
    /// for breadcrumb display.
    pub async fn folder_path(&self, id: &str) -> Result<Vec<PathEntry>, ServiceError> {
        let nodes = self.tree.get_ancestor_path(id).await?;
        let conn = self.db.connect_with_timeout().await?;

        let mut path = Vec::new();
        for node in nodes {
            match self.folder_name_on(&conn, &node.id).await? {
                Some(name) => path.push(PathEntry { id: node.id, name }),
                None => warn!(folder = %node.id, "folder node has no payload row"),
            }
        }

        Ok(path)
    }

    /// Rename a folder.
    pub async fn rename_folder(&self, id: &str, name: &str) -> Result<(), ServiceError> {
        Self::validate_name(name)?;

        let conn = self.db.connect_with_timeout().await?;
        let affected = conn
            .execute(
                "UPDATE folders SET name = ? WHERE id = ?",
                (name, id),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to rename folder {}: {}", id, e))
            })?;

        if affected == 0 {
            return Err(ServiceError::not_found(id));
        }

        debug!(folder = %id, "folder renamed");
        Ok(())
    }

    /// Move a folder under a new parent (or to top level with `None`).
    ///
    /// # Errors
    ///
    /// - `NotFound` if the folder or the new parent does not exist
    /// - `CircularMove` if the new parent is the folder itself or one of its
    ///   descendants
    pub async fn move_folder(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        Ok(self.tree.reparent(id, new_parent_id).await?)
    }

    /// Delete a folder, all its descendant folders, and every content item
    /// parented to any of them, atomically.
    pub async fn delete_folder(&self, id: &str) -> Result<DeleteResult, ServiceError> {
        Ok(self.tree.delete_subtree(id).await?)
    }

    //
    // CONTENT ITEM OPERATIONS (leaves)
    //

    /// Create a content item inside a folder.
    ///
    /// The insert is guarded by the folder's node row, so an item can never
    /// be attached to a folder that no longer exists.
    pub async fn create_item(
        &self,
        folder_id: &str,
        name: &str,
        kind: ContentKind,
        data: Option<&str>,
    ) -> Result<ContentItem, ServiceError> {
        Self::validate_name(name)?;

        let id = Uuid::new_v4().to_string();
        let conn = self.db.connect_with_timeout().await?;

        let affected = conn
            .execute(
                "INSERT INTO content (id, folder_id, name, kind, data)
                 SELECT ?, ?, ?, ?, ?
                 WHERE EXISTS (SELECT 1 FROM nodes WHERE domain = ? AND id = ?)",
                (
                    id.as_str(),
                    folder_id,
                    name,
                    kind.as_str(),
                    data,
                    CONTENT_DOMAIN,
                    folder_id,
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to insert content item: {}", e))
            })?;

        if affected == 0 {
            return Err(ServiceError::not_found(folder_id));
        }

        debug!(item = %id, folder = %folder_id, "content item created");

        Ok(ContentItem {
            id,
            folder_id: folder_id.to_string(),
            name: name.to_string(),
            kind,
            data: data.map(String::from),
        })
    }

    /// Get a content item by id.
    pub async fn get_item(&self, id: &str) -> Result<ContentItem, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut stmt = conn
            .prepare("SELECT id, folder_id, name, kind, data FROM content WHERE id = ?")
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare item lookup: {}", e))
            })?;

        let mut rows = stmt.query([id]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query item {}: {}", id, e))
        })?;

        match rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to fetch item row: {}", e))
        })? {
            Some(row) => Ok(Self::row_to_item(&row)?),
            None => Err(ServiceError::not_found(id)),
        }
    }

    /// Update a content item's name, kind, or data. Only supplied fields
    /// change.
    pub async fn update_item(
        &self,
        id: &str,
        name: Option<&str>,
        kind: Option<ContentKind>,
        data: Option<&str>,
    ) -> Result<ContentItem, ServiceError> {
        if let Some(name) = name {
            Self::validate_name(name)?;
        }

        let current = self.get_item(id).await?;

        let updated = ContentItem {
            id: current.id,
            folder_id: current.folder_id,
            name: name.map(String::from).unwrap_or(current.name),
            kind: kind.unwrap_or(current.kind),
            data: data.map(String::from).or(current.data),
        };

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            "UPDATE content SET name = ?, kind = ?, data = ? WHERE id = ?",
            (
                updated.name.as_str(),
                updated.kind.as_str(),
                updated.data.as_deref(),
                id,
            ),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to update item {}: {}", id, e)))?;

        Ok(updated)
    }

    /// Move a content item to another folder.
    ///
    /// Leaf moves are payload updates, not tree mutations - items are never
    /// parents, so no cycle check applies. The target folder must exist.
    pub async fn move_item(&self, id: &str, folder_id: &str) -> Result<(), ServiceError> {
        // Surfaces NotFound for a missing target folder
        self.tree.get_node(folder_id).await?;

        let conn = self.db.connect_with_timeout().await?;
        let affected = conn
            .execute(
                "UPDATE content SET folder_id = ? WHERE id = ?",
                (folder_id, id),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to move item {}: {}", id, e))
            })?;

        if affected == 0 {
            return Err(ServiceError::not_found(id));
        }

        debug!(item = %id, folder = %folder_id, "content item moved");
        Ok(())
    }

    /// Delete a content item.
    pub async fn delete_item(&self, id: &str) -> Result<(), ServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let affected = conn
            .execute("DELETE FROM content WHERE id = ?", [id])
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete item {}: {}", id, e))
            })?;

        if affected == 0 {
            return Err(ServiceError::not_found(id));
        }

        Ok(())
    }

    /// The content items directly inside `folder_id`.
    pub async fn folder_direct_content(
        &self,
        folder_id: &str,
    ) -> Result<Vec<ContentItem>, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut stmt = conn
            .prepare(
                "SELECT id, folder_id, name, kind, data FROM content
                 WHERE folder_id = ? ORDER BY name, id",
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare content query: {}", e))
            })?;

        let mut rows = stmt.query([folder_id]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query folder content: {}", e))
        })?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to fetch item row: {}", e))
        })? {
            items.push(Self::row_to_item(&row)?);
        }

        Ok(items)
    }

    /// All content items in `folder_id` or any of its descendant folders.
    ///
    /// # Errors
    ///
    /// `NotFound` if the folder does not exist.
    pub async fn folder_all_content(
        &self,
        folder_id: &str,
    ) -> Result<Vec<ContentItem>, ServiceError> {
        let folder_ids = self.tree.get_descendant_ids(folder_id).await?;
        let conn = self.db.connect_with_timeout().await?;

        let mut items = Vec::new();
        for chunk in folder_ids.chunks(IN_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT id, folder_id, name, kind, data FROM content
                 WHERE folder_id IN ({}) ORDER BY name, id",
                placeholders
            );

            let mut rows = conn
                .query(&sql, libsql::params_from_iter(chunk.iter().cloned()))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!(
                        "Failed to query subtree content: {}",
                        e
                    ))
                })?;

            while let Some(row) = rows.next().await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to fetch item row: {}", e))
            })? {
                items.push(Self::row_to_item(&row)?);
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_service() -> (ContentService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(DatabaseService::new(db_path).await.unwrap());
        (ContentService::new(db), temp_dir)
    }

    #[tokio::test]
    async fn test_create_and_get_folder() {
        let (service, _temp_dir) = create_test_service().await;

        let folder = service.create_folder("Documents", None).await.unwrap();
        let fetched = service.get_folder(&folder.id).await.unwrap();
        assert_eq!(fetched.name, "Documents");
        assert!(fetched.parent_id.is_none());

        let child = service
            .create_folder("Reports", Some(&folder.id))
            .await
            .unwrap();
        let fetched = service.get_folder(&child.id).await.unwrap();
        assert_eq!(fetched.parent_id.as_deref(), Some(folder.id.as_str()));
    }

    #[tokio::test]
    async fn test_folder_name_validation() {
        let (service, _temp_dir) = create_test_service().await;

        let err = service.create_folder("", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidName(_)));

        let long = "x".repeat(33);
        let err = service.create_folder(&long, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidName(_)));

        // 32 characters is still fine
        let max = "x".repeat(32);
        service.create_folder(&max, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_folder_under_missing_parent() {
        let (service, _temp_dir) = create_test_service().await;

        let err = service
            .create_folder("Orphan", Some("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rename_folder() {
        let (service, _temp_dir) = create_test_service().await;

        let folder = service.create_folder("Old", None).await.unwrap();
        service.rename_folder(&folder.id, "New").await.unwrap();

        let fetched = service.get_folder(&folder.id).await.unwrap();
        assert_eq!(fetched.name, "New");

        let err = service.rename_folder("ghost", "New").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_move_folder_cycle_translated() {
        let (service, _temp_dir) = create_test_service().await;

        let a = service.create_folder("A", None).await.unwrap();
        let b = service.create_folder("B", Some(&a.id)).await.unwrap();

        let err = service.move_folder(&a.id, Some(&b.id)).await.unwrap_err();
        assert!(matches!(err, ServiceError::CircularMove { .. }));
    }

    #[tokio::test]
    async fn test_folder_path() {
        let (service, _temp_dir) = create_test_service().await;

        let a = service.create_folder("A", None).await.unwrap();
        let b = service.create_folder("B", Some(&a.id)).await.unwrap();
        let c = service.create_folder("C", Some(&b.id)).await.unwrap();

        let path = service.folder_path(&c.id).await.unwrap();
        let names: Vec<&str> = path.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_item_crud() {
        let (service, _temp_dir) = create_test_service().await;

        let folder = service.create_folder("Docs", None).await.unwrap();
        let item = service
            .create_item(&folder.id, "answer", ContentKind::Number, Some("42"))
            .await
            .unwrap();

        let fetched = service.get_item(&item.id).await.unwrap();
        assert_eq!(fetched.kind, ContentKind::Number);
        assert_eq!(fetched.data.as_deref(), Some("42"));

        let updated = service
            .update_item(&item.id, Some("renamed"), None, None)
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.data.as_deref(), Some("42"));

        service.delete_item(&item.id).await.unwrap();
        let err = service.get_item(&item.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_item_in_missing_folder() {
        let (service, _temp_dir) = create_test_service().await;

        let err = service
            .create_item("ghost", "item", ContentKind::String, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_move_item() {
        let (service, _temp_dir) = create_test_service().await;

        let a = service.create_folder("A", None).await.unwrap();
        let b = service.create_folder("B", None).await.unwrap();
        let item = service
            .create_item(&a.id, "item", ContentKind::String, None)
            .await
            .unwrap();

        service.move_item(&item.id, &b.id).await.unwrap();
        let fetched = service.get_item(&item.id).await.unwrap();
        assert_eq!(fetched.folder_id, b.id);

        let err = service.move_item(&item.id, "ghost").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_folder_all_content_spans_subtree() {
        let (service, _temp_dir) = create_test_service().await;

        let root = service.create_folder("Root", None).await.unwrap();
        let sub = service.create_folder("Sub", Some(&root.id)).await.unwrap();
        let other = service.create_folder("Other", None).await.unwrap();

        service
            .create_item(&root.id, "top", ContentKind::String, None)
            .await
            .unwrap();
        service
            .create_item(&sub.id, "nested", ContentKind::String, None)
            .await
            .unwrap();
        service
            .create_item(&other.id, "elsewhere", ContentKind::String, None)
            .await
            .unwrap();

        let direct = service.folder_direct_content(&root.id).await.unwrap();
        assert_eq!(direct.len(), 1);

        let all = service.folder_all_content(&root.id).await.unwrap();
        let mut names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["nested", "top"]);
    }

    #[tokio::test]
    async fn test_delete_folder_cascades_items() {
        let (service, _temp_dir) = create_test_service().await;

        let root = service.create_folder("Root", None).await.unwrap();
        let sub = service.create_folder("Sub", Some(&root.id)).await.unwrap();
        let keep = service.create_folder("Keep", None).await.unwrap();

        let doomed = service
            .create_item(&sub.id, "doomed", ContentKind::String, None)
            .await
            .unwrap();
        let survivor = service
            .create_item(&keep.id, "survivor", ContentKind::String, None)
            .await
            .unwrap();

        let result = service.delete_folder(&root.id).await.unwrap();
        assert_eq!(result.deleted_nodes, 2);

        assert!(matches!(
            service.get_folder(&sub.id).await.unwrap_err(),
            ServiceError::NotFound { .. }
        ));
        assert!(matches!(
            service.get_item(&doomed.id).await.unwrap_err(),
            ServiceError::NotFound { .. }
        ));

        // Unrelated folder and item untouched
        service.get_folder(&keep.id).await.unwrap();
        service.get_item(&survivor.id).await.unwrap();
    }
}
