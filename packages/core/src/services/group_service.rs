//! Group Service - Group Hierarchy and Memberships
//!
//! The second instantiation of the shared tree contract: groups form the
//! tree, user memberships are leaves attached to a group. Payload rows live
//! in `user_groups` and `group_members`; structure is delegated to the tree
//! store exactly as the content domain does it.

use crate::db::{DatabaseError, DatabaseService};
use crate::models::{DeleteResult, Group, PathEntry};
use crate::services::error::ServiceError;
use crate::tree::{DeletionHook, TreeStore, IN_BATCH_SIZE};
use async_trait::async_trait;
use libsql::Connection;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Domain discriminator for group rows in the shared `nodes` table
const GROUPS_DOMAIN: &str = "groups";

/// Group names: 1 to 32 characters
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.{1,32}$").unwrap());

/// Display colors: #RRGGBB
static COLOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap());

/// Cascading-delete hook for the group domain: memberships first, then the
/// group payload rows.
struct GroupDeletionHook;

#[async_trait]
impl DeletionHook for GroupDeletionHook {
    async fn delete_owned(
        &self,
        conn: &libsql::Connection,
        ids: &[String],
    ) -> Result<(), DatabaseError> {
        for chunk in ids.chunks(IN_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");

            let sql = format!(
                "DELETE FROM group_members WHERE group_id IN ({})",
                placeholders
            );
            conn.execute(&sql, libsql::params_from_iter(chunk.iter().cloned()))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to delete memberships: {}", e))
                })?;

            let sql = format!("DELETE FROM user_groups WHERE id IN ({})", placeholders);
            conn.execute(&sql, libsql::params_from_iter(chunk.iter().cloned()))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to delete group rows: {}", e))
                })?;
        }

        Ok(())
    }
}

/// Group domain service
pub struct GroupService {
    db: Arc<DatabaseService>,
    tree: TreeStore,
}

impl GroupService {
    /// Create a new GroupService, registering the group deletion hook with
    /// its tree store.
    pub fn new(db: Arc<DatabaseService>) -> Self {
        let tree = TreeStore::new(db.clone(), GROUPS_DOMAIN, Arc::new(GroupDeletionHook));
        Self { db, tree }
    }

    /// Access to the underlying tree store.
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

    fn validate_color(color: &str) -> Result<(), ServiceError> {
        if COLOR_PATTERN.is_match(color) {
            Ok(())
        } else {
            Err(ServiceError::invalid_color(
                "color must be a #RRGGBB hex value",
            ))
        }
    }

    async fn group_row_on(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<Option<(String, Option<String>)>, DatabaseError> {
        let mut stmt = conn
            .prepare("SELECT name, color FROM user_groups WHERE id = ?")
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare group lookup: {}", e))
            })?;

        let mut rows = stmt.query([id]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query group {}: {}", id, e))
        })?;

        match rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to fetch group row: {}", e))
        })? {
            Some(row) => {
                let name: String = row.get(0).map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to get group name: {}", e))
                })?;
                let color: Option<String> = row.get(1).map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to get group color: {}", e))
                })?;
                Ok(Some((name, color)))
            }
            None => Ok(None),
        }
    }

    //
    // GROUP OPERATIONS
    //

    /// Create a group, optionally under a parent group.
    pub async fn create_group(
        &self,
        name: &str,
        color: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<Group, ServiceError> {
        Self::validate_name(name)?;
        if let Some(color) = color {
            Self::validate_color(color)?;
        }

        let id = Uuid::new_v4().to_string();
        self.tree.create_node(&id, parent_id).await?;

        let conn = self.db.connect_with_timeout().await?;
        let inserted = conn
            .execute(
                "INSERT INTO user_groups (id, name, color) VALUES (?, ?, ?)",
                (id.as_str(), name, color),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to insert group row: {}", e))
            });

        if let Err(e) = inserted {
            let _ = self.tree.delete_subtree(&id).await;
            return Err(e.into());
        }

        debug!(group = %id, parent = ?parent_id, "group created");

        Ok(Group {
            id,
            name: name.to_string(),
            color: color.map(String::from),
            parent_id: parent_id.map(String::from),
        })
    }

    /// Get a group by id, with its parent reference merged in.
    pub async fn get_group(&self, id: &str) -> Result<Group, ServiceError> {
        let node = self.tree.get_node(id).await?;

        let conn = self.db.connect_with_timeout().await?;
        match self.group_row_on(&conn, id).await? {
            Some((name, color)) => Ok(Group {
                id: node.id,
                name,
                color,
                parent_id: node.parent_id,
            }),
            None => {
                warn!(group = %id, "group node has no payload row");
                Err(ServiceError::not_found(id))
            }
        }
    }

    /// List top-level (parentless) groups.
    pub async fn top_level_groups(&self) -> Result<Vec<Group>, ServiceError> {
        let roots = self.tree.list_roots().await?;
        self.with_payload(roots).await
    }

    /// List the direct subgroups of `id`.
    pub async fn group_children(&self, id: &str) -> Result<Vec<Group>, ServiceError> {
        let children = self.tree.get_children(id).await?;
        self.with_payload(children).await
    }

    async fn with_payload(
        &self,
        nodes: Vec<crate::models::Node>,
    ) -> Result<Vec<Group>, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut groups = Vec::new();
        for node in nodes {
            match self.group_row_on(&conn, &node.id).await? {
                Some((name, color)) => groups.push(Group {
                    id: node.id,
                    name,
                    color,
                    parent_id: node.parent_id,
                }),
                None => warn!(group = %node.id, "group node has no payload row"),
            }
        }

        Ok(groups)
    }

    /// The group's path from its root, root-first.
    pub async fn group_path(&self, id: &str) -> Result<Vec<PathEntry>, ServiceError> {
        let nodes = self.tree.get_ancestor_path(id).await?;
        let conn = self.db.connect_with_timeout().await?;

        let mut path = Vec::new();
        for node in nodes {
            match self.group_row_on(&conn, &node.id).await? {
                Some((name, _color)) => path.push(PathEntry { id: node.id, name }),
                None => warn!(group = %node.id, "group node has no payload row"),
            }
        }

        Ok(path)
    }

    /// Update a group's name and/or color. Only supplied fields change.
    pub async fn update_group(
        &self,
        id: &str,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<Group, ServiceError> {
        if let Some(name) = name {
            Self::validate_name(name)?;
        }
        if let Some(color) = color {
            Self::validate_color(color)?;
        }

        let current = self.get_group(id).await?;

        let updated = Group {
            id: current.id,
            name: name.map(String::from).unwrap_or(current.name),
            color: color.map(String::from).or(current.color),
            parent_id: current.parent_id,
        };

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            "UPDATE user_groups SET name = ?, color = ? WHERE id = ?",
            (updated.name.as_str(), updated.color.as_deref(), id),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to update group {}: {}", id, e))
        })?;

        debug!(group = %id, "group updated");
        Ok(updated)
    }

    /// Move a group under a new parent (or to top level with `None`).
    pub async fn move_group(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        Ok(self.tree.reparent(id, new_parent_id).await?)
    }

    /// Delete a group, all its descendant groups, and their memberships,
    /// atomically.
    pub async fn delete_group(&self, id: &str) -> Result<DeleteResult, ServiceError> {
        Ok(self.tree.delete_subtree(id).await?)
    }

    //
    // MEMBERSHIP OPERATIONS (leaves)
    //

    /// Add a user to a group. Adding an existing member is a no-op.
    pub async fn add_member(&self, group_id: &str, user_id: &str) -> Result<(), ServiceError> {
        // Surfaces NotFound for a missing group
        self.tree.get_node(group_id).await?;

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?, ?)",
            (group_id, user_id),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to add member {} to group {}: {}",
                user_id, group_id, e
            ))
        })?;

        debug!(group = %group_id, user = %user_id, "member added");
        Ok(())
    }

    /// Remove a user from a group. Removing a non-member is a no-op.
    pub async fn remove_member(&self, group_id: &str, user_id: &str) -> Result<(), ServiceError> {
        self.tree.get_node(group_id).await?;

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            "DELETE FROM group_members WHERE group_id = ? AND user_id = ?",
            (group_id, user_id),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to remove member {} from group {}: {}",
                user_id, group_id, e
            ))
        })?;

        Ok(())
    }

    /// The users directly in `group_id` (not inherited from subgroups).
    pub async fn direct_members(&self, group_id: &str) -> Result<Vec<String>, ServiceError> {
        self.tree.get_node(group_id).await?;

        let conn = self.db.connect_with_timeout().await?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM group_members WHERE group_id = ? ORDER BY user_id")
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to prepare members query: {}", e))
            })?;

        let mut rows = stmt.query([group_id]).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to query members: {}", e))
        })?;

        let mut members = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to fetch member row: {}", e))
        })? {
            let user_id: String = row.get(0).map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to get user id: {}", e))
            })?;
            members.push(user_id);
        }

        Ok(members)
    }

    /// Every user in `group_id` or any of its descendant subgroups, each
    /// appearing once, sorted.
    pub async fn all_members(&self, group_id: &str) -> Result<Vec<String>, ServiceError> {
        let group_ids = self.tree.get_descendant_ids(group_id).await?;
        let conn = self.db.connect_with_timeout().await?;

        let mut seen: HashSet<String> = HashSet::new();
        for chunk in group_ids.chunks(IN_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT DISTINCT user_id FROM group_members WHERE group_id IN ({})",
                placeholders
            );

            let mut rows = conn
                .query(&sql, libsql::params_from_iter(chunk.iter().cloned()))
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!(
                        "Failed to query subtree members: {}",
                        e
                    ))
                })?;

            while let Some(row) = rows.next().await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to fetch member row: {}", e))
            })? {
                let user_id: String = row.get(0).map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to get user id: {}", e))
                })?;
                seen.insert(user_id);
            }
        }

        let mut members: Vec<String> = seen.into_iter().collect();
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_service() -> (GroupService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(DatabaseService::new(db_path).await.unwrap());
        (GroupService::new(db), temp_dir)
    }

    #[tokio::test]
    async fn test_create_and_get_group() {
        let (service, _temp_dir) = create_test_service().await;

        let group = service
            .create_group("Admins", Some("#ff0000"), None)
            .await
            .unwrap();
        let fetched = service.get_group(&group.id).await.unwrap();
        assert_eq!(fetched.name, "Admins");
        assert_eq!(fetched.color.as_deref(), Some("#ff0000"));
        assert!(fetched.parent_id.is_none());
    }

    #[tokio::test]
    async fn test_color_validation() {
        let (service, _temp_dir) = create_test_service().await;

        let err = service
            .create_group("Admins", Some("red"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidColor(_)));

        let err = service
            .create_group("Admins", Some("#ff00"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidColor(_)));
    }

    #[tokio::test]
    async fn test_update_group() {
        let (service, _temp_dir) = create_test_service().await;

        let group = service.create_group("Old", None, None).await.unwrap();
        let updated = service
            .update_group(&group.id, Some("New"), Some("#00ff00"))
            .await
            .unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(updated.color.as_deref(), Some("#00ff00"));

        let fetched = service.get_group(&group.id).await.unwrap();
        assert_eq!(fetched.name, "New");
    }

    #[tokio::test]
    async fn test_move_group_cycle_translated() {
        let (service, _temp_dir) = create_test_service().await;

        let a = service.create_group("A", None, None).await.unwrap();
        let b = service.create_group("B", None, Some(&a.id)).await.unwrap();

        let err = service.move_group(&a.id, Some(&b.id)).await.unwrap_err();
        assert!(matches!(err, ServiceError::CircularMove { .. }));
    }

    #[tokio::test]
    async fn test_membership_add_remove() {
        let (service, _temp_dir) = create_test_service().await;

        let group = service.create_group("Team", None, None).await.unwrap();
        service.add_member(&group.id, "alice").await.unwrap();
        service.add_member(&group.id, "bob").await.unwrap();
        // Adding an existing member is a no-op
        service.add_member(&group.id, "alice").await.unwrap();

        let members = service.direct_members(&group.id).await.unwrap();
        assert_eq!(members, vec!["alice", "bob"]);

        service.remove_member(&group.id, "alice").await.unwrap();
        let members = service.direct_members(&group.id).await.unwrap();
        assert_eq!(members, vec!["bob"]);

        let err = service.add_member("ghost", "alice").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_all_members_deduplicates_across_subgroups() {
        let (service, _temp_dir) = create_test_service().await;

        let root = service.create_group("Root", None, None).await.unwrap();
        let sub = service
            .create_group("Sub", None, Some(&root.id))
            .await
            .unwrap();
        let subsub = service
            .create_group("SubSub", None, Some(&sub.id))
            .await
            .unwrap();

        service.add_member(&root.id, "alice").await.unwrap();
        service.add_member(&sub.id, "alice").await.unwrap();
        service.add_member(&sub.id, "bob").await.unwrap();
        service.add_member(&subsub.id, "carol").await.unwrap();

        let all = service.all_members(&root.id).await.unwrap();
        assert_eq!(all, vec!["alice", "bob", "carol"]);

        // A subgroup only sees its own subtree
        let sub_members = service.all_members(&sub.id).await.unwrap();
        assert_eq!(sub_members, vec!["alice", "bob", "carol"]);
        let leaf_members = service.all_members(&subsub.id).await.unwrap();
        assert_eq!(leaf_members, vec!["carol"]);
    }

    #[tokio::test]
    async fn test_delete_group_cascades_memberships() {
        let (service, _temp_dir) = create_test_service().await;

        let root = service.create_group("Root", None, None).await.unwrap();
        let sub = service
            .create_group("Sub", None, Some(&root.id))
            .await
            .unwrap();
        let keep = service.create_group("Keep", None, None).await.unwrap();

        service.add_member(&sub.id, "alice").await.unwrap();
        service.add_member(&keep.id, "bob").await.unwrap();

        let result = service.delete_group(&root.id).await.unwrap();
        assert_eq!(result.deleted_nodes, 2);

        assert!(matches!(
            service.get_group(&sub.id).await.unwrap_err(),
            ServiceError::NotFound { .. }
        ));

        // Unrelated group and its membership untouched
        let members = service.direct_members(&keep.id).await.unwrap();
        assert_eq!(members, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_group_path() {
        let (service, _temp_dir) = create_test_service().await;

        let a = service.create_group("A", None, None).await.unwrap();
        let b = service.create_group("B", None, Some(&a.id)).await.unwrap();

        let path = service.group_path(&b.id).await.unwrap();
        let names: Vec<&str> = path.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
