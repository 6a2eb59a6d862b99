//! Group Domain Models
//!
//! Payload types for the group hierarchy: groups (tree nodes) and user
//! memberships (leaves attached to a group).

use serde::{Deserialize, Serialize};

/// A user group.
///
/// Like folders, a group's position in the hierarchy is owned by the tree
/// store; `parent_id` is merged from the node row at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    /// Display color, `#RRGGBB`
    pub color: Option<String>,
    /// Parent group ID (`None` = top-level group)
    pub parent_id: Option<String>,
}
