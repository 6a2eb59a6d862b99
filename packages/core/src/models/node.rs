//! Tree Node Data Structures
//!
//! This module defines the `Node` struct persisted by the tree store, plus
//! the small result types shared by tree operations.
//!
//! A node carries structure only: its identity and an optional parent
//! reference. Domain payload (folder name, group color, content data) lives
//! in the payload tables owned by the domain services and is merged with
//! node rows at read time.
//!
//! # Examples
//!
//! ```rust
//! use canopy_core::models::Node;
//!
//! let root = Node::new("folder-1".to_string(), None);
//! let child = Node::new("folder-2".to_string(), Some(root.id.clone()));
//! assert!(child.parent_id.is_some());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry of a tree in the shared `nodes` table.
///
/// # Fields
///
/// - `id`: opaque unique identifier, generated by the owning domain service
///   before first save, immutable and never reused
/// - `parent_id`: reference to the parent node in the same domain; `None`
///   means this node is a forest root
/// - `created_at` / `modified_at`: maintained by the store; `modified_at`
///   changes on reparent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within the node's domain
    pub id: String,

    /// Parent node ID (`None` = forest root)
    pub parent_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last structural modification timestamp
    pub modified_at: DateTime<Utc>,
}

impl Node {
    /// Create a new Node with the given identity and parent.
    ///
    /// Timestamps are set to the current time; the persisted values are
    /// assigned by the database on insert.
    pub fn new(id: String, parent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            parent_id,
            created_at: now,
            modified_at: now,
        }
    }
}

/// One `(id, name)` step of an ancestor path, root-first.
///
/// Produced by the domain services when merging a tree-store ancestor path
/// with payload names for display (breadcrumbs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathEntry {
    pub id: String,
    pub name: String,
}

/// Result of a cascading subtree deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// Number of node rows removed (the subtree root plus all descendants)
    pub deleted_nodes: u64,
}
