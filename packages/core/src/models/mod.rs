//! Data Models
//!
//! This module contains the core data structures used throughout Canopy:
//!
//! - `Node` - the tree store's structural entity (identity + parent pointer)
//! - Content domain payload types (`ContentFolder`, `ContentItem`)
//! - Group domain payload types (`Group`)
//!
//! Structure and payload are deliberately separate: the tree store persists
//! only `Node`, the domain services own everything else.

mod content;
mod group;
mod node;

pub use content::{ContentFolder, ContentItem, ContentKind};
pub use group::Group;
pub use node::{DeleteResult, Node, PathEntry};
