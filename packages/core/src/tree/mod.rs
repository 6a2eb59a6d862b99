//! Tree Layer
//!
//! The generic parent-pointer forest engine shared by every Canopy
//! hierarchy. One [`TreeStore`] instance exists per domain (content folders,
//! user groups); all of them share the `nodes` table and one contract:
//!
//! - structural reads: node/parent/children lookups, forest roots,
//!   descendant closure, root-first ancestor path
//! - structural writes: create, reparent, cascading subtree delete - each
//!   one an atomic check-then-write transaction
//! - a domain-supplied [`DeletionHook`] that removes payload and leaf rows
//!   inside the delete transaction
//!
//! Domain validation (names, colors, permissions) happens in
//! [`crate::services`] before any call lands here.

mod error;
mod store;

pub use error::TreeStoreError;
pub use store::{DeletionHook, TreeStore};

pub(crate) use store::IN_BATCH_SIZE;
