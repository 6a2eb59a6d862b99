//! Canopy Core Business Logic Layer
//!
//! This crate provides the hierarchical storage core for the Canopy backend:
//! a generic parent-pointer tree engine shared by two independent domains
//! (content folders and user groups), backed by libsql.
//!
//! # Architecture
//!
//! - **One tree engine, many domains**: every hierarchy lives in the shared
//!   `nodes` table, scoped by a domain column; structure is mutated only
//!   through the tree store
//! - **Transactional invariants**: acyclicity and referential integrity are
//!   checked and written inside a single `BEGIN IMMEDIATE` transaction
//! - **Payload stays with the domain**: folder names, group colors, and
//!   content data live in per-domain tables owned by the services, removed
//!   via deletion hooks during cascading deletes
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, ContentFolder, Group, etc.)
//! - [`tree`] - The tree store engine and its error taxonomy
//! - [`services`] - Domain services (ContentService, GroupService)
//! - [`db`] - Database layer with libsql integration

pub mod db;
pub mod models;
pub mod services;
pub mod tree;

// Re-export commonly used types
pub use models::*;
pub use services::*;
pub use tree::{DeletionHook, TreeStore, TreeStoreError};
