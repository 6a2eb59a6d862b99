//! Tree Store Error Types
//!
//! Typed failure taxonomy for tree operations. The first three variants are
//! recoverable and caller-input-driven; `TransactionConflict` is retriable
//! once; `Database` is an unrecoverable storage fault propagated unmasked.

use crate::db::DatabaseError;
use thiserror::Error;

/// Tree store operation errors
#[derive(Error, Debug)]
pub enum TreeStoreError {
    /// Referenced node id does not exist at the time of the operation
    #[error("Node not found: {id}")]
    NodeNotFound { id: String },

    /// A node with this id already exists (ids are never reused)
    #[error("Node already exists: {id}")]
    NodeExists { id: String },

    /// Requested reparent would create a cycle
    #[error("Cycle detected: cannot move node {id} under {parent_id}")]
    CycleDetected { id: String, parent_id: String },

    /// The atomic check-then-write could not be completed because of a
    /// concurrent conflicting mutation
    #[error("Transaction conflict: {context}")]
    TransactionConflict { context: String },

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),
}

impl TreeStoreError {
    /// Create a node not found error
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    /// Create a node exists error
    pub fn node_exists(id: impl Into<String>) -> Self {
        Self::NodeExists { id: id.into() }
    }

    /// Create a cycle detected error
    pub fn cycle_detected(id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self::CycleDetected {
            id: id.into(),
            parent_id: parent_id.into(),
        }
    }

    /// Create a transaction conflict error
    pub fn transaction_conflict(context: impl Into<String>) -> Self {
        Self::TransactionConflict {
            context: context.into(),
        }
    }
}
