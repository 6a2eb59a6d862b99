//! Service Layer Error Types
//!
//! This module defines error types for service-layer operations: domain
//! validation failures plus the translation of tree-store failures into
//! service-facing conditions. The HTTP mapping of these conditions (404 for
//! `NotFound`, 400-class for validation) lives with the routing layer, not
//! here.

use crate::db::DatabaseError;
use crate::tree::TreeStoreError;
use thiserror::Error;

/// Service operation errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Referenced resource does not exist
    #[error("Not found: {id}")]
    NotFound { id: String },

    /// Name failed domain validation
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Color failed domain validation
    #[error("Invalid color: {0}")]
    InvalidColor(String),

    /// Requested move would place a node under its own descendant
    #[error("Cannot move {id} under its descendant {parent_id}")]
    CircularMove { id: String, parent_id: String },

    /// Concurrent conflicting mutation; the caller may retry once
    #[error("Conflict: {context}")]
    Conflict { context: String },

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),
}

impl ServiceError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an invalid name error
    pub fn invalid_name(msg: impl Into<String>) -> Self {
        Self::InvalidName(msg.into())
    }

    /// Create an invalid color error
    pub fn invalid_color(msg: impl Into<String>) -> Self {
        Self::InvalidColor(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(context: impl Into<String>) -> Self {
        Self::Conflict {
            context: context.into(),
        }
    }
}

impl From<TreeStoreError> for ServiceError {
    fn from(e: TreeStoreError) -> Self {
        match e {
            TreeStoreError::NodeNotFound { id } => Self::NotFound { id },
            TreeStoreError::NodeExists { id } => Self::Conflict {
                context: format!("id already in use: {}", id),
            },
            TreeStoreError::CycleDetected { id, parent_id } => {
                Self::CircularMove { id, parent_id }
            }
            TreeStoreError::TransactionConflict { context } => Self::Conflict { context },
            TreeStoreError::Database(e) => Self::Database(e),
        }
    }
}
