//! Database Layer
//!
//! This module handles all database interactions using libsql:
//!
//! - Database initialization and connection management
//! - Idempotent schema creation for the shared tree table and the
//!   per-domain payload tables
//! - SQLite configuration (WAL mode, foreign keys, busy timeout)
//!
//! Structural queries and mutations live in [`crate::tree`]; this layer only
//! owns connections and schema.

mod database;
mod error;

pub use database::DatabaseService;
pub use error::DatabaseError;
