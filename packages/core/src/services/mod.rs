//! Business Services
//!
//! This module contains the domain services built on the shared tree store:
//!
//! - `ContentService` - folder hierarchy and content items
//! - `GroupService` - group hierarchy and user memberships
//!
//! Services own domain payload rows and validation, delegate every
//! structural mutation to [`crate::tree::TreeStore`], and translate its
//! typed failures into [`ServiceError`] for the surface layer.

pub mod content_service;
pub mod error;
pub mod group_service;

pub use content_service::ContentService;
pub use error::ServiceError;
pub use group_service::GroupService;
