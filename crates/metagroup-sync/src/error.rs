//! # Sync Error Types
//!
//! Error types for engine operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐  │
//! │  │  Configuration  │  │   Structural    │  │     Lookups             │  │
//! │  │                 │  │                 │  │                         │  │
//! │  │  InvalidConfig  │  │  Structural     │  │  CourseNotFound         │  │
//! │  │  ConfigLoad     │  │  (CoreError)    │  │  GroupNotFound          │  │
//! │  │  ConfigSave     │  │                 │  │  LinkNotFound           │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                               │
//! │  │    Database     │  │    Internal     │                               │
//! │  │                 │  │                 │                               │
//! │  │  Database       │  │  Serialization  │                               │
//! │  │                 │  │  Internal       │                               │
//! │  └─────────────────┘  └─────────────────┘                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-record failures inside a batch run do not surface as `Err`: they are
//! recorded in the [`SyncReport`](crate::report::SyncReport) and the pass
//! continues.

use thiserror::Error;

use metagroup_core::CoreError;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Structural Errors
    // =========================================================================
    /// Self-loop, target already in the source chain, cycle, bad id.
    #[error(transparent)]
    Structural(#[from] CoreError),

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("Course not found: {0}")]
    CourseNotFound(i64),

    #[error("Group {group_id} not found in course {course_id}")]
    GroupNotFound { group_id: i64, course_id: i64 },

    #[error("Link not found: {0}")]
    LinkNotFound(i64),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<metagroup_db::DbError> for SyncError {
    fn from(err: metagroup_db::DbError) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<metagroup_core::ValidationError> for SyncError {
    fn from(err: metagroup_core::ValidationError) -> Self {
        SyncError::Structural(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true for errors a link request is rejected with.
    pub fn is_structural(&self) -> bool {
        matches!(self, SyncError::Structural(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_) | SyncError::ConfigSaveFailed(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::CourseNotFound(_) | SyncError::GroupNotFound { .. } | SyncError::LinkNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert!(SyncError::from(CoreError::SelfReferentialLink { course_id: 3 }).is_structural());
        assert!(SyncError::InvalidConfig("bad".into()).is_config_error());
        assert!(SyncError::LinkNotFound(9).is_not_found());
        assert!(!SyncError::Database("locked".into()).is_not_found());
    }

    #[test]
    fn test_structural_display_is_transparent() {
        let err = SyncError::from(CoreError::SelfReferentialLink { course_id: 3 });
        assert_eq!(err.to_string(), "Course 3 cannot be linked to itself");
    }

    #[test]
    fn test_validation_wraps_as_structural() {
        let err = SyncError::from(metagroup_core::ValidationError::MustBePositive {
            field: "source_group_id".into(),
        });
        assert!(err.is_structural());
    }
}
