//! # Error Types
//!
//! Domain-specific error types for metagroup-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  metagroup-core errors (this file)                                      │
//! │  ├── CoreError        - Structural link errors                          │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  metagroup-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  metagroup-sync errors (separate crate)                                 │
//! │  └── SyncError        - Engine, config and lookup failures              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → CLI exit code          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Referential loss (a source course or group that disappeared) is NOT an
//! error here. It is a state handled by the lost-link handler.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Structural errors in the link graph.
///
/// These are raised when a link is created or edited and are never resolved
/// silently.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A link would mirror a course into itself.
    #[error("Course {course_id} cannot be linked to itself")]
    SelfReferentialLink { course_id: i64 },

    /// The target course already feeds the proposed source.
    ///
    /// ## When This Occurs
    /// ```text
    /// Existing: B ◄── A        (course B mirrors a group of course A)
    /// Proposed: A ◄── B
    ///
    /// compute_source_courses(B) = [A, B]  contains target A
    ///      │
    ///      ▼
    /// TargetInSourceChain { target_course_id: A, source_courses: [A, B] }
    /// ```
    #[error("Course {target_course_id} already appears in the source chain {source_courses:?}")]
    TargetInSourceChain {
        target_course_id: i64,
        source_courses: Vec<i64>,
    },

    /// Root resolution revisited a course.
    #[error("Cycle detected while resolving the root of course {course_id}")]
    CycleDetected { course_id: i64 },

    /// Root resolution ended at a course that no longer exists.
    #[error("Source course {course_id} cannot be resolved")]
    UnresolvableSource { course_id: i64 },

    /// A target group id that cannot name a real group.
    #[error("Invalid target group id: {group_id}")]
    InvalidTargetGroup { group_id: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., unparsable action name).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::SelfReferentialLink { course_id: 10 };
        assert_eq!(err.to_string(), "Course 10 cannot be linked to itself");

        let err = CoreError::TargetInSourceChain {
            target_course_id: 3,
            source_courses: vec![3, 7],
        };
        assert_eq!(
            err.to_string(),
            "Course 3 already appears in the source chain [3, 7]"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::MustBePositive {
            field: "source_group_id".to_string(),
        };
        assert_eq!(err.to_string(), "source_group_id must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "name".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
