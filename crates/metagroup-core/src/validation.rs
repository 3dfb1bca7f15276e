//! # Validation Module
//!
//! Checks a proposed link before anything is written.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Link Creation / Edit                               │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (pure)                                            │
//! │  ├── ids are positive                                                   │
//! │  ├── target course != source course                                     │
//! │  └── target course not in computed source chain                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Link manager (metagroup-sync)                                 │
//! │  ├── courses exist                                                      │
//! │  └── groups belong to the right course                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  └── CHECK (target_course_id <> source_course_id)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::MAX_GROUP_NAME_LENGTH;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates that an id names a real record.
pub fn validate_id(field: &str, id: i64) -> ValidationResult<()> {
    if id <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates the ids of a proposed link and rejects direct self-loops.
///
/// ## Example
/// ```rust
/// use metagroup_core::validation::validate_link_request;
///
/// assert!(validate_link_request(20, 10, 5, None).is_ok());
/// assert!(validate_link_request(10, 10, 5, None).is_err());
/// ```
pub fn validate_link_request(
    target_course_id: i64,
    source_course_id: i64,
    source_group_id: i64,
    target_group_id: Option<i64>,
) -> CoreResult<()> {
    validate_id("target_course_id", target_course_id)?;
    validate_id("source_course_id", source_course_id)?;
    validate_id("source_group_id", source_group_id)?;
    if let Some(group_id) = target_group_id {
        validate_target_group(group_id)?;
    }

    if target_course_id == source_course_id {
        return Err(CoreError::SelfReferentialLink {
            course_id: target_course_id,
        });
    }

    Ok(())
}

/// Rejects a target group id that cannot name a real group.
pub fn validate_target_group(group_id: i64) -> CoreResult<()> {
    if group_id <= 0 {
        return Err(CoreError::InvalidTargetGroup { group_id });
    }
    Ok(())
}

/// Rejects a link whose target course already feeds the proposed source.
pub fn check_source_chain(target_course_id: i64, source_courses: &[i64]) -> CoreResult<()> {
    if source_courses.contains(&target_course_id) {
        return Err(CoreError::TargetInSourceChain {
            target_course_id,
            source_courses: source_courses.to_vec(),
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates and trims an explicit target group name.
pub fn validate_group_name(name: &str) -> ValidationResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "group_name".to_string(),
        });
    }
    if trimmed.chars().count() > MAX_GROUP_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: "group_name".to_string(),
            max: MAX_GROUP_NAME_LENGTH,
        });
    }
    Ok(trimmed.to_string())
}

/// Validates an enrolment method name (`manual`, `self`, `metagroup`...).
pub fn validate_method_name(method: &str) -> ValidationResult<()> {
    if method.is_empty() {
        return Err(ValidationError::Required {
            field: "enabled_methods".to_string(),
        });
    }
    if !method
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "enabled_methods".to_string(),
            reason: format!("'{}' may only contain a-z, 0-9 and _", method),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_link_request() {
        assert!(validate_link_request(20, 10, 5, Some(50)).is_ok());
        assert!(matches!(
            validate_link_request(0, 10, 5, None),
            Err(CoreError::Validation(ValidationError::MustBePositive { .. }))
        ));
        assert!(matches!(
            validate_link_request(20, 10, 5, Some(0)),
            Err(CoreError::InvalidTargetGroup { group_id: 0 })
        ));
    }

    #[test]
    fn test_self_loop_always_rejected() {
        for course in [1, 10, 99_999] {
            assert!(matches!(
                validate_link_request(course, course, 5, None),
                Err(CoreError::SelfReferentialLink { .. })
            ));
        }
    }

    #[test]
    fn test_check_source_chain() {
        assert!(check_source_chain(3, &[1, 2]).is_ok());
        assert!(matches!(
            check_source_chain(1, &[1, 2]),
            Err(CoreError::TargetInSourceChain { target_course_id: 1, .. })
        ));
    }

    #[test]
    fn test_validate_group_name() {
        assert_eq!(validate_group_name("  Team A ").unwrap(), "Team A");
        assert!(validate_group_name("   ").is_err());
        assert!(validate_group_name(&"x".repeat(MAX_GROUP_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_method_name() {
        assert!(validate_method_name("metagroup").is_ok());
        assert!(validate_method_name("").is_err());
        assert!(validate_method_name("Self Enrol").is_err());
    }
}
