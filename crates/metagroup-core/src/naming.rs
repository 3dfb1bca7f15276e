//! # Target Group Naming
//!
//! Names for groups created automatically in the target course.
//!
//! ```text
//! source group "Team A (3)"
//!      │ strip trailing " (N)"
//!      ▼
//! "Team A" ──► add suffix? ──► "Team A (linked)"
//!                                   │ clash in target course
//!                                   ▼
//!                      "Team A (linked) (2)", "Team A (linked) (3)", ...
//! ```

/// Suffix marking groups that are fed by a link.
pub const LINKED_SUFFIX: &str = " (linked)";

/// Strips one trailing ` (N)` counter, if present.
pub fn strip_counter(name: &str) -> &str {
    let trimmed = name.trim_end();
    if let Some(open) = trimmed.rfind(" (") {
        let inner = &trimmed[open + 2..];
        if let Some(digits) = inner.strip_suffix(')') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return &trimmed[..open];
            }
        }
    }
    trimmed
}

/// Base name for a new target group.
pub fn base_group_name(source_name: &str, add_suffix: bool) -> String {
    let base = strip_counter(source_name);
    if add_suffix && !base.ends_with(LINKED_SUFFIX) {
        format!("{}{}", base, LINKED_SUFFIX)
    } else {
        base.to_string()
    }
}

/// Candidate for the `attempt`-th try. The first attempt uses the base name,
/// later attempts append ` (2)`, ` (3)`...
pub fn candidate_name(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{} ({})", base, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_counter() {
        assert_eq!(strip_counter("Team A (3)"), "Team A");
        assert_eq!(strip_counter("Team A"), "Team A");
        assert_eq!(strip_counter("Team (A)"), "Team (A)");
        assert_eq!(strip_counter("Team A ()"), "Team A ()");
    }

    #[test]
    fn test_base_group_name() {
        assert_eq!(base_group_name("Team A", true), "Team A (linked)");
        assert_eq!(base_group_name("Team A (linked) (2)", true), "Team A (linked)");
        assert_eq!(base_group_name("Team A (2)", false), "Team A");
    }

    #[test]
    fn test_candidate_name() {
        assert_eq!(candidate_name("G", 1), "G");
        assert_eq!(candidate_name("G", 2), "G (2)");
    }
}
