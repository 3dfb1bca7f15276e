//! # Enrolment Windows
//!
//! A user can qualify for a link through several source enrolments at once
//! (a manual enrolment plus a cohort, two links into the same root...). The
//! derived enrolment mirrors their union.
//!
//! ## Aggregation Rules
//! ```text
//! rows:   active  [100 ──────────────────── ∞)      (end = 0 means no end)
//!         suspended    [200 ──── 500]
//!
//! status      = active iff ANY row is active AND its instance is enabled
//! time_start  = min(start) over active rows
//! time_end    = max(end)   over active rows, 0 dominates
//!
//! result: active [100 ── ∞)
//! ```
//! With no active rows the derived enrolment is suspended with an unbounded
//! window.

use serde::{Deserialize, Serialize};

use crate::types::{EnrolStatus, SourceEnrolment, UserEnrolment};

/// Aggregated state a derived enrolment must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentWindow {
    pub status: EnrolStatus,
    pub time_start: i64,
    pub time_end: i64,
}

impl ParentWindow {
    /// Aggregates the qualifying rows of ONE user. Returns `None` when the
    /// user has no qualifying rows at all.
    pub fn aggregate<'a, I>(rows: I) -> Option<ParentWindow>
    where
        I: IntoIterator<Item = &'a SourceEnrolment>,
    {
        let mut seen = false;
        let mut start: Option<i64> = None;
        let mut end: Option<i64> = None;

        for row in rows {
            seen = true;
            if !row.is_active() {
                continue;
            }
            start = Some(start.map_or(row.time_start, |s| s.min(row.time_start)));
            end = Some(match end {
                Some(0) => 0,
                _ if row.time_end == 0 => 0,
                Some(e) => e.max(row.time_end),
                None => row.time_end,
            });
        }

        if !seen {
            return None;
        }

        Some(match (start, end) {
            (Some(time_start), Some(time_end)) => ParentWindow {
                status: EnrolStatus::Active,
                time_start,
                time_end,
            },
            _ => ParentWindow {
                status: EnrolStatus::Suspended,
                time_start: 0,
                time_end: 0,
            },
        })
    }

    /// True when the derived enrolment has drifted from this window.
    pub fn differs_from(&self, enrolment: &UserEnrolment) -> bool {
        self.status != enrolment.status
            || self.time_start != enrolment.time_start
            || self.time_end != enrolment.time_end
    }
}

/// Whether a derived enrolment currently entitles its user to roles.
///
/// Roles are held only while the enrolment is active and its link is
/// enabled. The time window does not matter here: an enrolment that has not
/// started or has already ended keeps its roles, and access is left to the
/// host's own window check. Evaluating the window would make role state
/// depend on the clock, so a run with no data change could still assign or
/// unassign roles and a second run would not be a no-op.
pub fn holds_roles(status: EnrolStatus, link_enabled: bool) -> bool {
    link_enabled && status == EnrolStatus::Active
}
