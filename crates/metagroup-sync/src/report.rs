//! # Reconciliation Reports
//!
//! Counters and per-record failures collected by a batch run.
//!
//! ```text
//! SyncReport
//! ├── run_id, course_id, started_at, finished_at
//! ├── lost_links [ids]      promoted / frozen / initialized_caches
//! ├── create   PassCounts { processed, applied, skipped, errors }
//! ├── extras   PassCounts
//! ├── status   PassCounts
//! ├── roles_assigned / roles_unassigned   PassCounts
//! ├── cleanup  PassCounts
//! └── failures [RecordFailure { pass, link_id, user_id, course_id, message }]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};
use uuid::Uuid;

/// The step of a run a record was processed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Promote,
    LostLinks,
    InitCaches,
    Create,
    Extras,
    Status,
    Roles,
    Cleanup,
    Freeze,
    Incremental,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pass::Promote => "promote",
            Pass::LostLinks => "lost_links",
            Pass::InitCaches => "init_caches",
            Pass::Create => "create",
            Pass::Extras => "extras",
            Pass::Status => "status",
            Pass::Roles => "roles",
            Pass::Cleanup => "cleanup",
            Pass::Freeze => "freeze",
            Pass::Incremental => "incremental",
        };
        f.write_str(name)
    }
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounts {
    /// Records examined.
    pub processed: u64,
    /// Records changed.
    pub applied: u64,
    /// Records deliberately left alone (role filter, bad config).
    pub skipped: u64,
    /// Records whose processing failed.
    pub errors: u64,
}

/// A single record that failed inside a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub pass: Pass,
    pub link_id: Option<i64>,
    pub user_id: Option<i64>,
    pub course_id: Option<i64>,
    pub message: String,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    /// `None` means every link.
    pub course_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub lost_links: Vec<i64>,
    pub promoted: u64,
    pub frozen: u64,
    pub initialized_caches: u64,

    pub create: PassCounts,
    pub extras: PassCounts,
    pub status: PassCounts,
    pub roles_assigned: PassCounts,
    pub roles_unassigned: PassCounts,
    pub cleanup: PassCounts,

    pub failures: Vec<RecordFailure>,
}

impl SyncReport {
    pub fn new(course_id: Option<i64>) -> Self {
        SyncReport {
            run_id: Uuid::new_v4(),
            course_id,
            started_at: Utc::now(),
            finished_at: None,
            lost_links: Vec::new(),
            promoted: 0,
            frozen: 0,
            initialized_caches: 0,
            create: PassCounts::default(),
            extras: PassCounts::default(),
            status: PassCounts::default(),
            roles_assigned: PassCounts::default(),
            roles_unassigned: PassCounts::default(),
            cleanup: PassCounts::default(),
            failures: Vec::new(),
        }
    }

    /// Records a per-record failure and logs it with its context.
    pub fn fail(
        &mut self,
        pass: Pass,
        link_id: Option<i64>,
        user_id: Option<i64>,
        course_id: Option<i64>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        error!(%pass, ?link_id, ?user_id, ?course_id, error = %message, "Record failed");
        self.failures.push(RecordFailure {
            pass,
            link_id,
            user_id,
            course_id,
            message,
        });
    }

    /// Changes made to membership, enrolment and role state. Zero on a
    /// second run with no external change.
    pub fn operations(&self) -> u64 {
        [
            &self.create,
            &self.extras,
            &self.status,
            &self.roles_assigned,
            &self.roles_unassigned,
            &self.cleanup,
        ]
        .iter()
        .map(|c| c.applied)
        .sum()
    }

    /// Counters a per-record result of `pass` is folded into.
    pub fn counts_mut(&mut self, pass: Pass) -> &mut PassCounts {
        match pass {
            Pass::Create => &mut self.create,
            Pass::Extras => &mut self.extras,
            Pass::Status => &mut self.status,
            Pass::Roles => &mut self.roles_assigned,
            _ => &mut self.cleanup,
        }
    }

    /// Failed records across all passes.
    pub fn errors(&self) -> u64 {
        self.failures.len() as u64
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Logs every counter at info level.
    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            course_id = ?self.course_id,
            lost_links = self.lost_links.len(),
            promoted = self.promoted,
            frozen = self.frozen,
            initialized_caches = self.initialized_caches,
            "Run summary"
        );
        for (name, counts) in [
            ("create", &self.create),
            ("extras", &self.extras),
            ("status", &self.status),
            ("roles_assigned", &self.roles_assigned),
            ("roles_unassigned", &self.roles_unassigned),
            ("cleanup", &self.cleanup),
        ] {
            info!(
                pass = name,
                processed = counts.processed,
                applied = counts.applied,
                skipped = counts.skipped,
                errors = counts.errors,
                "Pass counters"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_sum_applied_only() {
        let mut report = SyncReport::new(Some(20));
        report.create.applied = 2;
        report.create.processed = 5;
        report.roles_unassigned.applied = 1;
        report.status.skipped = 4;
        assert_eq!(report.operations(), 3);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_failures_are_recorded() {
        let mut report = SyncReport::new(None);
        report.fail(Pass::Create, Some(7), Some(42), Some(20), "boom");
        assert_eq!(report.errors(), 1);
        assert_eq!(report.failures[0].pass, Pass::Create);
        assert_eq!(report.failures[0].link_id, Some(7));

        report.finish();
        assert!(report.finished_at.is_some());

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"pass\":\"create\""));
    }
}
