//! # Reconciliation Engine
//!
//! Brings every link in scope back into agreement with its source.
//!
//! ## Run Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  reconcile(course | all)                                                │
//! │                                                                         │
//! │  0a. lost links      disposition applied, ids skipped below             │
//! │  0b. init caches     up to INITIAL_CACHE_BATCH empty source-course sets │
//! │  0c. promote         disabled_pending_initial_sync ──► enabled          │
//! │                                                                         │
//! │  1. create/restore   missing enrolment and/or target-group membership   │
//! │  2. extras           move members out of old target groups, apply the   │
//! │                      unenrol action to users who no longer qualify      │
//! │  3. status           enrolment status/window drifted from the source    │
//! │  4. roles            assign missing, then remove surplus link roles     │
//! │                                                                         │
//! │  5. cleanup          sync_all off: users without synchronised roles     │
//! │  6. freeze           snapshot links that ran without failure            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Frozen links are skipped entirely. A failure on one record is recorded
//! in the report and the pass moves on; only failing to list the links in
//! scope aborts a run.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use metagroup_core::{
    EnrolStatus, Link, LinkStatus, ParentWindow, SourceEnrolment, SyncMode, UnenrolAction,
    UserEnrolment,
    INITIAL_CACHE_BATCH, LINK_COMPONENT,
};
use metagroup_db::RoleFilter;

use crate::error::{SyncError, SyncResult};
use crate::lost::LostLinkHandler;
use crate::ops::{warn_invalid_target_group, LinkOps, QualifyingRows};
use crate::report::{Pass, SyncReport};

/// Status code of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    /// The run could not start or recorded per-record failures.
    Error,
    /// The engine is switched off.
    Disabled,
}

impl RunStatus {
    pub fn code(self) -> i32 {
        match self {
            RunStatus::Ok => 0,
            RunStatus::Error => 1,
            RunStatus::Disabled => 2,
        }
    }
}

/// Outcome of one record inside a pass.
enum Outcome {
    Applied(u64),
    Skipped,
}

pub struct Reconciler {
    ops: LinkOps,
    lost: LostLinkHandler,
}

impl Reconciler {
    pub fn new(ops: LinkOps) -> Self {
        let lost = LostLinkHandler::new(ops.clone());
        Reconciler { ops, lost }
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    /// Runs the batch wrapper: engine switch, reconciliation, status code.
    pub async fn run_reconciliation(&self, course_id: Option<i64>, verbose: bool) -> RunStatus {
        if !self.ops.config().enabled {
            info!("Engine disabled, unassigning every link role");
            let filter = RoleFilter {
                component: Some(LINK_COMPONENT.to_string()),
                ..RoleFilter::default()
            };
            if let Err(e) = self.ops.db().roles().unassign_all(&filter).await {
                error!(error = %e, "Failed to unassign link roles");
            }
            return RunStatus::Disabled;
        }

        match self.reconcile(course_id).await {
            Ok(report) => {
                if verbose {
                    report.log_summary();
                }
                if report.has_failures() {
                    RunStatus::Error
                } else {
                    RunStatus::Ok
                }
            }
            Err(e) => {
                error!(?course_id, error = %e, "Reconciliation failed to start");
                RunStatus::Error
            }
        }
    }

    /// Reconciles every link targeting `course_id`, or every link.
    pub async fn reconcile(&self, course_id: Option<i64>) -> SyncResult<SyncReport> {
        let mut report = SyncReport::new(course_id);
        info!(run_id = %report.run_id, ?course_id, "Reconciliation started");

        self.handle_lost_links(course_id, &mut report).await?;
        self.initialize_caches(course_id, &mut report).await?;
        self.promote_pending(course_id, &mut report).await?;

        let mut links: Vec<Link> = self
            .ops
            .db()
            .links()
            .list_in_scope(course_id)
            .await?
            .into_iter()
            .filter(|link| !report.lost_links.contains(&link.id) && !link.is_frozen())
            .collect();

        for link in links.iter_mut() {
            self.create_pass(link, &mut report).await;
        }
        for link in &links {
            self.extras_pass(link, &mut report).await;
        }
        for link in &links {
            self.status_pass(link, &mut report).await;
        }
        for link in &links {
            self.roles_pass(link, &mut report).await;
        }
        if !self.ops.config().sync.sync_all {
            for link in &links {
                self.cleanup_pass(link, &mut report).await;
            }
        }
        self.freeze_snapshots(&links, &mut report).await;

        report.finish();
        info!(
            run_id = %report.run_id,
            operations = report.operations(),
            errors = report.errors(),
            lost_links = report.lost_links.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Preparation
    // =========================================================================

    async fn handle_lost_links(&self, course_id: Option<i64>, report: &mut SyncReport) -> SyncResult<()> {
        for link in self.lost.find_lost_links(course_id).await? {
            if let Err(e) = self.lost.deal_with_lost_link(&link).await {
                report.fail(Pass::LostLinks, Some(link.id), None, Some(link.target_course_id), e.to_string());
            }
            report.lost_links.push(link.id);
        }
        Ok(())
    }

    async fn initialize_caches(&self, course_id: Option<i64>, report: &mut SyncReport) -> SyncResult<()> {
        let pending: Vec<Link> = self
            .ops
            .db()
            .links()
            .list_missing_source_courses(INITIAL_CACHE_BATCH)
            .await?
            .into_iter()
            .filter(|link| course_id.map_or(true, |c| link.target_course_id == c))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let graph = self.ops.load_graph().await?;
        for link in pending {
            let courses = graph.compute_source_courses(link.source_course_id, Some(link.source_group_id));
            match self.ops.db().links().set_source_courses(link.id, &courses).await {
                Ok(()) => {
                    debug!(link_id = link.id, ?courses, "Source courses initialised");
                    report.initialized_caches += 1;
                }
                Err(e) => report.fail(Pass::InitCaches, Some(link.id), None, Some(link.target_course_id), e.to_string()),
            }
        }
        Ok(())
    }

    async fn promote_pending(&self, course_id: Option<i64>, report: &mut SyncReport) -> SyncResult<()> {
        let pending: Vec<Link> = self
            .ops
            .db()
            .links()
            .list_in_scope(course_id)
            .await?
            .into_iter()
            .filter(|l| l.status == LinkStatus::DisabledPendingInitialSync && !report.lost_links.contains(&l.id))
            .collect();
        for link in &pending {
            match self.ops.db().links().set_status(link.id, LinkStatus::Enabled).await {
                Ok(()) => {
                    info!(link_id = link.id, "Pending link enabled");
                    report.promoted += 1;
                }
                Err(e) => report.fail(Pass::Promote, Some(link.id), None, Some(link.target_course_id), e.to_string()),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Pass 1: Create / Restore
    // =========================================================================

    async fn create_pass(&self, link: &mut Link, report: &mut SyncReport) {
        if !link.is_enabled() {
            return;
        }
        let Some((rows, enrolments)) = self.load(link, Pass::Create, report).await else {
            return;
        };
        if !link.has_valid_target_group() {
            warn_invalid_target_group(link);
        }

        for (user_id, user_rows) in &rows {
            report.create.processed += 1;
            let result = self
                .create_for_user(link, *user_id, user_rows, enrolments.get(user_id))
                .await;
            record(report, Pass::Create, link, *user_id, result);
        }
    }

    async fn create_for_user(
        &self,
        link: &mut Link,
        user_id: i64,
        rows: &[SourceEnrolment],
        existing: Option<&UserEnrolment>,
    ) -> SyncResult<Outcome> {
        if !self.ops.passes_role_filter(link, user_id).await? {
            debug!(link_id = link.id, user_id, "Skipping user without synchronised role");
            return Ok(Outcome::Skipped);
        }
        let Some(window) = ParentWindow::aggregate(rows) else {
            return Ok(Outcome::Skipped);
        };
        let created = self.ops.create_or_restore(link, user_id, window, existing).await?;
        Ok(Outcome::Applied(created))
    }

    // =========================================================================
    // Pass 2: Extras and Moves
    // =========================================================================

    async fn extras_pass(&self, link: &Link, report: &mut SyncReport) {
        let Some((rows, enrolments)) = self.load(link, Pass::Extras, report).await else {
            return;
        };
        let old_groups = match self.old_groups(link).await {
            Ok(groups) => groups,
            Err(e) => {
                report.fail(Pass::Extras, Some(link.id), None, Some(link.target_course_id), e.to_string());
                return;
            }
        };

        for (user_id, enrolment) in &enrolments {
            report.extras.processed += 1;
            let result = self
                .extras_for_user(link, enrolment, rows.contains_key(user_id), old_groups.get(user_id))
                .await;
            record(report, Pass::Extras, link, *user_id, result);
        }
    }

    /// Groups other than the current target that still hold a membership
    /// this link created, by user.
    async fn old_groups(&self, link: &Link) -> SyncResult<BTreeMap<i64, Vec<i64>>> {
        let mut by_user: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for member in self
            .ops
            .db()
            .groups()
            .members_by_origin(LINK_COMPONENT, link.id)
            .await?
        {
            if member.group_id != link.target_group_id {
                by_user.entry(member.user_id).or_default().push(member.group_id);
            }
        }
        Ok(by_user)
    }

    async fn extras_for_user(
        &self,
        link: &Link,
        enrolment: &UserEnrolment,
        qualifies: bool,
        old_groups: Option<&Vec<i64>>,
    ) -> SyncResult<Outcome> {
        let mut applied = 0;

        if let Some(old_groups) = old_groups {
            if !link.has_valid_target_group() {
                warn!(
                    link_id = link.id,
                    user_id = enrolment.user_id,
                    target_group_id = link.target_group_id,
                    "Skipping group move, target group id is not a real group"
                );
                return Ok(Outcome::Skipped);
            }
            for old_group_id in old_groups {
                if self.ops.move_member(link, enrolment.user_id, *old_group_id).await? {
                    applied += 1;
                }
            }
        }

        if !qualifies && self.ops.apply_unenrol_action(link, enrolment).await? {
            applied += 1;
        }
        Ok(Outcome::Applied(applied))
    }

    // =========================================================================
    // Pass 3: Status
    // =========================================================================

    async fn status_pass(&self, link: &Link, report: &mut SyncReport) {
        let Some((rows, enrolments)) = self.load(link, Pass::Status, report).await else {
            return;
        };

        for (user_id, enrolment) in &enrolments {
            let Some(user_rows) = rows.get(user_id) else {
                continue;
            };
            report.status.processed += 1;
            let result = self.status_for_user(link, enrolment, user_rows).await;
            record(report, Pass::Status, link, *user_id, result);
        }
    }

    async fn status_for_user(
        &self,
        link: &Link,
        enrolment: &UserEnrolment,
        rows: &[SourceEnrolment],
    ) -> SyncResult<Outcome> {
        let Some(window) = ParentWindow::aggregate(rows) else {
            return Ok(Outcome::Skipped);
        };
        if !window.differs_from(enrolment) {
            return Ok(Outcome::Applied(0));
        }
        if window.status == EnrolStatus::Active
            && self.ops.config().unenrol_action() != UnenrolAction::Unenrol
            && !self.ops.passes_role_filter(link, enrolment.user_id).await?
        {
            debug!(link_id = link.id, user_id = enrolment.user_id, "Skipping unsuspend of user without synchronised role");
            return Ok(Outcome::Skipped);
        }
        let changed = self.ops.update_status(link, enrolment, window).await?;
        Ok(Outcome::Applied(changed as u64))
    }

    // =========================================================================
    // Pass 4: Roles
    // =========================================================================

    async fn roles_pass(&self, link: &Link, report: &mut SyncReport) {
        let enrolments = match self.ops.db().enrolments().list_for_instance(link.id).await {
            Ok(enrolments) => enrolments,
            Err(e) => {
                report.fail(Pass::Roles, Some(link.id), None, Some(link.target_course_id), e.to_string());
                return;
            }
        };

        for enrolment in &enrolments {
            report.roles_assigned.processed += 1;
            report.roles_unassigned.processed += 1;
            match self.ops.sync_roles(link, enrolment).await {
                Ok(changes) => {
                    report.roles_assigned.applied += changes.assigned;
                    report.roles_unassigned.applied += changes.unassigned;
                }
                Err(e) => {
                    report.roles_assigned.errors += 1;
                    report.fail(
                        Pass::Roles,
                        Some(link.id),
                        Some(enrolment.user_id),
                        Some(link.target_course_id),
                        e.to_string(),
                    );
                }
            }
        }
    }

    // =========================================================================
    // Cleanup and Freeze
    // =========================================================================

    async fn cleanup_pass(&self, link: &Link, report: &mut SyncReport) {
        let enrolments = match self.ops.db().enrolments().list_for_instance(link.id).await {
            Ok(enrolments) => enrolments,
            Err(e) => {
                report.fail(Pass::Cleanup, Some(link.id), None, Some(link.target_course_id), e.to_string());
                return;
            }
        };

        for enrolment in &enrolments {
            let result = self.cleanup_user(link, enrolment).await;
            if matches!(result, Ok(Outcome::Skipped)) {
                continue;
            }
            report.cleanup.processed += 1;
            record(report, Pass::Cleanup, link, enrolment.user_id, result);
        }
    }

    async fn cleanup_user(&self, link: &Link, enrolment: &UserEnrolment) -> SyncResult<Outcome> {
        if self.ops.passes_role_filter(link, enrolment.user_id).await? {
            return Ok(Outcome::Skipped);
        }
        let changed = self.ops.apply_unenrol_action(link, enrolment).await?;
        if changed {
            debug!(link_id = link.id, user_id = enrolment.user_id, "User without synchronised role removed");
        }
        Ok(Outcome::Applied(changed as u64))
    }

    async fn freeze_snapshots(&self, links: &[Link], report: &mut SyncReport) {
        let failed: BTreeSet<i64> = report.failures.iter().filter_map(|f| f.link_id).collect();
        let now = Utc::now();
        for link in links
            .iter()
            .filter(|l| l.sync_mode == SyncMode::Snapshot && l.is_enabled() && !failed.contains(&l.id))
        {
            match self.ops.db().links().set_frozen(link.id, Some(now)).await {
                Ok(()) => {
                    info!(link_id = link.id, "Snapshot link frozen");
                    report.frozen += 1;
                }
                Err(e) => report.fail(Pass::Freeze, Some(link.id), None, Some(link.target_course_id), e.to_string()),
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Qualifying rows and current derived enrolments (by user) of a link.
    async fn load(
        &self,
        link: &Link,
        pass: Pass,
        report: &mut SyncReport,
    ) -> Option<(QualifyingRows, BTreeMap<i64, UserEnrolment>)> {
        let loaded = async {
            let rows = self.ops.qualifying_rows(link, None).await?;
            let enrolments = self
                .ops
                .db()
                .enrolments()
                .list_for_instance(link.id)
                .await?
                .into_iter()
                .map(|ue| (ue.user_id, ue))
                .collect::<BTreeMap<_, _>>();
            Ok::<_, SyncError>((rows, enrolments))
        }
        .await;

        match loaded {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                report.fail(pass, Some(link.id), None, Some(link.target_course_id), e.to_string());
                None
            }
        }
    }
}

/// Folds one record's result into the report.
fn record(report: &mut SyncReport, pass: Pass, link: &Link, user_id: i64, result: SyncResult<Outcome>) {
    let counts = report.counts_mut(pass);
    match result {
        Ok(Outcome::Applied(n)) => counts.applied += n,
        Ok(Outcome::Skipped) => counts.skipped += 1,
        Err(e) => {
            counts.errors += 1;
            report.fail(pass, Some(link.id), Some(user_id), Some(link.target_course_id), e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use metagroup_core::{LostLinkAction, NewLink};

    /// Source course with a group holding users 1 and 2, linked into a
    /// target course.
    async fn mirrored(fx: &Fixture) -> (i64, i64, i64, i64, Link) {
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        for user in [1, 2] {
            fx.enrol_member(manual, group, user, EnrolStatus::Active, 0, 0).await;
        }
        let link = fx.link(tgt, src, group).await;
        (src, group, tgt, manual, link)
    }

    #[tokio::test]
    async fn test_removed_source_member_is_unenrolled() {
        let fx = Fixture::with_config(|c| c.sync.unenrol_action = UnenrolAction::Unenrol).await;
        let (_src, group, tgt, _manual, link) = mirrored(&fx).await;
        let reconciler = fx.reconciler();

        let report = reconciler.reconcile(Some(tgt)).await.unwrap();
        assert_eq!(report.create.applied, 4);
        assert_eq!(fx.enrolled(link.id).await, vec![1, 2]);
        assert_eq!(fx.members(link.target_group_id).await, vec![1, 2]);

        fx.db.groups().remove_member(group, 2).await.unwrap();
        let report = reconciler.reconcile(Some(tgt)).await.unwrap();

        assert_eq!(report.extras.applied, 1);
        assert_eq!(fx.enrolled(link.id).await, vec![1]);
        assert_eq!(fx.members(link.target_group_id).await, vec![1]);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let fx = Fixture::new().await;
        let (src, _group, tgt, _manual, _link) = mirrored(&fx).await;
        fx.role(5, 1, src).await;
        let reconciler = fx.reconciler();

        let first = reconciler.reconcile(None).await.unwrap();
        assert!(first.operations() > 0);
        assert_eq!(first.roles_assigned.applied, 1);

        let second = reconciler.reconcile(None).await.unwrap();
        assert_eq!(second.operations(), 0);
        assert!(!second.has_failures());
        assert_eq!(fx.db.roles().roles_in_course(tgt, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_aggregates_over_every_qualifying_row() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        let self_enrol = fx.instance(src, "self").await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 100, 0).await;
        fx.enrol(self_enrol, 1, EnrolStatus::Suspended, 200, 500).await;
        let link = fx.link(tgt, src, group).await;
        let reconciler = fx.reconciler();

        reconciler.reconcile(Some(tgt)).await.unwrap();
        let ue = fx.db.enrolments().get(link.id, 1).await.unwrap().unwrap();
        assert_eq!((ue.status, ue.time_start, ue.time_end), (EnrolStatus::Active, 100, 0));

        // Every row suspended: the window collapses to suspended 0/0.
        fx.db
            .enrolments()
            .update_enrol(manual, 1, EnrolStatus::Suspended, None, None)
            .await
            .unwrap();
        let report = reconciler.reconcile(Some(tgt)).await.unwrap();
        assert_eq!(report.status.applied, 1);
        let ue = fx.db.enrolments().get(link.id, 1).await.unwrap().unwrap();
        assert_eq!((ue.status, ue.time_start, ue.time_end), (EnrolStatus::Suspended, 0, 0));
    }

    #[tokio::test]
    async fn test_aggregated_group_keeps_member_of_other_source() {
        let fx = Fixture::with_config(|c| c.sync.unenrol_action = UnenrolAction::Unenrol).await;
        let (a, group_a) = fx.source_course("A", "Team A").await;
        let (b, group_b) = fx.source_course("B", "Team B").await;
        let tgt = fx.course("TGT").await;
        let shared = fx.group(tgt, "Shared").await;
        let manual_a = fx.manual(a).await;
        let manual_b = fx.manual(b).await;
        fx.enrol_member(manual_a, group_a, 1, EnrolStatus::Active, 0, 0).await;
        fx.enrol_member(manual_a, group_a, 2, EnrolStatus::Active, 0, 0).await;
        fx.enrol_member(manual_b, group_b, 1, EnrolStatus::Active, 0, 0).await;
        let link_a = fx.link_into(tgt, shared, a, group_a).await;
        let link_b = fx.link_into(tgt, shared, b, group_b).await;
        let reconciler = fx.reconciler();

        reconciler.reconcile(Some(tgt)).await.unwrap();
        assert_eq!(fx.members(shared).await, vec![1, 2]);

        fx.db.groups().remove_member(group_a, 1).await.unwrap();
        fx.db.groups().remove_member(group_a, 2).await.unwrap();
        reconciler.reconcile(Some(tgt)).await.unwrap();

        assert!(fx.enrolled(link_a.id).await.is_empty());
        assert_eq!(fx.enrolled(link_b.id).await, vec![1]);
        assert_eq!(fx.members(shared).await, vec![1]);

        let second = reconciler.reconcile(Some(tgt)).await.unwrap();
        assert_eq!(second.operations(), 0);
    }

    #[tokio::test]
    async fn test_chain_reaches_the_end_of_the_chain() {
        let fx = Fixture::new().await;
        let (_src, _group, mid, _manual, first) = mirrored(&fx).await;
        let end = fx.course("END").await;
        let second = fx.link(end, mid, first.target_group_id).await;

        fx.reconciler().reconcile(None).await.unwrap();

        assert_eq!(fx.enrolled(second.id).await, vec![1, 2]);
        assert_eq!(fx.members(second.target_group_id).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unsynced_role_removed_from_target() {
        let fx = Fixture::new().await;
        let (src, group, tgt, _manual, link) = mirrored(&fx).await;
        fx.role(5, 1, src).await;
        fx.role(7, 1, tgt).await;
        let reconciler = fx.reconciler();

        reconciler.reconcile(Some(tgt)).await.unwrap();
        assert_eq!(fx.link_roles(link.id, 1).await, vec![5]);

        fx.db.groups().remove_member(group, 1).await.unwrap();
        reconciler.reconcile(Some(tgt)).await.unwrap();

        let ue = fx.db.enrolments().get(link.id, 1).await.unwrap().unwrap();
        assert_eq!(ue.status, EnrolStatus::Suspended);
        assert!(fx.link_roles(link.id, 1).await.is_empty());
        let roles: Vec<i64> = fx
            .db
            .roles()
            .roles_in_course(tgt, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|ra| ra.role_id)
            .collect();
        assert_eq!(roles, vec![7]);
    }

    #[tokio::test]
    async fn test_role_filter_without_sync_all() {
        let fx = Fixture::with_config(|c| c.sync.sync_all = false).await;
        let (src, _group, tgt, _manual, link) = mirrored(&fx).await;
        fx.role(5, 1, src).await;
        let reconciler = fx.reconciler();

        let report = reconciler.reconcile(Some(tgt)).await.unwrap();
        assert_eq!(report.create.skipped, 1);
        assert_eq!(fx.enrolled(link.id).await, vec![1]);

        fx.db.roles().unassign(5, 1, src, "", 0).await.unwrap();
        reconciler.reconcile(Some(tgt)).await.unwrap();
        let ue = fx.db.enrolments().get(link.id, 1).await.unwrap().unwrap();
        assert_eq!(ue.status, EnrolStatus::Suspended);
        assert!(fx.link_roles(link.id, 1).await.is_empty());

        let again = reconciler.reconcile(Some(tgt)).await.unwrap();
        assert_eq!(again.operations(), 0);
    }

    #[tokio::test]
    async fn test_pending_link_is_promoted_then_synced() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        let target_group = fx.group(tgt, "Mirror").await;
        let link = fx
            .db
            .links()
            .insert(&NewLink {
                target_course_id: tgt,
                target_group_id: target_group,
                source_course_id: src,
                source_group_id: group,
                status: LinkStatus::DisabledPendingInitialSync,
                ..NewLink::default()
            })
            .await
            .unwrap();

        let report = fx.reconciler().reconcile(None).await.unwrap();

        assert_eq!(report.promoted, 1);
        assert_eq!(report.initialized_caches, 1);
        let stored = fx.db.links().require(link.id).await.unwrap();
        assert_eq!(stored.status, LinkStatus::Enabled);
        assert_eq!(stored.source_courses, vec![src]);
        assert_eq!(fx.enrolled(link.id).await, vec![1]);
    }

    #[tokio::test]
    async fn test_lost_pending_link_is_not_promoted() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let target_group = fx.group(tgt, "Mirror").await;
        let link = fx
            .db
            .links()
            .insert(&NewLink {
                target_course_id: tgt,
                target_group_id: target_group,
                source_course_id: src,
                source_group_id: group,
                status: LinkStatus::DisabledPendingInitialSync,
                ..NewLink::default()
            })
            .await
            .unwrap();
        fx.db.groups().delete(group).await.unwrap();

        let report = fx.reconciler().reconcile(None).await.unwrap();

        assert_eq!(report.lost_links, vec![link.id]);
        assert_eq!(report.promoted, 0);
        let stored = fx.db.links().require(link.id).await.unwrap();
        assert_eq!(stored.status, LinkStatus::DisabledPendingInitialSync);
    }

    #[tokio::test]
    async fn test_snapshot_link_frozen_after_first_run() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        let target_group = fx.group(tgt, "Snapshot").await;
        let link = fx
            .db
            .links()
            .insert(&NewLink {
                target_course_id: tgt,
                target_group_id: target_group,
                source_course_id: src,
                source_group_id: group,
                status: LinkStatus::Enabled,
                sync_mode: SyncMode::Snapshot,
                ..NewLink::default()
            })
            .await
            .unwrap();
        let reconciler = fx.reconciler();

        let report = reconciler.reconcile(None).await.unwrap();
        assert_eq!(report.frozen, 1);
        assert!(fx.db.links().require(link.id).await.unwrap().is_frozen());

        fx.enrol_member(manual, group, 2, EnrolStatus::Active, 0, 0).await;
        let report = reconciler.reconcile(None).await.unwrap();
        assert_eq!(report.frozen, 0);
        assert_eq!(fx.enrolled(link.id).await, vec![1]);
    }

    #[tokio::test]
    async fn test_members_follow_a_changed_target_group() {
        let fx = Fixture::new().await;
        let (_src, _group, tgt, _manual, link) = mirrored(&fx).await;
        let reconciler = fx.reconciler();
        reconciler.reconcile(Some(tgt)).await.unwrap();

        let new_group = fx.group(tgt, "Renamed").await;
        fx.db.links().set_target_group(link.id, new_group).await.unwrap();
        reconciler.reconcile(Some(tgt)).await.unwrap();

        assert!(fx.members(link.target_group_id).await.is_empty());
        assert_eq!(fx.members(new_group).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_deleted_target_group_is_recreated() {
        let fx = Fixture::new().await;
        let (_src, _group, tgt, _manual, link) = mirrored(&fx).await;
        let reconciler = fx.reconciler();
        reconciler.reconcile(Some(tgt)).await.unwrap();

        fx.db.groups().delete(link.target_group_id).await.unwrap();
        reconciler.reconcile(Some(tgt)).await.unwrap();

        let stored = fx.db.links().require(link.id).await.unwrap();
        assert_ne!(stored.target_group_id, link.target_group_id);
        let group = fx.db.groups().get(stored.target_group_id).await.unwrap().unwrap();
        assert_eq!(group.name, "Team (linked)");
        assert_eq!(fx.members(stored.target_group_id).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_lost_link_unenrol_is_repeatable() {
        let fx = Fixture::with_config(|c| c.sync.lost_link_action = LostLinkAction::Unenrol).await;
        let (_src, group, tgt, _manual, link) = mirrored(&fx).await;
        let reconciler = fx.reconciler();
        reconciler.reconcile(Some(tgt)).await.unwrap();

        fx.db.groups().delete(group).await.unwrap();
        for _ in 0..2 {
            let report = reconciler.reconcile(Some(tgt)).await.unwrap();
            assert_eq!(report.lost_links, vec![link.id]);
            assert_eq!(report.operations(), 0);
            assert!(!report.has_failures());
        }

        assert_eq!(fx.db.links().require(link.id).await.unwrap().status, LinkStatus::Disabled);
        assert!(fx.enrolled(link.id).await.is_empty());
        assert!(fx.members(link.target_group_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_engine_strips_link_roles() {
        let fx = Fixture::with_config(|c| c.enabled = false).await;
        let (_src, _group, tgt, _manual, link) = mirrored(&fx).await;
        fx.db.roles().assign(5, 1, tgt, LINK_COMPONENT, link.id).await.unwrap();
        fx.role(7, 1, tgt).await;

        let status = fx.reconciler().run_reconciliation(None, true).await;

        assert_eq!(status, RunStatus::Disabled);
        assert_eq!(status.code(), 2);
        assert!(fx.link_roles(link.id, 1).await.is_empty());
        assert_eq!(fx.db.roles().roles_in_course(tgt, 1).await.unwrap().len(), 1);
        assert!(fx.enrolled(link.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_run_status_ok() {
        let fx = Fixture::new().await;
        mirrored(&fx).await;
        assert_eq!(fx.reconciler().run_reconciliation(None, false).await, RunStatus::Ok);
    }
}
