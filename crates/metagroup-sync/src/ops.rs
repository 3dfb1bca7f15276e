//! # Link Operations
//!
//! The per-link, per-user primitives shared by the batch reconciler, the
//! incremental handler, the lost-link handler and the link manager. Every
//! primitive is a self-contained read-then-write that reports whether it
//! changed anything, so callers can count operations and reruns stay no-ops.
//!
//! ## Qualifying Rows
//! ```text
//! link: target (T, tg) ◄── logical (L, lg) ◄── ... ◄── root (R, rg)
//!
//!   rows = enrolments in R of members of rg
//!        ∪ enrolments in L of MANUAL members of lg     (chained links only)
//!   minus enrolments made by links whose logical source is T
//!   minus methods that are not enabled
//!
//!   window = ParentWindow::aggregate(rows of one user)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use metagroup_core::graph::{LinkEdge, LinkGraph, MemberOrigin, OriginKind};
use metagroup_core::naming::{base_group_name, candidate_name};
use metagroup_core::validation::validate_group_name;
use metagroup_core::{
    holds_roles, EnrolStatus, Link, ParentWindow, SourceEnrolment, UnenrolAction,
    UserEnrolment, LINK_COMPONENT, LINK_METHOD, META_METHOD,
};
use metagroup_db::{Database, RoleFilter, SourceQuery};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Qualifying source enrolments, grouped by user.
pub type QualifyingRows = BTreeMap<i64, Vec<SourceEnrolment>>;

/// Role changes made for one derived enrolment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleChanges {
    pub assigned: u64,
    pub unassigned: u64,
}

/// Shared engine primitives over the store.
#[derive(Clone)]
pub struct LinkOps {
    db: Arc<Database>,
    config: Arc<SyncConfig>,
}

impl LinkOps {
    pub fn new(db: Arc<Database>, config: Arc<SyncConfig>) -> Self {
        LinkOps { db, config }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // Reading the Source
    // =========================================================================

    /// Source enrolments that qualify a user for the link, grouped by user.
    /// With `user_id` set only that user's rows are read.
    pub async fn qualifying_rows(&self, link: &Link, user_id: Option<i64>) -> SyncResult<QualifyingRows> {
        let effective = link.effective_source();
        let mut rows = self
            .db
            .enrolments()
            .source_enrolments(SourceQuery {
                course_id: effective.course_id,
                group_id: effective.group_id.unwrap_or(link.source_group_id),
                exclude_fed_from: link.target_course_id,
                manual_members_only: false,
                user_id,
            })
            .await?;

        if link.is_chained() {
            let manual = self
                .db
                .enrolments()
                .source_enrolments(SourceQuery {
                    course_id: link.source_course_id,
                    group_id: link.source_group_id,
                    exclude_fed_from: link.target_course_id,
                    manual_members_only: true,
                    user_id,
                })
                .await?;
            rows.extend(manual);
        }

        let mut by_user = QualifyingRows::new();
        for row in rows {
            if !self.config.is_method_enabled(&row.method) {
                continue;
            }
            let entry = by_user.entry(row.user_id).or_default();
            if entry.iter().any(|r| r.instance_id == row.instance_id) {
                continue;
            }
            entry.push(row);
        }
        Ok(by_user)
    }

    /// Synchronised roles the user holds in the source context: the
    /// effective source course, plus the logical course of a chained link.
    pub async fn parent_roles(&self, link: &Link, user_id: i64) -> SyncResult<BTreeSet<i64>> {
        let mut courses = vec![link.effective_source().course_id];
        if link.is_chained() && !courses.contains(&link.source_course_id) {
            courses.push(link.source_course_id);
        }

        let mut roles = BTreeSet::new();
        for course_id in courses {
            for assignment in self.db.roles().roles_in_course(course_id, user_id).await? {
                if self.config.is_role_component_synced(&assignment.component)
                    && self.config.is_role_synced(assignment.role_id)
                {
                    roles.insert(assignment.role_id);
                }
            }
        }
        Ok(roles)
    }

    /// Role filter: with `sync_all` off, users without a synchronised role in
    /// the source are not supposed to be in the target.
    pub async fn passes_role_filter(&self, link: &Link, user_id: i64) -> SyncResult<bool> {
        if self.config.sync.sync_all {
            return Ok(true);
        }
        Ok(!self.parent_roles(link, user_id).await?.is_empty())
    }

    // =========================================================================
    // Enrolments and Memberships
    // =========================================================================

    /// Creates whichever of enrolment and target-group membership is missing.
    /// Returns the number of records created.
    pub async fn create_or_restore(
        &self,
        link: &mut Link,
        user_id: i64,
        window: ParentWindow,
        existing: Option<&UserEnrolment>,
    ) -> SyncResult<u64> {
        let mut created = 0;

        if existing.is_none() {
            self.db
                .enrolments()
                .enrol(
                    link.id,
                    user_id,
                    link.role_id,
                    window.time_start,
                    window.time_end,
                    window.status,
                )
                .await?;
            debug!(link_id = link.id, user_id, course_id = link.target_course_id, "Enrolled");
            created += 1;
        }

        if let Some(group_id) = self.ensure_target_group(link).await? {
            if self
                .db
                .groups()
                .add_member(group_id, user_id, LINK_COMPONENT, link.id)
                .await?
            {
                debug!(link_id = link.id, user_id, group_id, "Added to target group");
                created += 1;
            }
        }

        Ok(created)
    }

    /// Brings a derived enrolment in line with its aggregated window.
    pub async fn update_status(&self, link: &Link, enrolment: &UserEnrolment, window: ParentWindow) -> SyncResult<bool> {
        if !window.differs_from(enrolment) {
            return Ok(false);
        }
        self.db
            .enrolments()
            .update_enrol(
                link.id,
                enrolment.user_id,
                window.status,
                Some(window.time_start),
                Some(window.time_end),
            )
            .await?;
        debug!(
            link_id = link.id,
            user_id = enrolment.user_id,
            status = ?window.status,
            time_start = window.time_start,
            time_end = window.time_end,
            "Enrolment status updated"
        );
        Ok(true)
    }

    /// Applies the configured unenrol action to a derived enrolment whose
    /// user no longer qualifies. Returns whether anything changed.
    pub async fn apply_unenrol_action(&self, link: &Link, enrolment: &UserEnrolment) -> SyncResult<bool> {
        let user_id = enrolment.user_id;
        match self.config.unenrol_action() {
            UnenrolAction::Unenrol => {
                self.release_membership(link, user_id).await?;
                let removed = self.db.enrolments().unenrol(link.id, user_id).await?;
                if removed {
                    debug!(link_id = link.id, user_id, course_id = link.target_course_id, "Unenrolled");
                }
                Ok(removed)
            }
            UnenrolAction::Suspend => {
                if enrolment.status == EnrolStatus::Suspended {
                    return Ok(false);
                }
                self.suspend(link, user_id).await?;
                Ok(true)
            }
            UnenrolAction::SuspendNoRoles => {
                let mut changed = false;
                if enrolment.status != EnrolStatus::Suspended {
                    self.suspend(link, user_id).await?;
                    changed = true;
                }
                let stripped = self.strip_roles(link, user_id).await?;
                Ok(changed || stripped > 0)
            }
        }
    }

    async fn suspend(&self, link: &Link, user_id: i64) -> SyncResult<()> {
        self.db
            .enrolments()
            .update_enrol(link.id, user_id, EnrolStatus::Suspended, None, None)
            .await?;
        debug!(link_id = link.id, user_id, "Enrolment suspended");
        Ok(())
    }

    /// Hands a membership this link created over to another enabled link
    /// writing into the same group that still enrols the user, so removing
    /// this link's enrolment does not drop a member the group should keep.
    pub async fn release_membership(&self, link: &Link, user_id: i64) -> SyncResult<bool> {
        if !link.has_valid_target_group() {
            return Ok(false);
        }
        let groups = self.db.groups();
        let Some(membership) = groups.membership(link.target_group_id, user_id).await? else {
            return Ok(false);
        };
        if membership.component != LINK_COMPONENT || membership.item_id != link.id {
            return Ok(false);
        }

        let siblings = self
            .db
            .links()
            .list_targeting(link.target_course_id, link.target_group_id)
            .await?;
        for sibling in siblings.iter().filter(|l| l.id != link.id && l.is_enabled()) {
            if self.db.enrolments().get(sibling.id, user_id).await?.is_some() {
                groups
                    .reassign_member(link.target_group_id, user_id, LINK_COMPONENT, sibling.id)
                    .await?;
                debug!(
                    link_id = link.id,
                    user_id,
                    group_id = link.target_group_id,
                    new_link_id = sibling.id,
                    "Membership handed over"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Moves a member out of an old target group into the link's current one.
    pub async fn move_member(&self, link: &Link, user_id: i64, old_group_id: i64) -> SyncResult<bool> {
        let groups = self.db.groups();
        let added = groups
            .add_member(link.target_group_id, user_id, LINK_COMPONENT, link.id)
            .await?;
        let mut removed = false;
        if groups.exists_in_course(old_group_id, link.target_course_id).await? {
            removed = groups.remove_member(old_group_id, user_id).await?;
            self.delete_empty_group_as_configured(old_group_id).await?;
        } else {
            debug!(link_id = link.id, user_id, old_group_id, "Old group is gone, nothing to remove");
        }
        debug!(link_id = link.id, user_id, old_group_id, new_group_id = link.target_group_id, "Member moved");
        Ok(added || removed)
    }

    // =========================================================================
    // Roles
    // =========================================================================

    /// Assigns missing roles and, unless roles are kept, removes surplus ones.
    /// Expected roles are the synchronised parent roles plus the link's own
    /// enrolment role. Only assignments tagged with this link are touched.
    pub async fn sync_roles(&self, link: &Link, enrolment: &UserEnrolment) -> SyncResult<RoleChanges> {
        let user_id = enrolment.user_id;
        let mut expected = BTreeSet::new();
        if holds_roles(enrolment.status, link.is_enabled()) {
            expected = self.parent_roles(link, user_id).await?;
            expected.extend(link.role_id);
        }

        let roles = self.db.roles();
        let current: BTreeSet<i64> = roles
            .list(&RoleFilter::origin(LINK_COMPONENT, link.id).user(user_id).course(link.target_course_id))
            .await?
            .into_iter()
            .map(|ra| ra.role_id)
            .collect();

        let mut changes = RoleChanges::default();
        for role_id in expected.difference(&current) {
            if roles
                .assign(*role_id, user_id, link.target_course_id, LINK_COMPONENT, link.id)
                .await?
            {
                changes.assigned += 1;
            }
        }

        if !self.config.unenrol_action().keeps_roles() {
            for role_id in current.difference(&expected) {
                if roles
                    .unassign(*role_id, user_id, link.target_course_id, LINK_COMPONENT, link.id)
                    .await?
                {
                    changes.unassigned += 1;
                }
            }
        }

        if changes != RoleChanges::default() {
            debug!(link_id = link.id, user_id, assigned = changes.assigned, unassigned = changes.unassigned, "Roles synced");
        }
        Ok(changes)
    }

    /// Removes every role this link granted to one user.
    pub async fn strip_roles(&self, link: &Link, user_id: i64) -> SyncResult<u64> {
        let removed = self
            .db
            .roles()
            .unassign_all(&RoleFilter::origin(LINK_COMPONENT, link.id).user(user_id))
            .await?;
        Ok(removed)
    }

    // =========================================================================
    // Target Groups
    // =========================================================================

    /// Returns the link's target group, recreating it if it was deleted.
    /// `None` when the link does not carry a real group id.
    pub async fn ensure_target_group(&self, link: &mut Link) -> SyncResult<Option<i64>> {
        if !link.has_valid_target_group() {
            return Ok(None);
        }
        if self
            .db
            .groups()
            .exists_in_course(link.target_group_id, link.target_course_id)
            .await?
        {
            return Ok(Some(link.target_group_id));
        }

        let group_id = self
            .create_new_group(link.target_course_id, Some(link.source_group_id), None, false)
            .await?;
        if group_id != link.target_group_id {
            self.db.links().set_target_group(link.id, group_id).await?;
            info!(link_id = link.id, old_group_id = link.target_group_id, group_id, "Target group recreated");
            link.target_group_id = group_id;
        }
        Ok(Some(group_id))
    }

    /// Creates a group in `course_id` named after `linked_group_id` (or
    /// `explicit_name`). On a name clash a counter is appended, unless
    /// `always_new` is false, in which case the existing group is returned.
    pub async fn create_new_group(
        &self,
        course_id: i64,
        linked_group_id: Option<i64>,
        explicit_name: Option<&str>,
        always_new: bool,
    ) -> SyncResult<i64> {
        let base = match explicit_name {
            Some(name) => base_group_name(&validate_group_name(name)?, false),
            None => {
                let linked = linked_group_id.ok_or_else(|| {
                    SyncError::Internal("A linked group or an explicit name is required".into())
                })?;
                let group = self.db.groups().get(linked).await?.ok_or(SyncError::GroupNotFound {
                    group_id: linked,
                    course_id,
                })?;
                base_group_name(&group.name, self.config.groups.add_group_suffix)
            }
        };

        let groups = self.db.groups();
        let mut attempt = 1;
        loop {
            let name = candidate_name(&base, attempt);
            match groups.find_by_name(course_id, &name).await? {
                Some(existing) if !always_new => return Ok(existing.id),
                Some(_) => attempt += 1,
                None => {
                    let group_id = groups.create(course_id, &name).await?;
                    info!(course_id, group_id, name = %name, "Target group created");
                    return Ok(group_id);
                }
            }
        }
    }

    /// Deletes a group when deletion of empty groups is configured, it has
    /// no members and no link writes into it.
    pub async fn delete_empty_group_as_configured(&self, group_id: i64) -> SyncResult<bool> {
        if group_id <= 0 || !self.config.groups.delete_empty_groups {
            return Ok(false);
        }
        let groups = self.db.groups();
        if groups.get(group_id).await?.is_none() {
            debug!(group_id, "Group already gone");
            return Ok(false);
        }
        if groups.count_members(group_id).await? > 0 || self.db.links().is_target_group(group_id).await? {
            return Ok(false);
        }
        let deleted = groups.delete(group_id).await?;
        if deleted {
            info!(group_id, "Empty group deleted");
        }
        Ok(deleted)
    }

    // =========================================================================
    // Unwinding
    // =========================================================================

    /// Removes everything one link derived: enrolments, the memberships it
    /// tagged and its roles. Other links and manual records are untouched.
    pub async fn unwind_link(&self, link: &Link) -> SyncResult<u64> {
        let mut removed = 0;
        for enrolment in self.db.enrolments().list_for_instance(link.id).await? {
            self.release_membership(link, enrolment.user_id).await?;
            if self.db.enrolments().unenrol(link.id, enrolment.user_id).await? {
                removed += 1;
            }
        }

        for member in self.db.groups().members_by_origin(LINK_COMPONENT, link.id).await? {
            self.db.groups().remove_member(member.group_id, member.user_id).await?;
        }
        self.db
            .roles()
            .unassign_all(&RoleFilter::origin(LINK_COMPONENT, link.id))
            .await?;

        debug!(link_id = link.id, removed, "Link unwound");
        Ok(removed)
    }

    // =========================================================================
    // Graph
    // =========================================================================

    /// Loads the link graph: every course, group, link and the member
    /// origins of enabled enrolment methods.
    pub async fn load_graph(&self) -> SyncResult<LinkGraph> {
        let mut graph = LinkGraph::new();
        for course in self.db.courses().list().await? {
            graph.add_course(course.id, course.display_name());
        }
        for group in self.db.groups().list().await? {
            graph.add_group(group.id, group.name);
        }
        for link in self.db.links().list_all().await? {
            graph.add_link(LinkEdge::from(&link));
        }
        for origin in self.db.enrolments().group_origins().await? {
            if !self.config.is_method_enabled(&origin.method) {
                continue;
            }
            let kind = match origin.method.as_str() {
                LINK_METHOD => match origin.link_parent {
                    Some(parent) => OriginKind::Link { parent },
                    None => OriginKind::Other,
                },
                META_METHOD => OriginKind::Meta {
                    parent_course_id: origin.parent_course_id,
                },
                _ => OriginKind::Other,
            };
            graph.add_origin(
                origin.course_id,
                origin.group_id,
                MemberOrigin {
                    instance_id: origin.instance_id,
                    kind,
                },
            );
        }
        Ok(graph)
    }
}

/// Warns once about a link whose target group id is not a real group.
pub(crate) fn warn_invalid_target_group(link: &Link) {
    warn!(
        link_id = link.id,
        course_id = link.target_course_id,
        target_group_id = link.target_group_id,
        "Link has no valid target group, membership changes skipped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use metagroup_core::{InstanceStatus, UnenrolAction};

    #[tokio::test]
    async fn test_qualifying_rows_filter_methods_and_group() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        let disabled_method = fx.instance(src, "guest").await;

        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        fx.enrol(disabled_method, 1, EnrolStatus::Active, 0, 0).await;
        // Enrolled but not a group member.
        fx.enrol(manual, 2, EnrolStatus::Active, 0, 0).await;

        let link = fx.link(tgt, src, group).await;
        let rows = fx.ops().qualifying_rows(&link, None).await.unwrap();
        assert_eq!(rows.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(rows[&1].len(), 1);
        assert_eq!(rows[&1][0].method, "manual");
    }

    #[tokio::test]
    async fn test_parent_roles_skip_no_sync_and_foreign_components() {
        let fx = Fixture::with_config(|c| c.sync.no_sync_role_ids = vec![9]).await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let link = fx.link(tgt, src, group).await;

        fx.db.roles().assign(5, 1, src, "", 0).await.unwrap();
        fx.db.roles().assign(9, 1, src, "", 0).await.unwrap();
        fx.db.roles().assign(7, 1, src, "enrol_guest", 3).await.unwrap();

        let roles = fx.ops().parent_roles(&link, 1).await.unwrap();
        assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec![5]);
    }

    #[tokio::test]
    async fn test_create_new_group_names() {
        let fx = Fixture::new().await;
        let (_src, group) = fx.source_course("SRC", "Team A (3)").await;
        let tgt = fx.course("TGT").await;
        let ops = fx.ops();

        let first = ops.create_new_group(tgt, Some(group), None, true).await.unwrap();
        let second = ops.create_new_group(tgt, Some(group), None, true).await.unwrap();
        let reused = ops.create_new_group(tgt, Some(group), None, false).await.unwrap();
        let named = ops.create_new_group(tgt, None, Some("  Custom "), true).await.unwrap();

        let groups = fx.db.groups();
        assert_eq!(groups.get(first).await.unwrap().unwrap().name, "Team A (linked)");
        assert_eq!(groups.get(second).await.unwrap().unwrap().name, "Team A (linked) (2)");
        assert_eq!(reused, first);
        assert_eq!(groups.get(named).await.unwrap().unwrap().name, "Custom");
    }

    #[tokio::test]
    async fn test_graph_ignores_members_of_disabled_methods() {
        for (methods, expected) in [(&["manual", "meta"][..], 2), (&["manual"][..], 1)] {
            let enabled: Vec<String> = methods.iter().map(|m| m.to_string()).collect();
            let fx = Fixture::with_config(move |c| c.sync.enabled_methods = enabled).await;
            let parent = fx.course("PARENT").await;
            let (course, group) = fx.source_course("CHILD", "Team").await;
            let meta = fx
                .db
                .enrolments()
                .add_instance(course, META_METHOD, InstanceStatus::Enabled, Some(parent))
                .await
                .unwrap();
            fx.enrol_member(meta, group, 1, EnrolStatus::Active, 0, 0).await;

            let graph = fx.ops().load_graph().await.unwrap();
            let courses = graph.compute_source_courses(course, Some(group));
            assert_eq!(courses.len(), expected, "methods {:?}", methods);
            assert_eq!(courses.last(), Some(&course));
        }
    }

    #[tokio::test]
    async fn test_delete_empty_group_respects_config_and_targets() {
        let fx = Fixture::with_config(|c| c.groups.delete_empty_groups = true).await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let link = fx.link(tgt, src, group).await;
        let spare = fx.db.groups().create(tgt, "Spare").await.unwrap();
        let ops = fx.ops();

        // Still a link target.
        assert!(!ops.delete_empty_group_as_configured(link.target_group_id).await.unwrap());
        assert!(ops.delete_empty_group_as_configured(spare).await.unwrap());
        assert!(!ops.delete_empty_group_as_configured(spare).await.unwrap());
        assert!(!ops.delete_empty_group_as_configured(0).await.unwrap());
    }

    #[tokio::test]
    async fn test_suspend_no_roles_is_idempotent() {
        let fx = Fixture::with_config(|c| c.sync.unenrol_action = UnenrolAction::SuspendNoRoles).await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let link = fx.link(tgt, src, group).await;

        fx.db.enrolments().enrol(link.id, 1, None, 0, 0, EnrolStatus::Active).await.unwrap();
        fx.db.roles().assign(5, 1, tgt, LINK_COMPONENT, link.id).await.unwrap();
        fx.db.roles().assign(5, 1, tgt, "", 0).await.unwrap();

        let ops = fx.ops();
        let ue = fx.db.enrolments().get(link.id, 1).await.unwrap().unwrap();
        assert!(ops.apply_unenrol_action(&link, &ue).await.unwrap());

        let ue = fx.db.enrolments().get(link.id, 1).await.unwrap().unwrap();
        assert_eq!(ue.status, EnrolStatus::Suspended);
        assert!(!ops.apply_unenrol_action(&link, &ue).await.unwrap());

        // The manual assignment survives.
        let left = fx.db.roles().roles_in_course(tgt, 1).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].component, "");
    }
}
