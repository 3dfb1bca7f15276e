//! # Link Manager
//!
//! Administrative operations on links: create, edit, toggle, delete,
//! recalculate, display and housekeeping.
//!
//! ## Creating a Link
//! ```text
//! create_link(target, source, group, options)
//!   │
//!   ├── validate        ids, self-loop, courses exist, groups in their courses
//!   ├── load graph      source-course set of the proposed source
//!   ├── chain check     target must not already feed the source
//!   ├── resolve root    cycle/unresolvable ──► logical source, root_fallback
//!   │
//!   ├── existing link for (target, source, group)? ──► update it
//!   └── otherwise       target group (given or created) + insert
//!                       insert failed ──► created group removed again
//!   │
//!   └── sync_on_create  reconcile the target course
//! ```
//!
//! Structural problems are returned as errors and nothing is written.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use metagroup_core::validation::{check_source_chain, validate_id, validate_link_request};
use metagroup_core::{
    ChainPath, Link, LinkGraph, LinkStatus, NewLink, RootSource, SourceRef, SyncMode, LINK_COMPONENT,
};
use metagroup_db::{LinkFilter, RoleFilter};

use crate::error::{SyncError, SyncResult};
use crate::ops::LinkOps;
use crate::reconcile::Reconciler;

/// Options for [`LinkManager::create_link`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLinkOptions {
    /// Existing group in the target course. A new group is created when unset.
    pub target_group_id: Option<i64>,
    /// Name for a newly created target group.
    pub target_group_name: Option<String>,
    pub status: LinkStatus,
    /// Role assigned with each derived enrolment.
    pub role_id: Option<i64>,
    pub sync_mode: SyncMode,
    /// Reconcile the target course right away.
    pub sync_on_create: bool,
}

impl Default for CreateLinkOptions {
    fn default() -> Self {
        CreateLinkOptions {
            target_group_id: None,
            target_group_name: None,
            status: LinkStatus::Enabled,
            role_id: None,
            sync_mode: SyncMode::Mirror,
            sync_on_create: true,
        }
    }
}

/// How [`LinkManager::create_links`] distributes source groups over target
/// groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOut {
    /// Every source group feeds one shared target group.
    Shared,
    /// Each source group gets its own target group.
    PerSource,
}

/// Changes for [`LinkManager::update_link`]. Unset fields stay as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkUpdate {
    pub source_course_id: Option<i64>,
    pub source_group_id: Option<i64>,
    pub target_group_id: Option<i64>,
    /// `Some(None)` clears the role.
    pub role_id: Option<Option<i64>>,
    pub sync_mode: Option<SyncMode>,
}

/// A group examined by [`LinkManager::cleanup_orphaned_groups`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub group_id: i64,
    pub course_id: i64,
    pub name: String,
    /// Why the group was kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Deleted groups, or the ones that would be deleted on a dry run.
    pub deleted: Vec<GroupEntry>,
    pub skipped: Vec<GroupEntry>,
    pub total_deleted: u64,
}

pub struct LinkManager {
    ops: LinkOps,
    reconciler: Reconciler,
}

impl LinkManager {
    pub fn new(ops: LinkOps) -> Self {
        let reconciler = Reconciler::new(ops.clone());
        LinkManager { ops, reconciler }
    }

    // =========================================================================
    // Create
    // =========================================================================

    pub async fn create_link(
        &self,
        target_course_id: i64,
        source_course_id: i64,
        source_group_id: i64,
        options: CreateLinkOptions,
    ) -> SyncResult<Link> {
        validate_link_request(target_course_id, source_course_id, source_group_id, options.target_group_id)?;
        self.check_references(target_course_id, source_course_id, source_group_id, options.target_group_id)
            .await?;

        let graph = self.ops.load_graph().await?;
        let source_courses = graph.compute_source_courses(source_course_id, Some(source_group_id));
        check_source_chain(target_course_id, &source_courses)?;
        let (root, root_fallback) =
            resolve_or_fallback(&graph, None, target_course_id, source_course_id, source_group_id);

        let link = match self
            .ops
            .db()
            .links()
            .find(target_course_id, source_course_id, source_group_id, None)
            .await?
        {
            Some(mut existing) => {
                debug!(link_id = existing.id, "Link exists, updating instead");
                if let Some(group_id) = options.target_group_id {
                    existing.target_group_id = group_id;
                }
                existing.status = options.status;
                existing.role_id = options.role_id;
                existing.sync_mode = options.sync_mode;
                existing.source_courses = source_courses;
                apply_root(&mut existing, &root, root_fallback);
                self.ops.db().links().update(&existing).await?
            }
            None => {
                let (target_group_id, created) = match options.target_group_id {
                    Some(group_id) => (group_id, false),
                    None => {
                        let group_id = self
                            .ops
                            .create_new_group(
                                target_course_id,
                                Some(source_group_id),
                                options.target_group_name.as_deref(),
                                true,
                            )
                            .await?;
                        (group_id, true)
                    }
                };

                let new = NewLink {
                    target_course_id,
                    target_group_id,
                    source_course_id,
                    source_group_id,
                    source_group_name: graph.group_name(source_group_id).map(str::to_string),
                    root: Some(root),
                    source_courses,
                    status: options.status,
                    sync_mode: options.sync_mode,
                    role_id: options.role_id,
                    root_fallback,
                };
                match self.ops.db().links().insert(&new).await {
                    Ok(link) => link,
                    Err(e) => {
                        if created {
                            self.ops.db().groups().delete(target_group_id).await?;
                            debug!(group_id = target_group_id, "Removed group created for failed link");
                        }
                        return Err(e.into());
                    }
                }
            }
        };

        self.recalculate_dependents(&link).await?;

        let aggregated = graph.aggregated_links(target_course_id, link.target_group_id);
        if aggregated.iter().any(|id| *id != link.id) {
            info!(link_id = link.id, target_group_id = link.target_group_id, ?aggregated, "Target group is fed by several links");
        }

        if options.sync_on_create && link.is_enabled() {
            self.reconciler.reconcile(Some(target_course_id)).await?;
        }
        Ok(link)
    }

    /// Creates one link per source group.
    pub async fn create_links(
        &self,
        target_course_id: i64,
        source_course_id: i64,
        source_group_ids: &[i64],
        fan_out: FanOut,
        options: CreateLinkOptions,
    ) -> SyncResult<Vec<Link>> {
        let Some(first_group) = source_group_ids.first() else {
            return Ok(Vec::new());
        };

        let shared_group = match (fan_out, options.target_group_id) {
            (FanOut::Shared, Some(group_id)) => Some(group_id),
            (FanOut::Shared, None) => {
                validate_link_request(target_course_id, source_course_id, *first_group, None)?;
                Some(
                    self.ops
                        .create_new_group(
                            target_course_id,
                            Some(*first_group),
                            options.target_group_name.as_deref(),
                            true,
                        )
                        .await?,
                )
            }
            (FanOut::PerSource, _) => None,
        };

        let mut links = Vec::with_capacity(source_group_ids.len());
        for group_id in source_group_ids {
            let per_link = CreateLinkOptions {
                target_group_id: shared_group,
                sync_on_create: false,
                ..options.clone()
            };
            links.push(
                self.create_link(target_course_id, source_course_id, *group_id, per_link)
                    .await?,
            );
        }

        if options.sync_on_create && links.iter().any(Link::is_enabled) {
            self.reconciler.reconcile(Some(target_course_id)).await?;
        }
        Ok(links)
    }

    // =========================================================================
    // Edit
    // =========================================================================

    pub async fn update_link(&self, link_id: i64, update: LinkUpdate) -> SyncResult<Link> {
        let mut link = self.require(link_id).await?;
        let source_course_id = update.source_course_id.unwrap_or(link.source_course_id);
        let source_group_id = update.source_group_id.unwrap_or(link.source_group_id);
        let source_changed = source_course_id != link.source_course_id || source_group_id != link.source_group_id;

        validate_link_request(link.target_course_id, source_course_id, source_group_id, update.target_group_id)?;
        if source_changed || update.target_group_id.is_some() {
            self.check_references(link.target_course_id, source_course_id, source_group_id, update.target_group_id)
                .await?;
        }

        if source_changed {
            let graph = self.ops.load_graph().await?;
            let source_courses = graph.compute_source_courses(source_course_id, Some(source_group_id));
            check_source_chain(link.target_course_id, &source_courses)?;
            let (root, root_fallback) = resolve_or_fallback(
                &graph,
                Some(link.id),
                link.target_course_id,
                source_course_id,
                source_group_id,
            );

            link.source_course_id = source_course_id;
            link.source_group_id = source_group_id;
            link.source_group_name = graph.group_name(source_group_id).map(str::to_string);
            link.source_courses = source_courses;
            apply_root(&mut link, &root, root_fallback);
        }
        if let Some(group_id) = update.target_group_id {
            link.target_group_id = group_id;
        }
        if let Some(role_id) = update.role_id {
            link.role_id = role_id;
        }
        if let Some(sync_mode) = update.sync_mode {
            link.sync_mode = sync_mode;
        }

        let link = self.ops.db().links().update(&link).await?;
        info!(link_id, source_changed, "Link updated");

        if source_changed {
            self.recalculate_dependents(&link).await?;
        }
        self.reconciler.reconcile(Some(link.target_course_id)).await?;
        Ok(link)
    }

    /// Toggles the lifecycle status and reconciles the target course.
    pub async fn set_link_status(&self, link_id: i64, status: LinkStatus) -> SyncResult<Link> {
        let link = self.require(link_id).await?;
        if link.status != status {
            self.ops.db().links().set_status(link_id, status).await?;
        }
        self.reconciler.reconcile(Some(link.target_course_id)).await?;
        self.require(link_id).await
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub async fn find_link(
        &self,
        target_course_id: i64,
        source_course_id: i64,
        source_group_id: i64,
    ) -> SyncResult<Option<Link>> {
        Ok(self
            .ops
            .db()
            .links()
            .find(target_course_id, source_course_id, source_group_id, None)
            .await?)
    }

    pub async fn list_links(&self, filter: &LinkFilter) -> SyncResult<Vec<Link>> {
        Ok(self.ops.db().links().list(filter).await?)
    }

    /// Enabled links writing into the same target group.
    pub async fn aggregated_links(&self, course_id: i64, group_id: i64) -> SyncResult<Vec<i64>> {
        let graph = self.ops.load_graph().await?;
        Ok(graph.aggregated_links(course_id, group_id))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    pub async fn delete_link(
        &self,
        target_course_id: i64,
        source_course_id: i64,
        source_group_id: i64,
    ) -> SyncResult<bool> {
        match self.find_link(target_course_id, source_course_id, source_group_id).await? {
            Some(link) => self.delete_link_by_id(link.id).await,
            None => Ok(false),
        }
    }

    /// Unwinds what the link derived, deletes it and refreshes the roots of
    /// links that read from its target group.
    pub async fn delete_link_by_id(&self, link_id: i64) -> SyncResult<bool> {
        let Some(link) = self.ops.db().links().get(link_id).await? else {
            return Ok(false);
        };

        let removed = self.ops.unwind_link(&link).await?;
        let deleted = self.ops.db().links().delete(link.id).await?;
        self.ops.delete_empty_group_as_configured(link.target_group_id).await?;
        self.recalculate_dependents(&link).await?;

        info!(link_id, removed, target_course_id = link.target_course_id, "Link removed");
        Ok(deleted)
    }

    // =========================================================================
    // Recalculation
    // =========================================================================

    pub async fn recalculate_source_courses(&self, link_id: i64) -> SyncResult<Vec<i64>> {
        let link = self.require(link_id).await?;
        let graph = self.ops.load_graph().await?;
        let courses = graph.compute_source_courses(link.source_course_id, Some(link.source_group_id));
        self.ops.db().links().set_source_courses(link_id, &courses).await?;
        info!(link_id, ?courses, "Source courses recalculated");
        Ok(courses)
    }

    pub async fn recalculate_root(&self, link_id: i64) -> SyncResult<Link> {
        let link = self.require(link_id).await?;
        let graph = self.ops.load_graph().await?;
        let (root, root_fallback) = resolve_or_fallback(
            &graph,
            Some(link.id),
            link.target_course_id,
            link.source_course_id,
            link.source_group_id,
        );
        self.ops.db().links().set_root(link_id, &root, root_fallback).await?;
        self.require(link_id).await
    }

    /// Recomputes the roots of every link downstream of `changed`'s target
    /// group, nearest first.
    async fn recalculate_dependents(&self, changed: &Link) -> SyncResult<()> {
        let mut queue = VecDeque::from([(changed.target_course_id, changed.target_group_id)]);
        let mut seen = BTreeSet::from([changed.id]);

        while let Some((course_id, group_id)) = queue.pop_front() {
            for dependent in self.ops.db().links().list_sourced_from_group(group_id).await? {
                if dependent.source_course_id != course_id || !seen.insert(dependent.id) {
                    continue;
                }
                let updated = self.recalculate_root(dependent.id).await?;
                debug!(link_id = updated.id, root_course_id = ?updated.root_course_id, "Dependent root refreshed");
                queue.push_back((updated.target_course_id, updated.target_group_id));
            }
        }
        Ok(())
    }

    /// One path per enrolment method that fed the link's source group.
    pub async fn chain_for_display(&self, link_id: i64) -> SyncResult<Vec<ChainPath>> {
        let link = self.require(link_id).await?;
        let graph = self.ops.load_graph().await?;
        Ok(graph.chain_paths(
            SourceRef::new(link.target_course_id, Some(link.target_group_id)),
            link.logical_source(),
        ))
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// Deletes empty groups that no link writes into. With no course ids
    /// every link target course is scanned.
    pub async fn cleanup_orphaned_groups(&self, course_ids: &[i64], dry_run: bool) -> SyncResult<CleanupReport> {
        let db = self.ops.db();
        let courses = if course_ids.is_empty() {
            db.links().target_courses().await?
        } else {
            course_ids.iter().copied().filter(|id| *id > 0).collect()
        };

        let mut report = CleanupReport::default();
        for course_id in courses {
            for group in db.groups().list_empty(course_id).await? {
                let mut entry = GroupEntry {
                    group_id: group.id,
                    course_id: group.course_id,
                    name: group.name,
                    reason: None,
                };
                if db.links().is_target_group(group.id).await? {
                    entry.reason = Some("link target".to_string());
                    report.skipped.push(entry);
                    continue;
                }
                if dry_run {
                    report.deleted.push(entry);
                    continue;
                }
                match db.groups().delete(group.id).await {
                    Ok(_) => {
                        report.total_deleted += 1;
                        report.deleted.push(entry);
                    }
                    Err(e) => {
                        warn!(group_id = group.id, error = %e, "Failed to delete empty group");
                        entry.reason = Some(e.to_string());
                        report.skipped.push(entry);
                    }
                }
            }
        }
        if dry_run {
            report.total_deleted = report.deleted.len() as u64;
        }

        info!(deleted = report.total_deleted, skipped = report.skipped.len(), dry_run, "Orphaned group cleanup finished");
        Ok(report)
    }

    /// Deletes every link and every role this mechanism granted. Returns the
    /// number of links deleted.
    pub async fn uninstall(&self) -> SyncResult<u64> {
        let db = self.ops.db();
        let mut deleted = 0;
        for link in db.links().list_all().await? {
            self.ops.unwind_link(&link).await?;
            if db.links().delete(link.id).await? {
                deleted += 1;
            }
        }
        let revoked = db
            .roles()
            .unassign_all(&RoleFilter {
                component: Some(LINK_COMPONENT.to_string()),
                ..RoleFilter::default()
            })
            .await?;
        warn!(links = deleted, roles = revoked, "Uninstalled");
        Ok(deleted)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn require(&self, link_id: i64) -> SyncResult<Link> {
        self.ops
            .db()
            .links()
            .get(link_id)
            .await?
            .ok_or(SyncError::LinkNotFound(link_id))
    }

    async fn check_references(
        &self,
        target_course_id: i64,
        source_course_id: i64,
        source_group_id: i64,
        target_group_id: Option<i64>,
    ) -> SyncResult<()> {
        let db = self.ops.db();
        for course_id in [target_course_id, source_course_id] {
            if !db.courses().exists(course_id).await? {
                return Err(SyncError::CourseNotFound(course_id));
            }
        }
        if !db.groups().exists_in_course(source_group_id, source_course_id).await? {
            return Err(SyncError::GroupNotFound {
                group_id: source_group_id,
                course_id: source_course_id,
            });
        }
        if let Some(group_id) = target_group_id {
            validate_id("target_group_id", group_id)?;
            if !db.groups().exists_in_course(group_id, target_course_id).await? {
                return Err(SyncError::GroupNotFound {
                    group_id,
                    course_id: target_course_id,
                });
            }
        }
        Ok(())
    }
}

/// Resolves the root of a source. On a cycle or an unresolvable chain the
/// logical source is used and flagged.
fn resolve_or_fallback(
    graph: &LinkGraph,
    link_id: Option<i64>,
    target_course_id: i64,
    source_course_id: i64,
    source_group_id: i64,
) -> (RootSource, bool) {
    match graph.resolve_link_root(target_course_id, source_course_id, Some(source_group_id)) {
        Ok(root) => (root, false),
        Err(e) => {
            warn!(?link_id, source_course_id, source_group_id, error = %e, "Root resolution degraded, using logical source");
            let root = RootSource {
                course_id: source_course_id,
                group_id: Some(source_group_id),
                course_name: graph.course_name(source_course_id).unwrap_or_default().to_string(),
                group_name: graph.group_name(source_group_id).map(str::to_string),
            };
            (root, true)
        }
    }
}

fn apply_root(link: &mut Link, root: &RootSource, root_fallback: bool) {
    link.root_course_id = Some(root.course_id);
    link.root_group_id = root.group_id;
    link.root_course_name = Some(root.course_name.clone());
    link.root_group_name = root.group_name.clone();
    link.root_fallback = root_fallback;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use metagroup_core::{CoreError, EnrolStatus};

    #[tokio::test]
    async fn test_self_loop_rejected() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;

        let err = fx
            .manager()
            .create_link(src, src, group, CreateLinkOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Structural(CoreError::SelfReferentialLink { .. })));
        assert!(fx.db.links().list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_group_must_belong_to_source_course() {
        let fx = Fixture::new().await;
        let src = fx.course("SRC").await;
        let (tgt, foreign_group) = fx.source_course("TGT", "Elsewhere").await;

        let err = fx
            .manager()
            .create_link(tgt, src, foreign_group, CreateLinkOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::GroupNotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_syncs_and_resolves_root() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let mid = fx.course("MID").await;
        let end = fx.course("END").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        let manager = fx.manager();

        let first = manager
            .create_link(mid, src, group, CreateLinkOptions::default())
            .await
            .unwrap();
        assert_eq!(first.root_course_id, Some(src));
        assert!(!first.root_fallback);
        assert!(!first.is_chained());
        assert_eq!(fx.members(first.target_group_id).await, vec![1]);

        let second = manager
            .create_link(end, mid, first.target_group_id, CreateLinkOptions::default())
            .await
            .unwrap();
        assert_eq!(second.root_course_id, Some(src));
        assert_eq!(second.root_group_id, Some(group));
        assert!(second.is_chained());
        assert_eq!(second.source_courses, vec![src, mid]);
        assert_eq!(fx.enrolled(second.id).await, vec![1]);

        // Closing the loop is refused.
        let err = manager
            .create_link(src, end, second.target_group_id, CreateLinkOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Structural(CoreError::TargetInSourceChain { .. })));
    }

    #[tokio::test]
    async fn test_link_closing_a_cycle_falls_back_to_its_source() {
        let fx = Fixture::new().await;
        let (a, group_a) = fx.source_course("A", "Team").await;
        let b = fx.course("B").await;
        let c = fx.course("C").await;
        let manager = fx.manager();

        // Empty groups hide the loop from the source-course check.
        let ab = manager.create_link(b, a, group_a, CreateLinkOptions::default()).await.unwrap();
        let bc = manager
            .create_link(c, b, ab.target_group_id, CreateLinkOptions::default())
            .await
            .unwrap();
        let ca = manager
            .create_link(a, c, bc.target_group_id, CreateLinkOptions::default())
            .await
            .unwrap();

        assert_eq!(bc.root_course_id, Some(a));
        assert!(!bc.root_fallback);
        assert_eq!(ca.root_course_id, Some(c));
        assert_eq!(ca.root_group_id, Some(bc.target_group_id));
        assert!(ca.root_fallback);
        assert!(!ca.is_chained());

        let manual = fx.manual(a).await;
        fx.enrol_member(manual, group_a, 7, EnrolStatus::Active, 0, 0).await;
        let report = fx.reconciler().reconcile(None).await.unwrap();
        assert!(!report.has_failures());

        assert_eq!(fx.enrolled(ab.id).await, vec![7]);
        assert_eq!(fx.enrolled(bc.id).await, vec![7]);
        assert!(fx.enrolled(ca.id).await.is_empty());
        assert!(fx.members(ca.target_group_id).await.is_empty());

        assert_eq!(fx.reconciler().reconcile(None).await.unwrap().operations(), 0);
    }

    #[tokio::test]
    async fn test_existing_link_is_updated_not_duplicated() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manager = fx.manager();

        let first = manager
            .create_link(tgt, src, group, CreateLinkOptions::default())
            .await
            .unwrap();
        let again = manager
            .create_link(
                tgt,
                src,
                group,
                CreateLinkOptions {
                    role_id: Some(5),
                    ..CreateLinkOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(again.id, first.id);
        assert_eq!(again.role_id, Some(5));
        assert_eq!(fx.db.links().list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_shared_and_per_source() {
        let fx = Fixture::new().await;
        let (src, team_a) = fx.source_course("SRC", "Team A").await;
        let team_b = fx.group(src, "Team B").await;
        let shared_tgt = fx.course("SHARED").await;
        let split_tgt = fx.course("SPLIT").await;
        let manager = fx.manager();

        let shared = manager
            .create_links(shared_tgt, src, &[team_a, team_b], FanOut::Shared, CreateLinkOptions::default())
            .await
            .unwrap();
        assert_eq!(shared.len(), 2);
        assert_eq!(shared[0].target_group_id, shared[1].target_group_id);
        assert_eq!(
            manager.aggregated_links(shared_tgt, shared[0].target_group_id).await.unwrap(),
            vec![shared[0].id, shared[1].id]
        );

        let split = manager
            .create_links(split_tgt, src, &[team_a, team_b], FanOut::PerSource, CreateLinkOptions::default())
            .await
            .unwrap();
        assert_ne!(split[0].target_group_id, split[1].target_group_id);
    }

    #[tokio::test]
    async fn test_delete_unwinds_only_that_link() {
        let fx = Fixture::with_config(|c| c.groups.delete_empty_groups = true).await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        fx.role(5, 1, src).await;
        let tgt_manual = fx.manual(tgt).await;
        fx.enrol(tgt_manual, 1, EnrolStatus::Active, 0, 0).await;
        fx.role(7, 1, tgt).await;
        let manager = fx.manager();

        let link = manager
            .create_link(tgt, src, group, CreateLinkOptions::default())
            .await
            .unwrap();
        assert_eq!(fx.link_roles(link.id, 1).await, vec![5]);

        assert!(manager.delete_link(tgt, src, group).await.unwrap());
        assert!(!manager.delete_link(tgt, src, group).await.unwrap());

        assert!(fx.db.links().get(link.id).await.unwrap().is_none());
        assert!(fx.db.groups().get(link.target_group_id).await.unwrap().is_none());
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
    async fn test_deleting_middle_link_refreshes_downstream_root() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let mid = fx.course("MID").await;
        let end = fx.course("END").await;
        let manager = fx.manager();

        let first = manager
            .create_link(mid, src, group, CreateLinkOptions::default())
            .await
            .unwrap();
        let second = manager
            .create_link(end, mid, first.target_group_id, CreateLinkOptions::default())
            .await
            .unwrap();
        assert_eq!(second.root_course_id, Some(src));

        manager.delete_link_by_id(first.id).await.unwrap();
        let second = fx.db.links().require(second.id).await.unwrap();
        assert_eq!(second.root_course_id, Some(mid));
        assert!(!second.is_chained());
    }

    #[tokio::test]
    async fn test_status_toggle_strips_roles() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        fx.role(5, 1, src).await;
        let manager = fx.manager();
        let link = manager
            .create_link(tgt, src, group, CreateLinkOptions::default())
            .await
            .unwrap();

        let disabled = manager.set_link_status(link.id, LinkStatus::Disabled).await.unwrap();
        assert_eq!(disabled.status, LinkStatus::Disabled);
        assert!(fx.link_roles(link.id, 1).await.is_empty());

        manager.set_link_status(link.id, LinkStatus::Enabled).await.unwrap();
        assert_eq!(fx.link_roles(link.id, 1).await, vec![5]);
    }

    #[tokio::test]
    async fn test_cleanup_orphaned_groups() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let link = fx.link(tgt, src, group).await;
        let orphan = fx.group(tgt, "Leftover").await;
        let manager = fx.manager();

        let dry = manager.cleanup_orphaned_groups(&[], true).await.unwrap();
        assert_eq!(dry.total_deleted, 1);
        assert_eq!(dry.deleted[0].group_id, orphan);
        assert_eq!(dry.skipped[0].group_id, link.target_group_id);
        assert!(fx.db.groups().get(orphan).await.unwrap().is_some());

        let real = manager.cleanup_orphaned_groups(&[tgt], false).await.unwrap();
        assert_eq!(real.total_deleted, 1);
        assert!(fx.db.groups().get(orphan).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_display_runs_from_root() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let mid = fx.course("MID").await;
        let end = fx.course("END").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        let manager = fx.manager();
        let first = manager
            .create_link(mid, src, group, CreateLinkOptions::default())
            .await
            .unwrap();
        let second = manager
            .create_link(end, mid, first.target_group_id, CreateLinkOptions::default())
            .await
            .unwrap();

        let paths = manager.chain_for_display(second.id).await.unwrap();
        assert_eq!(paths.len(), 1);
        let courses: Vec<i64> = paths[0].iter().map(|step| step.course_id).collect();
        assert_eq!(courses, vec![src, mid, end]);
    }

    #[tokio::test]
    async fn test_uninstall_removes_links_and_roles() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        fx.role(5, 1, src).await;
        let manager = fx.manager();
        manager
            .create_link(tgt, src, group, CreateLinkOptions::default())
            .await
            .unwrap();

        assert_eq!(manager.uninstall().await.unwrap(), 1);
        assert!(fx.db.links().list_all().await.unwrap().is_empty());
        assert!(fx.db.roles().roles_in_course(tgt, 1).await.unwrap().is_empty());
    }
}
