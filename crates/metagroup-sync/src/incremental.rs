//! # Incremental Sync
//!
//! Brings one user up to date across every link that reads from one course,
//! then follows the change down the chain.
//!
//! ```text
//! event in course A for user U
//!   │
//!   ▼
//! sync_single(A, U)                       in_flight = {A}
//!   ├── link A→B   create/restore, status, roles for U
//!   │     └── changed? ──► sync_single(B, U)      in_flight = {A, B}
//!   │                        └── link B→A  ──► sync_single(A, U)  refused
//!   └── link A→C   ...
//! ```
//!
//! The guard is a plain value owned by the caller and threaded through the
//! recursion; nothing is stored between events. Member moves between target
//! groups are left to the batch run. Errors propagate to the caller.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use metagroup_core::{Link, ParentWindow};

use crate::error::SyncResult;
use crate::ops::LinkOps;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Courses currently being synchronised on this call stack.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    in_flight: BTreeSet<i64>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a course as in flight. False if it already was.
    pub fn enter(&mut self, course_id: i64) -> bool {
        self.in_flight.insert(course_id)
    }

    pub fn leave(&mut self, course_id: i64) {
        self.in_flight.remove(&course_id);
    }

    pub fn is_in_flight(&self, course_id: i64) -> bool {
        self.in_flight.contains(&course_id)
    }
}

pub struct IncrementalSync {
    ops: LinkOps,
}

impl IncrementalSync {
    pub fn new(ops: LinkOps) -> Self {
        IncrementalSync { ops }
    }

    /// Synchronises one user for every enabled, unfrozen link sourced from
    /// `course_id`, cascading into the target courses that changed. Returns
    /// the number of records changed, cascades included.
    pub async fn sync_single(&self, course_id: i64, user_id: i64, ctx: &mut SyncContext) -> SyncResult<u64> {
        if !self.ops.config().enabled {
            return Ok(0);
        }
        let changes = self.sync_course(course_id, user_id, ctx).await?;
        if changes > 0 {
            info!(course_id, user_id, changes, "Incremental sync applied");
        }
        Ok(changes)
    }

    fn sync_course<'a>(
        &'a self,
        course_id: i64,
        user_id: i64,
        ctx: &'a mut SyncContext,
    ) -> BoxFuture<'a, SyncResult<u64>> {
        Box::pin(async move {
            if !ctx.enter(course_id) {
                debug!(course_id, user_id, "Course already being synchronised, skipping");
                return Ok(0);
            }
            let result = self.sync_links(course_id, user_id, ctx).await;
            ctx.leave(course_id);
            result
        })
    }

    async fn sync_links(&self, course_id: i64, user_id: i64, ctx: &mut SyncContext) -> SyncResult<u64> {
        let links: Vec<Link> = self
            .ops
            .db()
            .links()
            .list_sourced_from_course(course_id)
            .await?
            .into_iter()
            .filter(|link| link.is_enabled() && !link.is_frozen())
            .collect();

        let mut total = 0;
        let mut changed_courses = BTreeSet::new();
        for mut link in links {
            let changes = self.sync_link_user(&mut link, user_id).await?;
            if changes > 0 {
                changed_courses.insert(link.target_course_id);
                total += changes;
            }
        }

        for target_course_id in changed_courses {
            total += self.sync_course(target_course_id, user_id, ctx).await?;
        }
        Ok(total)
    }

    /// One user's worth of create/restore, status and roles for one link.
    async fn sync_link_user(&self, link: &mut Link, user_id: i64) -> SyncResult<u64> {
        let db = self.ops.db();
        let rows = self
            .ops
            .qualifying_rows(link, Some(user_id))
            .await?
            .remove(&user_id)
            .unwrap_or_default();
        let existing = db.enrolments().get(link.id, user_id).await?;

        let window = ParentWindow::aggregate(&rows);
        let qualifies = window.is_some() && self.ops.passes_role_filter(link, user_id).await?;

        let mut changes = 0;
        match (window, &existing) {
            (Some(window), existing) if qualifies => {
                changes += self
                    .ops
                    .create_or_restore(link, user_id, window, existing.as_ref())
                    .await?;
                if let Some(existing) = existing {
                    changes += self.ops.update_status(link, existing, window).await? as u64;
                }
            }
            (_, Some(existing)) => {
                changes += self.ops.apply_unenrol_action(link, existing).await? as u64;
            }
            (_, None) => {}
        }

        if let Some(enrolment) = db.enrolments().get(link.id, user_id).await? {
            let roles = self.ops.sync_roles(link, &enrolment).await?;
            changes += roles.assigned + roles.unassigned;
        }

        if changes > 0 {
            debug!(link_id = link.id, user_id, course_id = link.target_course_id, changes, "User synchronised");
        }
        Ok(changes)
    }
}
