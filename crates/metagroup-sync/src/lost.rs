//! # Lost-Link Handler
//!
//! A link is lost when its source course or source group has been deleted.
//! Loss is a state, not an error: the configured disposition is applied and
//! the batch run skips the link for the rest of its passes.
//!
//! ```text
//! ┌──────────┬───────────────────────────────────────────────────────────┐
//! │ keep     │ nothing changes                                           │
//! │ suspend  │ every derived enrolment suspended, link roles revoked     │
//! │ unenrol  │ link disabled, every derived member fully unenrolled      │
//! │          │ (destructive: purges the user's course data)              │
//! └──────────┴───────────────────────────────────────────────────────────┘
//! ```
//! Every disposition is idempotent.

use tracing::{info, warn};

use metagroup_core::{Link, LinkStatus, LostLinkAction, LINK_COMPONENT};
use metagroup_db::RoleFilter;

use crate::error::SyncResult;
use crate::ops::LinkOps;

pub struct LostLinkHandler {
    ops: LinkOps,
}

impl LostLinkHandler {
    pub fn new(ops: LinkOps) -> Self {
        LostLinkHandler { ops }
    }

    /// Links in scope whose source is gone.
    pub async fn find_lost_links(&self, course_id: Option<i64>) -> SyncResult<Vec<Link>> {
        Ok(self.ops.db().links().list_lost(course_id).await?)
    }

    /// Applies the disposition to every lost link in scope and returns their
    /// ids.
    pub async fn process(&self, course_id: Option<i64>) -> SyncResult<Vec<i64>> {
        let lost = self.find_lost_links(course_id).await?;
        let mut handled = Vec::with_capacity(lost.len());
        for link in &lost {
            self.deal_with_lost_link(link).await?;
            handled.push(link.id);
        }
        if !handled.is_empty() {
            info!(count = handled.len(), action = %self.ops.config().lost_link_action(), "Lost links handled");
        }
        Ok(handled)
    }

    /// Applies the configured disposition to one link.
    pub async fn deal_with_lost_link(&self, link: &Link) -> SyncResult<()> {
        let db = self.ops.db();
        match self.ops.config().lost_link_action() {
            LostLinkAction::Keep => {}
            LostLinkAction::Suspend => {
                let suspended = db.enrolments().suspend_all(link.id).await?;
                let revoked = db
                    .roles()
                    .unassign_all(&RoleFilter::origin(LINK_COMPONENT, link.id))
                    .await?;
                if suspended > 0 || revoked > 0 {
                    info!(link_id = link.id, suspended, revoked, "Lost link suspended");
                }
            }
            LostLinkAction::Unenrol => {
                if link.status != LinkStatus::Disabled {
                    db.links().set_status(link.id, LinkStatus::Disabled).await?;
                }

                if !link.has_valid_target_group() {
                    warn!(link_id = link.id, target_group_id = link.target_group_id, "Lost link has no valid target group");
                } else if !db
                    .groups()
                    .exists_in_course(link.target_group_id, link.target_course_id)
                    .await?
                {
                    warn!(link_id = link.id, target_group_id = link.target_group_id, "Target group of lost link is gone");
                }

                let mut unenrolled = 0;
                for enrolment in db.enrolments().list_for_instance(link.id).await? {
                    self.ops.release_membership(link, enrolment.user_id).await?;
                    if db.enrolments().unenrol(link.id, enrolment.user_id).await? {
                        unenrolled += 1;
                    }
                }
                if unenrolled > 0 {
                    warn!(link_id = link.id, unenrolled, "Lost link members fully unenrolled");
                }
                self.ops.delete_empty_group_as_configured(link.target_group_id).await?;
            }
        }
        Ok(())
    }
}
