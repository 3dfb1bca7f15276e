//! # Host Events
//!
//! Maps host notifications onto the engine.
//!
//! ```text
//! ┌──────────────────────────────────┬──────────────────────────────────────┐
//! │ event                            │ handling                             │
//! ├──────────────────────────────────┼──────────────────────────────────────┤
//! │ user enrolment created/updated/  │ sync_single(course, user)            │
//! │ deleted, role (un)assigned,      │                                      │
//! │ group member added/removed       │                                      │
//! │ group deleted                    │ lost-link disposition for every link │
//! │                                  │ reading from the group               │
//! │ course deleted                   │ links reading from it are deleted    │
//! │                                  │ (unenrol) or disabled                │
//! │ enrolment instance updated       │ batch run of every fed target course │
//! └──────────────────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Events are ignored while the engine is switched off. Failures propagate so
//! the host can retry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use metagroup_core::{LinkStatus, UnenrolAction, LINK_COMPONENT};
use metagroup_db::RoleFilter;

use crate::error::SyncResult;
use crate::incremental::{IncrementalSync, SyncContext};
use crate::links::LinkManager;
use crate::lost::LostLinkHandler;
use crate::ops::LinkOps;
use crate::reconcile::Reconciler;

/// A change on the host that may affect derived state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    UserEnrolmentCreated { course_id: i64, user_id: i64 },
    UserEnrolmentUpdated { course_id: i64, user_id: i64 },
    UserEnrolmentDeleted { course_id: i64, user_id: i64 },
    RoleAssigned { course_id: i64, user_id: i64 },
    RoleUnassigned { course_id: i64, user_id: i64 },
    GroupMemberAdded { course_id: i64, group_id: i64, user_id: i64 },
    GroupMemberRemoved { course_id: i64, group_id: i64, user_id: i64 },
    GroupDeleted { group_id: i64 },
    CourseDeleted { course_id: i64 },
    EnrolInstanceUpdated { course_id: i64 },
}

impl HostEvent {
    /// The (course, user) pair an event narrows to, if any.
    pub fn user_scope(&self) -> Option<(i64, i64)> {
        match *self {
            HostEvent::UserEnrolmentCreated { course_id, user_id }
            | HostEvent::UserEnrolmentUpdated { course_id, user_id }
            | HostEvent::UserEnrolmentDeleted { course_id, user_id }
            | HostEvent::RoleAssigned { course_id, user_id }
            | HostEvent::RoleUnassigned { course_id, user_id }
            | HostEvent::GroupMemberAdded { course_id, user_id, .. }
            | HostEvent::GroupMemberRemoved { course_id, user_id, .. } => Some((course_id, user_id)),
            _ => None,
        }
    }
}

pub struct EventHandler {
    ops: LinkOps,
    incremental: IncrementalSync,
    lost: LostLinkHandler,
    manager: LinkManager,
    reconciler: Reconciler,
}

impl EventHandler {
    pub fn new(ops: LinkOps) -> Self {
        EventHandler {
            incremental: IncrementalSync::new(ops.clone()),
            lost: LostLinkHandler::new(ops.clone()),
            manager: LinkManager::new(ops.clone()),
            reconciler: Reconciler::new(ops.clone()),
            ops,
        }
    }

    /// Handles one event. Returns the number of records changed where that
    /// is known, else the number of links affected.
    pub async fn handle(&self, event: &HostEvent, ctx: &mut SyncContext) -> SyncResult<u64> {
        if !self.ops.config().enabled {
            debug!(?event, "Engine disabled, event ignored");
            return Ok(0);
        }

        if let Some((course_id, user_id)) = event.user_scope() {
            return self.incremental.sync_single(course_id, user_id, ctx).await;
        }

        match *event {
            HostEvent::GroupDeleted { group_id } => self.group_deleted(group_id).await,
            HostEvent::CourseDeleted { course_id } => self.course_deleted(course_id).await,
            HostEvent::EnrolInstanceUpdated { course_id } => self.instance_updated(course_id).await,
            _ => Ok(0),
        }
    }

    async fn group_deleted(&self, group_id: i64) -> SyncResult<u64> {
        let links = self.ops.db().links().list_sourced_from_group(group_id).await?;
        for link in &links {
            self.lost.deal_with_lost_link(link).await?;
        }
        if !links.is_empty() {
            info!(group_id, links = links.len(), "Source group deleted");
        }
        Ok(links.len() as u64)
    }

    async fn course_deleted(&self, course_id: i64) -> SyncResult<u64> {
        let db = self.ops.db();
        let links = db.links().list_sourced_from_course(course_id).await?;
        let action = self.ops.config().unenrol_action();

        for link in &links {
            match action {
                UnenrolAction::Unenrol => {
                    self.manager.delete_link_by_id(link.id).await?;
                }
                UnenrolAction::Suspend | UnenrolAction::SuspendNoRoles => {
                    if link.status != LinkStatus::Disabled {
                        db.links().set_status(link.id, LinkStatus::Disabled).await?;
                    }
                    if action == UnenrolAction::SuspendNoRoles {
                        db.roles()
                            .unassign_all(&RoleFilter::origin(LINK_COMPONENT, link.id))
                            .await?;
                    }
                }
            }
        }
        if !links.is_empty() {
            info!(course_id, links = links.len(), %action, "Source course deleted");
        }
        Ok(links.len() as u64)
    }

    async fn instance_updated(&self, course_id: i64) -> SyncResult<u64> {
        let targets: BTreeSet<i64> = self
            .ops
            .db()
            .links()
            .list_sourced_from_course(course_id)
            .await?
            .into_iter()
            .map(|link| link.target_course_id)
            .collect();

        let mut operations = 0;
        for target_course_id in targets {
            operations += self.reconciler.reconcile(Some(target_course_id)).await?.operations();
        }
        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use metagroup_core::{EnrolStatus, LostLinkAction};

    #[test]
    fn test_event_json_shape() {
        let event: HostEvent =
            serde_json::from_str(r#"{"event":"group_member_added","course_id":10,"group_id":5,"user_id":42}"#).unwrap();
        assert_eq!(event.user_scope(), Some((10, 42)));
        assert_eq!(HostEvent::CourseDeleted { course_id: 10 }.user_scope(), None);
    }

    #[tokio::test]
    async fn test_member_events_drive_incremental_sync() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        let link = fx.link(tgt, src, group).await;
        let events = fx.events();
        let mut ctx = SyncContext::new();

        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        events
            .handle(&HostEvent::GroupMemberAdded { course_id: src, group_id: group, user_id: 1 }, &mut ctx)
            .await
            .unwrap();
        assert_eq!(fx.members(link.target_group_id).await, vec![1]);

        fx.db.enrolments().unenrol(manual, 1).await.unwrap();
        events
            .handle(&HostEvent::UserEnrolmentDeleted { course_id: src, user_id: 1 }, &mut ctx)
            .await
            .unwrap();
        let ue = fx.db.enrolments().get(link.id, 1).await.unwrap().unwrap();
        assert_eq!(ue.status, EnrolStatus::Suspended);
    }

    #[tokio::test]
    async fn test_disabled_engine_ignores_events() {
        let fx = Fixture::with_config(|c| c.enabled = false).await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        let link = fx.link(tgt, src, group).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;

        let changed = fx
            .events()
            .handle(&HostEvent::UserEnrolmentCreated { course_id: src, user_id: 1 }, &mut SyncContext::new())
            .await
            .unwrap();
        assert_eq!(changed, 0);
        assert!(fx.enrolled(link.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_course_deleted_disables_or_deletes() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let link = fx.link(tgt, src, group).await;
        fx.db.roles().assign(5, 1, tgt, LINK_COMPONENT, link.id).await.unwrap();

        fx.db.courses().delete(src).await.unwrap();
        let mut ctx = SyncContext::new();
        fx.events()
            .handle(&HostEvent::CourseDeleted { course_id: src }, &mut ctx)
            .await
            .unwrap();
        assert_eq!(fx.db.links().require(link.id).await.unwrap().status, LinkStatus::Disabled);
        assert!(fx.link_roles(link.id, 1).await.is_empty());

        let fx = Fixture::with_config(|c| c.sync.unenrol_action = UnenrolAction::Unenrol).await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let link = fx.link(tgt, src, group).await;
        fx.db.courses().delete(src).await.unwrap();
        fx.events()
            .handle(&HostEvent::CourseDeleted { course_id: src }, &mut ctx)
            .await
            .unwrap();
        assert!(fx.db.links().get(link.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_group_deleted_applies_lost_disposition() {
        let fx = Fixture::with_config(|c| c.sync.lost_link_action = LostLinkAction::Unenrol).await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        let link = fx.link(tgt, src, group).await;
        fx.reconciler().reconcile(None).await.unwrap();

        fx.db.groups().delete(group).await.unwrap();
        let handled = fx
            .events()
            .handle(&HostEvent::GroupDeleted { group_id: group }, &mut SyncContext::new())
            .await
            .unwrap();

        assert_eq!(handled, 1);
        assert_eq!(fx.db.links().require(link.id).await.unwrap().status, LinkStatus::Disabled);
        assert!(fx.enrolled(link.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_instance_update_reconciles_targets() {
        let fx = Fixture::new().await;
        let (src, group) = fx.source_course("SRC", "Team").await;
        let tgt = fx.course("TGT").await;
        let manual = fx.manual(src).await;
        fx.enrol_member(manual, group, 1, EnrolStatus::Active, 0, 0).await;
        let link = fx.link(tgt, src, group).await;

        let operations = fx
            .events()
            .handle(&HostEvent::EnrolInstanceUpdated { course_id: src }, &mut SyncContext::new())
            .await
            .unwrap();
        assert_eq!(operations, 2);
        assert_eq!(fx.enrolled(link.id).await, vec![1]);
    }
}
