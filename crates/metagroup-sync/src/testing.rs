//! Test fixture: an in-memory site with courses, groups, manual enrolments
//! and links.

use std::sync::Arc;

use metagroup_core::{EnrolStatus, InstanceStatus, Link, LinkStatus, NewLink, MANUAL_COMPONENT};
use metagroup_db::{Database, DbConfig};

use crate::config::SyncConfig;
use crate::events::EventHandler;
use crate::incremental::IncrementalSync;
use crate::links::LinkManager;
use crate::ops::LinkOps;
use crate::reconcile::Reconciler;

pub struct Fixture {
    pub db: Arc<Database>,
    pub config: Arc<SyncConfig>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config<F>(configure: F) -> Self
    where
        F: FnOnce(&mut SyncConfig),
    {
        let mut config = SyncConfig::default();
        configure(&mut config);
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Fixture {
            db: Arc::new(db),
            config: Arc::new(config),
        }
    }

    pub fn ops(&self) -> LinkOps {
        LinkOps::new(self.db.clone(), self.config.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.ops())
    }

    pub fn incremental(&self) -> IncrementalSync {
        IncrementalSync::new(self.ops())
    }

    pub fn manager(&self) -> LinkManager {
        LinkManager::new(self.ops())
    }

    pub fn events(&self) -> EventHandler {
        EventHandler::new(self.ops())
    }

    // -------------------------------------------------------------------------
    // Host records
    // -------------------------------------------------------------------------

    pub async fn course(&self, shortname: &str) -> i64 {
        self.db.courses().insert(shortname, shortname).await.unwrap()
    }

    pub async fn group(&self, course_id: i64, name: &str) -> i64 {
        self.db.groups().create(course_id, name).await.unwrap()
    }

    /// A course with one group.
    pub async fn source_course(&self, shortname: &str, group_name: &str) -> (i64, i64) {
        let course = self.course(shortname).await;
        let group = self.group(course, group_name).await;
        (course, group)
    }

    pub async fn instance(&self, course_id: i64, method: &str) -> i64 {
        self.db
            .enrolments()
            .add_instance(course_id, method, InstanceStatus::Enabled, None)
            .await
            .unwrap()
    }

    pub async fn manual(&self, course_id: i64) -> i64 {
        self.instance(course_id, "manual").await
    }

    pub async fn enrol(&self, instance_id: i64, user_id: i64, status: EnrolStatus, start: i64, end: i64) {
        self.db
            .enrolments()
            .enrol(instance_id, user_id, None, start, end, status)
            .await
            .unwrap();
    }

    /// Enrols a user and adds them to a group as a manual member.
    pub async fn enrol_member(
        &self,
        instance_id: i64,
        group_id: i64,
        user_id: i64,
        status: EnrolStatus,
        start: i64,
        end: i64,
    ) {
        self.enrol(instance_id, user_id, status, start, end).await;
        self.db
            .groups()
            .add_member(group_id, user_id, MANUAL_COMPONENT, 0)
            .await
            .unwrap();
    }

    pub async fn role(&self, role_id: i64, user_id: i64, course_id: i64) {
        self.db
            .roles()
            .assign(role_id, user_id, course_id, MANUAL_COMPONENT, 0)
            .await
            .unwrap();
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    /// Stores an enabled mirror link into a fresh target group, without
    /// resolving a root or syncing.
    pub async fn link(&self, target_course_id: i64, source_course_id: i64, source_group_id: i64) -> Link {
        let target_group_id = self.group(target_course_id, "Mirror").await;
        self.link_into(target_course_id, target_group_id, source_course_id, source_group_id)
            .await
    }

    pub async fn link_into(
        &self,
        target_course_id: i64,
        target_group_id: i64,
        source_course_id: i64,
        source_group_id: i64,
    ) -> Link {
        self.db
            .links()
            .insert(&NewLink {
                target_course_id,
                target_group_id,
                source_course_id,
                source_group_id,
                status: LinkStatus::Enabled,
                ..NewLink::default()
            })
            .await
            .unwrap()
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub async fn enrolled(&self, link_id: i64) -> Vec<i64> {
        self.db
            .enrolments()
            .list_for_instance(link_id)
            .await
            .unwrap()
            .into_iter()
            .map(|ue| ue.user_id)
            .collect()
    }

    pub async fn members(&self, group_id: i64) -> Vec<i64> {
        self.db.groups().list_members(group_id).await.unwrap()
    }

    pub async fn link_roles(&self, link_id: i64, user_id: i64) -> Vec<i64> {
        self.db
            .roles()
            .list(&metagroup_db::RoleFilter::origin(metagroup_core::LINK_COMPONENT, link_id).user(user_id))
            .await
            .unwrap()
            .into_iter()
            .map(|ra| ra.role_id)
            .collect()
    }
}
