//! # Enrolment Repository
//!
//! Enrolment directory: enrolment instances (methods attached to a course)
//! and the user enrolments made through them.
//!
//! ## Tables
//! ```text
//! enrol_instances                      user_enrolments
//! ┌────┬────────┬───────────┬────────┐ ┌─────────────┬─────────┬────────┬───────┬─────┐
//! │ id │ course │ method    │ status │ │ instance_id │ user_id │ status │ start │ end │
//! ├────┼────────┼───────────┼────────┤ ├─────────────┼─────────┼────────┼───────┼─────┤
//! │ 1  │ 10     │ manual    │ 0      │ │ 1           │ 42      │ 0      │ 100   │ 0   │
//! │ 7  │ 20     │ metagroup │ 0      │ │ 7           │ 42      │ 0      │ 100   │ 0   │
//! └────┴────────┴───────────┴────────┘ └─────────────┴─────────┴────────┴───────┴─────┘
//!   ▲ link 7 owns instance 7               ▲ derived enrolment of user 42
//! ```

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use metagroup_core::{
    EnrolInstance, EnrolStatus, InstanceStatus, SourceEnrolment, SourceRef, UserEnrolment,
};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct InstanceRow {
    id: i64,
    course_id: i64,
    method: String,
    status: i64,
    parent_course_id: Option<i64>,
}

impl From<InstanceRow> for EnrolInstance {
    fn from(row: InstanceRow) -> Self {
        EnrolInstance {
            id: row.id,
            course_id: row.course_id,
            method: row.method,
            status: InstanceStatus::from_code(row.status),
            parent_course_id: row.parent_course_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserEnrolmentRow {
    id: i64,
    instance_id: i64,
    user_id: i64,
    status: i64,
    time_start: i64,
    time_end: i64,
}

impl From<UserEnrolmentRow> for UserEnrolment {
    fn from(row: UserEnrolmentRow) -> Self {
        UserEnrolment {
            id: row.id,
            instance_id: row.instance_id,
            user_id: row.user_id,
            status: EnrolStatus::from_code(row.status),
            time_start: row.time_start,
            time_end: row.time_end,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SourceRow {
    user_id: i64,
    instance_id: i64,
    method: String,
    status: i64,
    instance_status: i64,
    time_start: i64,
    time_end: i64,
}

impl From<SourceRow> for SourceEnrolment {
    fn from(row: SourceRow) -> Self {
        SourceEnrolment {
            user_id: row.user_id,
            instance_id: row.instance_id,
            method: row.method,
            status: EnrolStatus::from_code(row.status),
            instance_status: InstanceStatus::from_code(row.instance_status),
            time_start: row.time_start,
            time_end: row.time_end,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OriginRow {
    group_id: i64,
    course_id: i64,
    instance_id: i64,
    method: String,
    parent_course_id: Option<i64>,
    link_source_course_id: Option<i64>,
    link_source_group_id: Option<i64>,
    link_root_course_id: Option<i64>,
    link_root_group_id: Option<i64>,
}

// =============================================================================
// Query Types
// =============================================================================

/// Which enrolments count as a link's source rows.
#[derive(Debug, Clone, Copy)]
pub struct SourceQuery {
    /// Course whose enrolments are read.
    pub course_id: i64,
    /// Only users who are members of this group.
    pub group_id: i64,
    /// Ignore enrolments made by links whose logical source or root is this
    /// course (the link's own target), so a link never feeds on itself, not
    /// even around a cycle.
    pub exclude_fed_from: i64,
    /// Only count manual (`component = ''`) group memberships.
    pub manual_members_only: bool,
    /// Restrict to one user.
    pub user_id: Option<i64>,
}

/// A distinct enrolment instance through which members of a group came in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOrigin {
    pub group_id: i64,
    pub course_id: i64,
    pub instance_id: i64,
    pub method: String,
    /// Parent course of a `meta` instance.
    pub parent_course_id: Option<i64>,
    /// Root-or-logical source when the instance belongs to a link.
    pub link_parent: Option<SourceRef>,
}

impl From<OriginRow> for GroupOrigin {
    fn from(row: OriginRow) -> Self {
        let link_parent = row.link_source_course_id.map(|logical_course| {
            SourceRef::new(
                row.link_root_course_id.unwrap_or(logical_course),
                row.link_root_group_id.or(row.link_source_group_id),
            )
        });
        GroupOrigin {
            group_id: row.group_id,
            course_id: row.course_id,
            instance_id: row.instance_id,
            method: row.method,
            parent_course_id: row.parent_course_id,
            link_parent,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for enrolment instances and user enrolments.
#[derive(Debug, Clone)]
pub struct EnrolmentRepository {
    pool: SqlitePool,
}

impl EnrolmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EnrolmentRepository { pool }
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Attaches an enrolment method to a course.
    pub async fn add_instance(
        &self,
        course_id: i64,
        method: &str,
        status: InstanceStatus,
        parent_course_id: Option<i64>,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            "INSERT INTO enrol_instances (course_id, method, status, parent_course_id) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(course_id)
        .bind(method)
        .bind(status.code())
        .bind(parent_course_id)
        .execute(&self.pool)
        .await?;

        debug!(instance_id = result.last_insert_rowid(), course_id, method, "Enrolment instance added");
        Ok(result.last_insert_rowid())
    }

    pub async fn get_instance(&self, instance_id: i64) -> DbResult<Option<EnrolInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(
            "SELECT id, course_id, method, status, parent_course_id FROM enrol_instances WHERE id = ?1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EnrolInstance::from))
    }

    pub async fn set_instance_status(&self, instance_id: i64, status: InstanceStatus) -> DbResult<()> {
        let result = sqlx::query("UPDATE enrol_instances SET status = ?2 WHERE id = ?1")
            .bind(instance_id)
            .bind(status.code())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Enrolment instance", instance_id));
        }
        Ok(())
    }

    // =========================================================================
    // User Enrolments
    // =========================================================================

    /// Enrols a user through an instance, optionally assigning a role tagged
    /// with the instance as origin.
    pub async fn enrol(
        &self,
        instance_id: i64,
        user_id: i64,
        role_id: Option<i64>,
        time_start: i64,
        time_end: i64,
        status: EnrolStatus,
    ) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let instance = sqlx::query_as::<_, InstanceRow>(
            "SELECT id, course_id, method, status, parent_course_id FROM enrol_instances WHERE id = ?1",
        )
        .bind(instance_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(EnrolInstance::from)
        .ok_or_else(|| DbError::not_found("Enrolment instance", instance_id))?;

        let result = sqlx::query(
            r#"
            INSERT INTO user_enrolments (instance_id, user_id, status, time_start, time_end)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(instance_id)
        .bind(user_id)
        .bind(status.code())
        .bind(time_start)
        .bind(time_end)
        .execute(&mut *tx)
        .await?;

        if let Some(role_id) = role_id {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO role_assignments (role_id, user_id, course_id, component, item_id)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(role_id)
            .bind(user_id)
            .bind(instance.course_id)
            .bind(instance.component())
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(instance_id, user_id, ?status, time_start, time_end, "User enrolled");
        Ok(result.last_insert_rowid())
    }

    /// Updates status and, when given, the window of an enrolment.
    pub async fn update_enrol(
        &self,
        instance_id: i64,
        user_id: i64,
        status: EnrolStatus,
        time_start: Option<i64>,
        time_end: Option<i64>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_enrolments SET
                status = ?3,
                time_start = COALESCE(?4, time_start),
                time_end = COALESCE(?5, time_end)
            WHERE instance_id = ?1 AND user_id = ?2
            "#,
        )
        .bind(instance_id)
        .bind(user_id)
        .bind(status.code())
        .bind(time_start)
        .bind(time_end)
        .execute(&self.pool)
        .await?;

        debug!(instance_id, user_id, ?status, updated = result.rows_affected(), "Enrolment updated");
        Ok(result.rows_affected() > 0)
    }

    /// Removes a user's enrolment through one instance, together with the
    /// roles and memberships that instance created.
    ///
    /// If that was the user's last enrolment in the course, the user is fully
    /// unenrolled: every role assignment and group membership they hold in
    /// the course is purged.
    pub async fn unenrol(&self, instance_id: i64, user_id: i64) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(instance) = sqlx::query_as::<_, InstanceRow>(
            "SELECT id, course_id, method, status, parent_course_id FROM enrol_instances WHERE id = ?1",
        )
        .bind(instance_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(EnrolInstance::from) else {
            return Ok(false);
        };
        let component = instance.component();

        let removed = sqlx::query("DELETE FROM user_enrolments WHERE instance_id = ?1 AND user_id = ?2")
            .bind(instance_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "DELETE FROM role_assignments WHERE user_id = ?1 AND course_id = ?2 AND component = ?3 AND item_id = ?4",
        )
        .bind(user_id)
        .bind(instance.course_id)
        .bind(&component)
        .bind(instance_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM group_members WHERE user_id = ?1 AND component = ?2 AND item_id = ?3")
            .bind(user_id)
            .bind(&component)
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;

        let remaining: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM user_enrolments ue
            JOIN enrol_instances e ON e.id = ue.instance_id
            WHERE e.course_id = ?1 AND ue.user_id = ?2
            "#,
        )
        .bind(instance.course_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if remaining == 0 {
            sqlx::query("DELETE FROM role_assignments WHERE course_id = ?1 AND user_id = ?2")
                .bind(instance.course_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "DELETE FROM group_members WHERE user_id = ?2 AND group_id IN (SELECT id FROM course_groups WHERE course_id = ?1)",
            )
            .bind(instance.course_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(instance_id, user_id, removed, fully_unenrolled = remaining == 0, "User unenrolled");
        Ok(removed > 0)
    }

    pub async fn get(&self, instance_id: i64, user_id: i64) -> DbResult<Option<UserEnrolment>> {
        let row = sqlx::query_as::<_, UserEnrolmentRow>(
            r#"
            SELECT id, instance_id, user_id, status, time_start, time_end
            FROM user_enrolments
            WHERE instance_id = ?1 AND user_id = ?2
            "#,
        )
        .bind(instance_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserEnrolment::from))
    }

    /// Every enrolment made through one instance, ordered by user.
    pub async fn list_for_instance(&self, instance_id: i64) -> DbResult<Vec<UserEnrolment>> {
        let rows = sqlx::query_as::<_, UserEnrolmentRow>(
            r#"
            SELECT id, instance_id, user_id, status, time_start, time_end
            FROM user_enrolments
            WHERE instance_id = ?1
            ORDER BY user_id
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserEnrolment::from).collect())
    }

    /// Suspends every active enrolment of an instance. Returns how many
    /// changed.
    pub async fn suspend_all(&self, instance_id: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE user_enrolments SET status = ?2 WHERE instance_id = ?1 AND status <> ?2",
        )
        .bind(instance_id)
        .bind(EnrolStatus::Suspended.code())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Enrolments in a course through the given methods, with both the
    /// enrolment status and the instance status.
    pub async fn list_active_enrolments(
        &self,
        course_id: i64,
        enabled_methods: &[String],
    ) -> DbResult<Vec<SourceEnrolment>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT ue.user_id, ue.instance_id, e.method, ue.status, e.status AS instance_status,
                   ue.time_start, ue.time_end
            FROM user_enrolments ue
            JOIN enrol_instances e ON e.id = ue.instance_id
            WHERE e.course_id = ?1
            ORDER BY ue.user_id, ue.instance_id
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter(|row| enabled_methods.iter().any(|m| *m == row.method))
            .map(SourceEnrolment::from)
            .collect())
    }

    /// Enrolments in `course_id` of users who are members of `group_id`.
    /// The method filter is applied by the caller.
    pub async fn source_enrolments(&self, query: SourceQuery) -> DbResult<Vec<SourceEnrolment>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT ue.user_id, ue.instance_id, e.method, ue.status, e.status AS instance_status,
                   ue.time_start, ue.time_end
            FROM user_enrolments ue
            JOIN enrol_instances e ON e.id = ue.instance_id
            JOIN group_members gm ON gm.user_id = ue.user_id AND gm.group_id = ?2
            LEFT JOIN links pl ON pl.id = e.id
            WHERE e.course_id = ?1
              AND (?4 = 0 OR gm.component = '')
              AND (pl.id IS NULL OR (pl.source_course_id <> ?3 AND COALESCE(pl.root_course_id, pl.source_course_id) <> ?3))
              AND (?5 IS NULL OR ue.user_id = ?5)
            ORDER BY ue.user_id, ue.instance_id
            "#,
        )
        .bind(query.course_id)
        .bind(query.group_id)
        .bind(query.exclude_fed_from)
        .bind(query.manual_members_only)
        .bind(query.user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SourceEnrolment::from).collect())
    }

    /// Distinct (group, instance) pairs: which enrolment methods put the
    /// current members into each group.
    pub async fn group_origins(&self) -> DbResult<Vec<GroupOrigin>> {
        let rows = sqlx::query_as::<_, OriginRow>(
            r#"
            SELECT DISTINCT
                gm.group_id,
                e.course_id,
                e.id AS instance_id,
                e.method,
                e.parent_course_id,
                l.source_course_id AS link_source_course_id,
                l.source_group_id AS link_source_group_id,
                l.root_course_id AS link_root_course_id,
                l.root_group_id AS link_root_group_id
            FROM group_members gm
            JOIN course_groups g ON g.id = gm.group_id
            JOIN user_enrolments ue ON ue.user_id = gm.user_id
            JOIN enrol_instances e ON e.id = ue.instance_id AND e.course_id = g.course_id
            LEFT JOIN links l ON l.id = e.id
            ORDER BY gm.group_id, e.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(GroupOrigin::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn setup() -> (Database, i64, i64, i64) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let course = db.courses().insert("SRC", "Source").await.unwrap();
        let group = db.groups().create(course, "Team").await.unwrap();
        let manual = db
            .enrolments()
            .add_instance(course, "manual", InstanceStatus::Enabled, None)
            .await
            .unwrap();
        (db, course, group, manual)
    }

    #[tokio::test]
    async fn test_enrol_update_and_get() {
        let (db, _course, _group, manual) = setup().await;
        let enrolments = db.enrolments();

        enrolments
            .enrol(manual, 1, None, 100, 0, EnrolStatus::Active)
            .await
            .unwrap();
        assert!(enrolments
            .enrol(manual, 1, None, 100, 0, EnrolStatus::Active)
            .await
            .is_err());

        assert!(enrolments
            .update_enrol(manual, 1, EnrolStatus::Suspended, None, Some(500))
            .await
            .unwrap());
        let ue = enrolments.get(manual, 1).await.unwrap().unwrap();
        assert_eq!(ue.status, EnrolStatus::Suspended);
        assert_eq!((ue.time_start, ue.time_end), (100, 500));
    }

    #[tokio::test]
    async fn test_unenrol_last_enrolment_purges_course_records() {
        let (db, course, group, manual) = setup().await;
        let enrolments = db.enrolments();

        enrolments
            .enrol(manual, 1, Some(5), 0, 0, EnrolStatus::Active)
            .await
            .unwrap();
        db.groups().add_member(group, 1, "", 0).await.unwrap();
        db.roles().assign(3, 1, course, "", 0).await.unwrap();

        assert!(enrolments.unenrol(manual, 1).await.unwrap());
        assert!(!db.groups().is_member(group, 1).await.unwrap());
        assert!(db.roles().roles_in_course(course, 1).await.unwrap().is_empty());
        assert!(!enrolments.unenrol(manual, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_unenrol_keeps_other_origins_when_still_enrolled() {
        let (db, course, group, manual) = setup().await;
        let enrolments = db.enrolments();
        let other = enrolments
            .add_instance(course, "self", InstanceStatus::Enabled, None)
            .await
            .unwrap();

        enrolments.enrol(manual, 1, None, 0, 0, EnrolStatus::Active).await.unwrap();
        enrolments.enrol(other, 1, Some(5), 0, 0, EnrolStatus::Active).await.unwrap();
        db.groups().add_member(group, 1, "", 0).await.unwrap();
        db.roles().assign(3, 1, course, "", 0).await.unwrap();

        enrolments.unenrol(other, 1).await.unwrap();
        assert!(db.groups().is_member(group, 1).await.unwrap());
        let roles = db.roles().roles_in_course(course, 1).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role_id, 3);
    }

    #[tokio::test]
    async fn test_source_enrolments_filters() {
        let (db, course, group, manual) = setup().await;
        let enrolments = db.enrolments();
        enrolments.enrol(manual, 1, None, 0, 0, EnrolStatus::Active).await.unwrap();
        enrolments.enrol(manual, 2, None, 0, 0, EnrolStatus::Suspended).await.unwrap();
        enrolments.enrol(manual, 3, None, 0, 0, EnrolStatus::Active).await.unwrap();
        db.groups().add_member(group, 1, "", 0).await.unwrap();
        db.groups().add_member(group, 2, "enrol_metagroup", 99).await.unwrap();

        let query = SourceQuery {
            course_id: course,
            group_id: group,
            exclude_fed_from: 0,
            manual_members_only: false,
            user_id: None,
        };
        let users: Vec<i64> = enrolments
            .source_enrolments(query)
            .await
            .unwrap()
            .iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(users, vec![1, 2]);

        let manual_only = enrolments
            .source_enrolments(SourceQuery {
                manual_members_only: true,
                ..query
            })
            .await
            .unwrap();
        assert_eq!(manual_only.len(), 1);
        assert_eq!(manual_only[0].user_id, 1);

        let one_user = enrolments
            .source_enrolments(SourceQuery {
                user_id: Some(2),
                ..query
            })
            .await
            .unwrap();
        assert_eq!(one_user.len(), 1);
        assert_eq!(one_user[0].status, EnrolStatus::Suspended);

        let methods = vec!["self".to_string()];
        assert!(enrolments.list_active_enrolments(course, &methods).await.unwrap().is_empty());
        let methods = vec!["manual".to_string()];
        assert_eq!(enrolments.list_active_enrolments(course, &methods).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_group_origins() {
        let (db, course, group, manual) = setup().await;
        let enrolments = db.enrolments();
        let meta = enrolments
            .add_instance(course, "meta", InstanceStatus::Enabled, Some(77))
            .await
            .unwrap();
        enrolments.enrol(manual, 1, None, 0, 0, EnrolStatus::Active).await.unwrap();
        enrolments.enrol(manual, 2, None, 0, 0, EnrolStatus::Active).await.unwrap();
        enrolments.enrol(meta, 2, None, 0, 0, EnrolStatus::Active).await.unwrap();
        db.groups().add_member(group, 1, "", 0).await.unwrap();
        db.groups().add_member(group, 2, "", 0).await.unwrap();

        let origins = enrolments.group_origins().await.unwrap();
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0].instance_id, manual);
        assert_eq!(origins[1].parent_course_id, Some(77));
        assert!(origins.iter().all(|o| o.link_parent.is_none()));

        assert_eq!(enrolments.suspend_all(manual).await.unwrap(), 2);
        assert_eq!(enrolments.suspend_all(manual).await.unwrap(), 0);
    }
}
