//! # Role Repository
//!
//! Role directory: role assignments in course contexts, tagged with the
//! component and item that created them.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use metagroup_core::RoleAssignment;

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: i64,
    role_id: i64,
    user_id: i64,
    course_id: i64,
    component: String,
    item_id: i64,
}

impl From<RoleRow> for RoleAssignment {
    fn from(row: RoleRow) -> Self {
        RoleAssignment {
            id: row.id,
            role_id: row.role_id,
            user_id: row.user_id,
            course_id: row.course_id,
            component: row.component,
            item_id: row.item_id,
        }
    }
}

/// Selects role assignments. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    pub user_id: Option<i64>,
    pub course_id: Option<i64>,
    pub component: Option<String>,
    pub item_id: Option<i64>,
}

impl RoleFilter {
    /// Every assignment created by one origin.
    pub fn origin(component: &str, item_id: i64) -> Self {
        RoleFilter {
            component: Some(component.to_string()),
            item_id: Some(item_id),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn course(mut self, course_id: i64) -> Self {
        self.course_id = Some(course_id);
        self
    }

    fn push_where(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" WHERE 1 = 1");
        if let Some(user_id) = self.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(course_id) = self.course_id {
            builder.push(" AND course_id = ").push_bind(course_id);
        }
        if let Some(component) = &self.component {
            builder.push(" AND component = ").push_bind(component.clone());
        }
        if let Some(item_id) = self.item_id {
            builder.push(" AND item_id = ").push_bind(item_id);
        }
    }
}

/// Repository for role assignments.
#[derive(Debug, Clone)]
pub struct RoleRepository {
    pool: SqlitePool,
}

impl RoleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RoleRepository { pool }
    }

    /// Assigns a role. Returns false if the exact assignment already existed.
    pub async fn assign(
        &self,
        role_id: i64,
        user_id: i64,
        course_id: i64,
        component: &str,
        item_id: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO role_assignments (role_id, user_id, course_id, component, item_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(role_id)
        .bind(user_id)
        .bind(course_id)
        .bind(component)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        debug!(role_id, user_id, course_id, component, item_id, added = result.rows_affected(), "Role assign");
        Ok(result.rows_affected() > 0)
    }

    /// Removes one exact assignment.
    pub async fn unassign(
        &self,
        role_id: i64,
        user_id: i64,
        course_id: i64,
        component: &str,
        item_id: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM role_assignments
            WHERE role_id = ?1 AND user_id = ?2 AND course_id = ?3 AND component = ?4 AND item_id = ?5
            "#,
        )
        .bind(role_id)
        .bind(user_id)
        .bind(course_id)
        .bind(component)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        debug!(role_id, user_id, course_id, component, item_id, removed = result.rows_affected(), "Role unassign");
        Ok(result.rows_affected() > 0)
    }

    /// Removes every assignment matching the filter.
    pub async fn unassign_all(&self, filter: &RoleFilter) -> DbResult<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM role_assignments");
        filter.push_where(&mut builder);

        let result = builder.build().execute(&self.pool).await?;

        debug!(?filter, removed = result.rows_affected(), "Role unassign_all");
        Ok(result.rows_affected())
    }

    /// Assignments matching the filter, ordered by id.
    pub async fn list(&self, filter: &RoleFilter) -> DbResult<Vec<RoleAssignment>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, role_id, user_id, course_id, component, item_id FROM role_assignments",
        );
        filter.push_where(&mut builder);
        builder.push(" ORDER BY id");

        let rows = builder
            .build_query_as::<RoleRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(RoleAssignment::from).collect())
    }

    /// Every role a user holds in a course, whatever the origin.
    pub async fn roles_in_course(&self, course_id: i64, user_id: i64) -> DbResult<Vec<RoleAssignment>> {
        self.list(&RoleFilter::default().course(course_id).user(user_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use metagroup_core::LINK_COMPONENT;

    #[tokio::test]
    async fn test_assign_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let course = db.courses().insert("C", "Course").await.unwrap();
        let roles = db.roles();

        assert!(roles.assign(5, 1, course, LINK_COMPONENT, 7).await.unwrap());
        assert!(!roles.assign(5, 1, course, LINK_COMPONENT, 7).await.unwrap());
        // Same role from another origin is a separate assignment.
        assert!(roles.assign(5, 1, course, "", 0).await.unwrap());
        assert_eq!(roles.roles_in_course(course, 1).await.unwrap().len(), 2);

        assert!(roles.unassign(5, 1, course, LINK_COMPONENT, 7).await.unwrap());
        assert!(!roles.unassign(5, 1, course, LINK_COMPONENT, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_filters_scope_to_origin() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let course = db.courses().insert("C", "Course").await.unwrap();
        let roles = db.roles();

        roles.assign(5, 1, course, LINK_COMPONENT, 7).await.unwrap();
        roles.assign(5, 2, course, LINK_COMPONENT, 7).await.unwrap();
        roles.assign(5, 1, course, LINK_COMPONENT, 8).await.unwrap();
        roles.assign(3, 1, course, "", 0).await.unwrap();

        let link7 = RoleFilter::origin(LINK_COMPONENT, 7);
        assert_eq!(roles.list(&link7).await.unwrap().len(), 2);
        assert_eq!(roles.unassign_all(&link7.clone().user(1)).await.unwrap(), 1);
        assert_eq!(roles.unassign_all(&link7).await.unwrap(), 1);

        let remaining = roles.roles_in_course(course, 1).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|r| r.is_from_link(8)));
        assert!(remaining.iter().any(|r| r.component.is_empty()));
    }
}
