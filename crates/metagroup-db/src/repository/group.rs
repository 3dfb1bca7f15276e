//! # Group Repository
//!
//! Group directory: groups, memberships and their origin tags.
//!
//! ## Membership Origins
//! ```text
//! group_members
//! ┌──────────┬─────────┬──────────────────┬─────────┐
//! │ group_id │ user_id │ component        │ item_id │
//! ├──────────┼─────────┼──────────────────┼─────────┤
//! │ 50       │ 1       │ enrol_metagroup  │ 7       │ ← added by link 7
//! │ 50       │ 2       │ ''               │ 0       │ ← added manually
//! └──────────┴─────────┴──────────────────┴─────────┘
//! ```
//! A user is in a group at most once, whatever the origin.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use metagroup_core::{Group, GroupMember};

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    id: i64,
    course_id: i64,
    name: String,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            id: row.id,
            course_id: row.course_id,
            name: row.name,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    group_id: i64,
    user_id: i64,
    component: String,
    item_id: i64,
}

impl From<MemberRow> for GroupMember {
    fn from(row: MemberRow) -> Self {
        GroupMember {
            group_id: row.group_id,
            user_id: row.user_id,
            component: row.component,
            item_id: row.item_id,
        }
    }
}

/// Repository for groups and group memberships.
#[derive(Debug, Clone)]
pub struct GroupRepository {
    pool: SqlitePool,
}

impl GroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        GroupRepository { pool }
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Creates a group and returns its id.
    pub async fn create(&self, course_id: i64, name: &str) -> DbResult<i64> {
        let result = sqlx::query("INSERT INTO course_groups (course_id, name) VALUES (?1, ?2)")
            .bind(course_id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        let group_id = result.last_insert_rowid();
        debug!(group_id, course_id, name, "Group created");
        Ok(group_id)
    }

    pub async fn get(&self, group_id: i64) -> DbResult<Option<Group>> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, course_id, name FROM course_groups WHERE id = ?1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Group::from))
    }

    /// True if the group exists and belongs to the course.
    pub async fn exists_in_course(&self, group_id: i64, course_id: i64) -> DbResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM course_groups WHERE id = ?1 AND course_id = ?2")
                .bind(group_id)
                .bind(course_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    pub async fn find_by_name(&self, course_id: i64, name: &str) -> DbResult<Option<Group>> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, course_id, name FROM course_groups WHERE course_id = ?1 AND name = ?2 ORDER BY id LIMIT 1",
        )
        .bind(course_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Group::from))
    }

    /// Every group, for building link graph snapshots.
    pub async fn list(&self) -> DbResult<Vec<Group>> {
        let rows = sqlx::query_as::<_, GroupRow>("SELECT id, course_id, name FROM course_groups ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Group::from).collect())
    }

    /// Groups without members in the given course.
    pub async fn list_empty(&self, course_id: i64) -> DbResult<Vec<Group>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT g.id, g.course_id, g.name
            FROM course_groups g
            WHERE g.course_id = ?1
              AND NOT EXISTS (SELECT 1 FROM group_members gm WHERE gm.group_id = g.id)
            ORDER BY g.id
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Group::from).collect())
    }

    /// Deletes a group and its memberships.
    pub async fn delete(&self, group_id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM course_groups WHERE id = ?1")
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        debug!(group_id, deleted = result.rows_affected(), "Group deleted");
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Memberships
    // =========================================================================

    /// Adds a member. Returns false if the user already was a member (of any
    /// origin).
    pub async fn add_member(
        &self,
        group_id: i64,
        user_id: i64,
        component: &str,
        item_id: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO group_members (group_id, user_id, component, item_id)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(component)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        debug!(group_id, user_id, component, item_id, added = result.rows_affected(), "Add group member");
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_member(&self, group_id: i64, user_id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        debug!(group_id, user_id, removed = result.rows_affected(), "Remove group member");
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_member(&self, group_id: i64, user_id: i64) -> DbResult<bool> {
        Ok(self.membership(group_id, user_id).await?.is_some())
    }

    pub async fn membership(&self, group_id: i64, user_id: i64) -> DbResult<Option<GroupMember>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT group_id, user_id, component, item_id FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(GroupMember::from))
    }

    pub async fn count_members(&self, group_id: i64) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = ?1")
            .bind(group_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// User ids of all members, ascending.
    pub async fn list_members(&self, group_id: i64) -> DbResult<Vec<i64>> {
        let users: Vec<i64> =
            sqlx::query_scalar("SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY user_id")
                .bind(group_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(users)
    }

    /// Memberships created by one origin (e.g. one link).
    pub async fn members_by_origin(&self, component: &str, item_id: i64) -> DbResult<Vec<GroupMember>> {
        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT group_id, user_id, component, item_id
            FROM group_members
            WHERE component = ?1 AND item_id = ?2
            ORDER BY user_id, group_id
            "#,
        )
        .bind(component)
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(GroupMember::from).collect())
    }

    /// Re-tags an existing membership with a new origin.
    pub async fn reassign_member(
        &self,
        group_id: i64,
        user_id: i64,
        component: &str,
        item_id: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE group_members SET component = ?3, item_id = ?4 WHERE group_id = ?1 AND user_id = ?2",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(component)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
