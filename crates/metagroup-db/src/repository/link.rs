//! # Link Repository
//!
//! The Link Store: one row per link, keyed by the id of the link's own
//! enrolment instance.
//!
//! ## Row Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              links                                      │
//! │                                                                         │
//! │  id ─────────────► enrol_instances.id (method = 'metagroup')            │
//! │                     deleting the instance deletes the link              │
//! │                                                                         │
//! │  target (course, group)     ◄── receives members                        │
//! │  source (course, group)     ◄── as configured                           │
//! │  root   (course, group)     ◄── resolved cache, NULL until resolved     │
//! │  *_name                     ◄── display caches                          │
//! │  source_courses             ◄── '{"source_courses":[1,4,10]}' or ''     │
//! │  status / sync_mode / role_id / root_fallback / frozen_at               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Store Boundary
//! `LinkRow` is the only place that knows the column encoding. Everything
//! above this module sees a typed [`Link`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use metagroup_core::{InstanceStatus, Link, LinkStatus, NewLink, RootSource, SyncMode, LINK_METHOD};

/// Column list shared by every `SELECT` (the table is always aliased `l`).
const LINK_COLUMNS: &str = r#"
    l.id, l.target_course_id, l.target_group_id,
    l.source_course_id, l.source_group_id,
    l.root_course_id, l.root_group_id,
    l.source_group_name, l.root_course_name, l.root_group_name,
    l.source_courses, l.status, l.sync_mode, l.role_id, l.root_fallback,
    l.frozen_at, l.created_at, l.updated_at
"#;

// =============================================================================
// Row Conversion
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct LinkRow {
    id: i64,
    target_course_id: i64,
    target_group_id: i64,
    source_course_id: i64,
    source_group_id: i64,
    root_course_id: Option<i64>,
    root_group_id: Option<i64>,
    source_group_name: Option<String>,
    root_course_name: Option<String>,
    root_group_name: Option<String>,
    source_courses: String,
    status: LinkStatus,
    sync_mode: SyncMode,
    role_id: Option<i64>,
    root_fallback: bool,
    frozen_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// JSON document stored in `links.source_courses`.
#[derive(Debug, Serialize, Deserialize)]
struct SourceCoursesDoc {
    source_courses: Vec<i64>,
}

fn encode_source_courses(courses: &[i64]) -> DbResult<String> {
    if courses.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(&SourceCoursesDoc {
        source_courses: courses.to_vec(),
    })
    .map_err(|e| DbError::Internal(format!("Failed to encode source courses: {}", e)))
}

fn decode_source_courses(link_id: i64, raw: &str) -> DbResult<Vec<i64>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<SourceCoursesDoc>(raw)
        .map(|doc| doc.source_courses)
        .map_err(|e| DbError::corrupt("links", link_id, e))
}

impl TryFrom<LinkRow> for Link {
    type Error = DbError;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        let source_courses = decode_source_courses(row.id, &row.source_courses)?;
        Ok(Link {
            id: row.id,
            target_course_id: row.target_course_id,
            target_group_id: row.target_group_id,
            source_course_id: row.source_course_id,
            source_group_id: row.source_group_id,
            root_course_id: row.root_course_id,
            root_group_id: row.root_group_id,
            source_group_name: row.source_group_name,
            root_course_name: row.root_course_name,
            root_group_name: row.root_group_name,
            source_courses,
            status: row.status,
            sync_mode: row.sync_mode,
            role_id: row.role_id,
            root_fallback: row.root_fallback,
            frozen_at: row.frozen_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_links(rows: Vec<LinkRow>) -> DbResult<Vec<Link>> {
    rows.into_iter().map(Link::try_from).collect()
}

// =============================================================================
// Filters
// =============================================================================

/// Filter for [`LinkRepository::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub target_course_id: Option<i64>,
    pub source_course_id: Option<i64>,
    pub status: Option<LinkStatus>,
}

impl LinkFilter {
    /// Links whose target is the given course, or every link.
    pub fn scope(course_id: Option<i64>) -> Self {
        LinkFilter {
            target_course_id: course_id,
            ..Default::default()
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for links.
#[derive(Debug, Clone)]
pub struct LinkRepository {
    pool: SqlitePool,
}

impl LinkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LinkRepository { pool }
    }

    /// Inserts a link together with its enrolment instance.
    ///
    /// ## Transaction
    /// ```text
    /// BEGIN
    ///   INSERT enrol_instances (target course, 'metagroup', status) → id
    ///   INSERT links (id, ...)
    /// COMMIT
    /// ```
    /// Either both rows exist afterwards or neither does.
    pub async fn insert(&self, new: &NewLink) -> DbResult<Link> {
        let now = Utc::now();
        let source_courses = encode_source_courses(&new.source_courses)?;
        let root = new.root.as_ref();

        let mut tx = self.pool.begin().await?;

        let instance = sqlx::query(
            "INSERT INTO enrol_instances (course_id, method, status, parent_course_id) VALUES (?1, ?2, ?3, NULL)",
        )
        .bind(new.target_course_id)
        .bind(LINK_METHOD)
        .bind(InstanceStatus::from(new.status).code())
        .execute(&mut *tx)
        .await?;
        let id = instance.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO links (
                id, target_course_id, target_group_id, source_course_id, source_group_id,
                root_course_id, root_group_id, source_group_name, root_course_name, root_group_name,
                source_courses, status, sync_mode, role_id, root_fallback, frozen_at,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, NULL, ?16, ?16)
            "#,
        )
        .bind(id)
        .bind(new.target_course_id)
        .bind(new.target_group_id)
        .bind(new.source_course_id)
        .bind(new.source_group_id)
        .bind(root.map(|r| r.course_id))
        .bind(root.and_then(|r| r.group_id))
        .bind(&new.source_group_name)
        .bind(root.map(|r| r.course_name.clone()))
        .bind(root.and_then(|r| r.group_name.clone()))
        .bind(&source_courses)
        .bind(new.status)
        .bind(new.sync_mode)
        .bind(new.role_id)
        .bind(new.root_fallback)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            link_id = id,
            target_course_id = new.target_course_id,
            target_group_id = new.target_group_id,
            source_course_id = new.source_course_id,
            source_group_id = new.source_group_id,
            status = %new.status,
            "Link created"
        );

        self.require(id).await
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Link>> {
        let sql = format!("SELECT {} FROM links l WHERE l.id = ?1", LINK_COLUMNS);
        let row = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Link::try_from).transpose()
    }

    /// Like [`get`](Self::get) but a missing link is an error.
    pub async fn require(&self, id: i64) -> DbResult<Link> {
        self.get(id).await?.ok_or_else(|| DbError::not_found("Link", id))
    }

    /// Writes every mutable field of a link back to the store.
    pub async fn update(&self, link: &Link) -> DbResult<Link> {
        let source_courses = encode_source_courses(&link.source_courses)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE links SET
                target_group_id = ?2,
                source_course_id = ?3,
                source_group_id = ?4,
                root_course_id = ?5,
                root_group_id = ?6,
                source_group_name = ?7,
                root_course_name = ?8,
                root_group_name = ?9,
                source_courses = ?10,
                status = ?11,
                sync_mode = ?12,
                role_id = ?13,
                root_fallback = ?14,
                frozen_at = ?15,
                updated_at = ?16
            WHERE id = ?1
            "#,
        )
        .bind(link.id)
        .bind(link.target_group_id)
        .bind(link.source_course_id)
        .bind(link.source_group_id)
        .bind(link.root_course_id)
        .bind(link.root_group_id)
        .bind(&link.source_group_name)
        .bind(&link.root_course_name)
        .bind(&link.root_group_name)
        .bind(&source_courses)
        .bind(link.status)
        .bind(link.sync_mode)
        .bind(link.role_id)
        .bind(link.root_fallback)
        .bind(link.frozen_at)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Link", link.id));
        }

        sqlx::query("UPDATE enrol_instances SET status = ?2 WHERE id = ?1")
            .bind(link.id)
            .bind(InstanceStatus::from(link.status).code())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(link_id = link.id, "Link updated");
        self.require(link.id).await
    }

    /// Changes the lifecycle status and mirrors it onto the link's instance.
    pub async fn set_status(&self, id: i64, status: LinkStatus) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE links SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Link", id));
        }

        sqlx::query("UPDATE enrol_instances SET status = ?2 WHERE id = ?1")
            .bind(id)
            .bind(InstanceStatus::from(status).code())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(link_id = id, %status, "Link status changed");
        Ok(())
    }

    pub async fn set_target_group(&self, id: i64, group_id: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE links SET target_group_id = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(group_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Link", id));
        }
        debug!(link_id = id, group_id, "Link target group changed");
        Ok(())
    }

    pub async fn set_source_courses(&self, id: i64, courses: &[i64]) -> DbResult<()> {
        let encoded = encode_source_courses(courses)?;
        let result = sqlx::query("UPDATE links SET source_courses = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(&encoded)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Link", id));
        }
        debug!(link_id = id, ?courses, "Link source courses stored");
        Ok(())
    }

    /// Stores a resolved root and its display caches.
    pub async fn set_root(&self, id: i64, root: &RootSource, root_fallback: bool) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE links SET
                root_course_id = ?2,
                root_group_id = ?3,
                root_course_name = ?4,
                root_group_name = ?5,
                root_fallback = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(root.course_id)
        .bind(root.group_id)
        .bind(&root.course_name)
        .bind(&root.group_name)
        .bind(root_fallback)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Link", id));
        }
        debug!(link_id = id, root_course_id = root.course_id, root_group_id = ?root.group_id, root_fallback, "Link root stored");
        Ok(())
    }

    pub async fn set_frozen(&self, id: i64, frozen_at: Option<DateTime<Utc>>) -> DbResult<()> {
        let result = sqlx::query("UPDATE links SET frozen_at = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(frozen_at)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Link", id));
        }
        Ok(())
    }

    /// Finds the link for a (target course, source course, source group)
    /// triple, optionally also matching the target group. Lowest id wins.
    pub async fn find(
        &self,
        target_course_id: i64,
        source_course_id: i64,
        source_group_id: i64,
        target_group_id: Option<i64>,
    ) -> DbResult<Option<Link>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM links l
            WHERE l.target_course_id = ?1
              AND l.source_course_id = ?2
              AND l.source_group_id = ?3
              AND (?4 IS NULL OR l.target_group_id = ?4)
            ORDER BY l.id
            LIMIT 1
            "#,
            LINK_COLUMNS
        );
        let row = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(target_course_id)
            .bind(source_course_id)
            .bind(source_group_id)
            .bind(target_group_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Link::try_from).transpose()
    }

    /// Deletes a link by deleting its enrolment instance. Enrolments through
    /// the instance go with it; memberships and roles tagged with the link
    /// must be unwound by the caller first.
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM enrol_instances WHERE id = ?1 AND method = ?2")
            .bind(id)
            .bind(LINK_METHOD)
            .execute(&self.pool)
            .await?;

        info!(link_id = id, deleted = result.rows_affected(), "Link deleted");
        Ok(result.rows_affected() > 0)
    }

    /// Links matching the filter, ordered by id.
    pub async fn list(&self, filter: &LinkFilter) -> DbResult<Vec<Link>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM links l WHERE 1 = 1", LINK_COLUMNS));
        if let Some(course_id) = filter.target_course_id {
            builder.push(" AND l.target_course_id = ").push_bind(course_id);
        }
        if let Some(course_id) = filter.source_course_id {
            builder.push(" AND l.source_course_id = ").push_bind(course_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND l.status = ").push_bind(status);
        }
        builder.push(" ORDER BY l.id");

        let rows = builder.build_query_as::<LinkRow>().fetch_all(&self.pool).await?;
        into_links(rows)
    }

    pub async fn list_all(&self) -> DbResult<Vec<Link>> {
        self.list(&LinkFilter::default()).await
    }

    /// Links targeting the given course, or every link.
    pub async fn list_in_scope(&self, course_id: Option<i64>) -> DbResult<Vec<Link>> {
        self.list(&LinkFilter::scope(course_id)).await
    }

    /// Links reading from a course, either as logical source or as root.
    pub async fn list_sourced_from_course(&self, course_id: i64) -> DbResult<Vec<Link>> {
        let sql = format!(
            "SELECT {} FROM links l WHERE l.source_course_id = ?1 OR l.root_course_id = ?1 ORDER BY l.id",
            LINK_COLUMNS
        );
        let rows = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await?;
        into_links(rows)
    }

    /// Links reading from a group, either as logical source or as root.
    pub async fn list_sourced_from_group(&self, group_id: i64) -> DbResult<Vec<Link>> {
        let sql = format!(
            "SELECT {} FROM links l WHERE l.source_group_id = ?1 OR l.root_group_id = ?1 ORDER BY l.id",
            LINK_COLUMNS
        );
        let rows = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
        into_links(rows)
    }

    /// Links writing into one target group, any status.
    pub async fn list_targeting(&self, course_id: i64, group_id: i64) -> DbResult<Vec<Link>> {
        let sql = format!(
            "SELECT {} FROM links l WHERE l.target_course_id = ?1 AND l.target_group_id = ?2 ORDER BY l.id",
            LINK_COLUMNS
        );
        let rows = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(course_id)
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
        into_links(rows)
    }

    /// True if any link writes into the group.
    pub async fn is_target_group(&self, group_id: i64) -> DbResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM links WHERE target_group_id = ?1 LIMIT 1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Links whose source no longer exists.
    ///
    /// A link is lost when its logical source course, its resolved source
    /// course or its resolved source group has been deleted.
    pub async fn list_lost(&self, course_id: Option<i64>) -> DbResult<Vec<Link>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM links l
            WHERE (?1 IS NULL OR l.target_course_id = ?1)
              AND (
                NOT EXISTS (SELECT 1 FROM courses c WHERE c.id = l.source_course_id)
                OR NOT EXISTS (SELECT 1 FROM courses c WHERE c.id = COALESCE(l.root_course_id, l.source_course_id))
                OR NOT EXISTS (SELECT 1 FROM course_groups g WHERE g.id = COALESCE(l.root_group_id, l.source_group_id))
              )
            ORDER BY l.id
            "#,
            LINK_COLUMNS
        );
        let rows = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await?;
        into_links(rows)
    }

    /// Links whose source-course cache was never computed.
    pub async fn list_missing_source_courses(&self, limit: usize) -> DbResult<Vec<Link>> {
        let sql = format!(
            "SELECT {} FROM links l WHERE l.source_courses = '' ORDER BY l.id LIMIT ?1",
            LINK_COLUMNS
        );
        let rows = sqlx::query_as::<_, LinkRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        into_links(rows)
    }

    /// Distinct target courses, ascending.
    pub async fn target_courses(&self) -> DbResult<Vec<i64>> {
        let courses: Vec<i64> =
            sqlx::query_scalar("SELECT DISTINCT target_course_id FROM links ORDER BY target_course_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(courses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn setup() -> (Database, i64, i64, i64, i64) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let source = db.courses().insert("SRC", "Source").await.unwrap();
        let target = db.courses().insert("TGT", "Target").await.unwrap();
        let source_group = db.groups().create(source, "Team").await.unwrap();
        let target_group = db.groups().create(target, "Team (linked)").await.unwrap();
        (db, source, target, source_group, target_group)
    }

    fn new_link(source: i64, target: i64, source_group: i64, target_group: i64) -> NewLink {
        NewLink {
            target_course_id: target,
            target_group_id: target_group,
            source_course_id: source,
            source_group_id: source_group,
            source_group_name: Some("Team".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_creates_instance_with_same_id() {
        let (db, source, target, sg, tg) = setup().await;

        let link = db.links().insert(&new_link(source, target, sg, tg)).await.unwrap();
        assert_eq!(link.status, LinkStatus::Enabled);
        assert!(link.source_courses.is_empty());
        assert!(link.root_course_id.is_none());

        let instance = db.enrolments().get_instance(link.id).await.unwrap().unwrap();
        assert_eq!(instance.method, LINK_METHOD);
        assert_eq!(instance.course_id, target);
        assert_eq!(instance.status, InstanceStatus::Enabled);
    }

    #[tokio::test]
    async fn test_self_loop_rejected_by_store() {
        let (db, source, _target, sg, _tg) = setup().await;
        let result = db.links().insert(&new_link(source, source, sg, sg)).await;
        assert!(result.is_err());
        // No orphan instance left behind.
        assert!(db.enrolments().get_instance(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_mirrors_onto_instance() {
        let (db, source, target, sg, tg) = setup().await;
        let links = db.links();
        let link = links
            .insert(&NewLink {
                status: LinkStatus::DisabledPendingInitialSync,
                ..new_link(source, target, sg, tg)
            })
            .await
            .unwrap();

        let instance = db.enrolments().get_instance(link.id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Disabled);

        links.set_status(link.id, LinkStatus::Enabled).await.unwrap();
        let instance = db.enrolments().get_instance(link.id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Enabled);
        assert!(links.set_status(999, LinkStatus::Enabled).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_caches_round_trip() {
        let (db, source, target, sg, tg) = setup().await;
        let links = db.links();
        let link = links.insert(&new_link(source, target, sg, tg)).await.unwrap();

        links.set_source_courses(link.id, &[3, source]).await.unwrap();
        links
            .set_root(
                link.id,
                &RootSource {
                    course_id: source,
                    group_id: Some(sg),
                    course_name: "SRC".to_string(),
                    group_name: Some("Team".to_string()),
                },
                true,
            )
            .await
            .unwrap();
        let frozen = Utc::now();
        links.set_frozen(link.id, Some(frozen)).await.unwrap();

        let stored = links.require(link.id).await.unwrap();
        assert_eq!(stored.source_courses, vec![3, source]);
        assert_eq!(stored.root_course_id, Some(source));
        assert_eq!(stored.root_group_name.as_deref(), Some("Team"));
        assert!(stored.root_fallback);
        assert!(stored.is_frozen());

        assert!(links.list_missing_source_courses(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_source_courses_reported() {
        let (db, source, target, sg, tg) = setup().await;
        let link = db.links().insert(&new_link(source, target, sg, tg)).await.unwrap();

        sqlx::query("UPDATE links SET source_courses = 'not json' WHERE id = ?1")
            .bind(link.id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.links().get(link.id).await.unwrap_err();
        assert!(matches!(err, DbError::CorruptRow { .. }));
    }

    #[tokio::test]
    async fn test_find_and_listings() {
        let (db, source, target, sg, tg) = setup().await;
        let links = db.links();
        let link = links.insert(&new_link(source, target, sg, tg)).await.unwrap();

        assert_eq!(links.find(target, source, sg, None).await.unwrap().unwrap().id, link.id);
        assert!(links.find(target, source, sg, Some(tg + 100)).await.unwrap().is_none());

        assert_eq!(links.list_in_scope(Some(target)).await.unwrap().len(), 1);
        assert!(links.list_in_scope(Some(source)).await.unwrap().is_empty());
        assert_eq!(links.list_sourced_from_course(source).await.unwrap().len(), 1);
        assert_eq!(links.list_sourced_from_group(sg).await.unwrap().len(), 1);
        assert_eq!(links.list_targeting(target, tg).await.unwrap().len(), 1);
        assert!(links.is_target_group(tg).await.unwrap());
        assert_eq!(links.target_courses().await.unwrap(), vec![target]);

        let disabled = LinkFilter {
            status: Some(LinkStatus::Disabled),
            ..Default::default()
        };
        assert!(links.list(&disabled).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lost_links_follow_source_deletion() {
        let (db, source, target, sg, tg) = setup().await;
        let links = db.links();
        let link = links.insert(&new_link(source, target, sg, tg)).await.unwrap();

        assert!(links.list_lost(None).await.unwrap().is_empty());

        db.groups().delete(sg).await.unwrap();
        assert_eq!(links.list_lost(Some(target)).await.unwrap()[0].id, link.id);
        assert!(links.list_lost(Some(source)).await.unwrap().is_empty());

        db.courses().delete(source).await.unwrap();
        assert_eq!(links.list_lost(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_instance_and_enrolments() {
        let (db, source, target, sg, tg) = setup().await;
        let link = db.links().insert(&new_link(source, target, sg, tg)).await.unwrap();
        db.enrolments()
            .enrol(link.id, 1, None, 0, 0, metagroup_core::EnrolStatus::Active)
            .await
            .unwrap();

        assert!(db.links().delete(link.id).await.unwrap());
        assert!(db.links().get(link.id).await.unwrap().is_none());
        assert!(db.enrolments().get(link.id, 1).await.unwrap().is_none());
        assert!(!db.links().delete(link.id).await.unwrap());
    }
}
