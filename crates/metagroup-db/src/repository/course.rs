//! # Course Repository
//!
//! Course directory: existence checks and display names.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use metagroup_core::Course;

#[derive(Debug, sqlx::FromRow)]
struct CourseRow {
    id: i64,
    shortname: String,
    fullname: String,
}

impl From<CourseRow> for Course {
    fn from(row: CourseRow) -> Self {
        Course {
            id: row.id,
            shortname: row.shortname,
            fullname: row.fullname,
        }
    }
}

/// Repository for courses.
#[derive(Debug, Clone)]
pub struct CourseRepository {
    pool: SqlitePool,
}

impl CourseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CourseRepository { pool }
    }

    /// Creates a course and returns its id.
    pub async fn insert(&self, shortname: &str, fullname: &str) -> DbResult<i64> {
        let result = sqlx::query("INSERT INTO courses (shortname, fullname) VALUES (?1, ?2)")
            .bind(shortname)
            .bind(fullname)
            .execute(&self.pool)
            .await?;

        debug!(course_id = result.last_insert_rowid(), shortname, "Course created");
        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, course_id: i64) -> DbResult<Option<Course>> {
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, shortname, fullname FROM courses WHERE id = ?1",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Course::from))
    }

    /// Like [`get`](Self::get) but a missing course is an error.
    pub async fn require(&self, course_id: i64) -> DbResult<Course> {
        self.get(course_id)
            .await?
            .ok_or_else(|| DbError::not_found("Course", course_id))
    }

    pub async fn exists(&self, course_id: i64) -> DbResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM courses WHERE id = ?1")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    pub async fn list(&self) -> DbResult<Vec<Course>> {
        let rows = sqlx::query_as::<_, CourseRow>(
            "SELECT id, shortname, fullname FROM courses ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Course::from).collect())
    }

    /// Deletes a course. Groups, enrolment instances, enrolments, role
    /// assignments and links targeting it go with it. Links sourcing it
    /// become lost.
    pub async fn delete(&self, course_id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM courses WHERE id = ?1")
            .bind(course_id)
            .execute(&self.pool)
            .await?;

        debug!(course_id, deleted = result.rows_affected(), "Course deleted");
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_course_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let courses = db.courses();

        let id = courses.insert("BIO1", "Biology 1").await.unwrap();
        assert!(courses.exists(id).await.unwrap());

        let course = courses.require(id).await.unwrap();
        assert_eq!(course.display_name(), "BIO1");

        assert!(courses.delete(id).await.unwrap());
        assert!(!courses.exists(id).await.unwrap());
        assert!(courses.get(id).await.unwrap().is_none());
        assert!(courses.require(id).await.unwrap_err().is_not_found());
        assert!(!courses.delete(id).await.unwrap());
    }
}
