//! Snapshot Repository
//!
//! PostgreSQL implementation of the snapshot store. Every listing is ordered
//! `(created_at DESC, id DESC)`, the same order the global index keeps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_cache::{
    AuthorSummary, ContentSnapshot, PostType, SnapshotStats, SnapshotStore, StoreError,
    StoreResult, ThreadFilter,
};
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::error;

const SNAPSHOT_SELECT: &str = r#"
    SELECT
        t.id,
        t.content,
        t.post_type,
        t.media_url,
        t.created_at,
        u.id AS author_id,
        u.username AS author_username,
        u.avatar_url AS author_avatar_url,
        (SELECT COUNT(*) FROM likes l WHERE l.thread_id = t.id) AS likes,
        (SELECT COUNT(*) FROM comments c WHERE c.thread_id = t.id) AS comments
    FROM threads t
    JOIN users u ON u.id = t.author_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: String,
    content: String,
    post_type: String,
    media_url: Option<String>,
    created_at: DateTime<Utc>,
    author_id: String,
    author_username: String,
    author_avatar_url: Option<String>,
    likes: i64,
    comments: i64,
}

impl From<SnapshotRow> for ContentSnapshot {
    fn from(row: SnapshotRow) -> Self {
        ContentSnapshot {
            id: row.id,
            content: row.content,
            post_type: parse_post_type(&row.post_type),
            media_url: row.media_url,
            created_at: row.created_at,
            author: AuthorSummary {
                id: row.author_id,
                username: row.author_username,
                avatar_url: row.author_avatar_url,
            },
            stats: SnapshotStats {
                likes: row.likes,
                comments: row.comments,
            },
        }
    }
}

fn parse_post_type(raw: &str) -> PostType {
    match raw {
        "DEBATABLE" => PostType::Debatable,
        "CLAIM" => PostType::Claim,
        _ => PostType::Normal,
    }
}

/// Connection-level failures are reported as unavailability, the rest as
/// backend errors.
fn store_error(op: &str, e: sqlx::Error) -> StoreError {
    error!("Snapshot store {} failed: {}", op, e);
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Backend(Box::new(other)),
    }
}

pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn recent(&self, offset: usize, limit: usize) -> StoreResult<Vec<ContentSnapshot>> {
        let sql = format!(
            "{} ORDER BY t.created_at DESC, t.id DESC OFFSET $1 LIMIT $2",
            SNAPSHOT_SELECT
        );
        let rows = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(offset as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("recent", e))?;

        Ok(rows.into_iter().map(ContentSnapshot::from).collect())
    }

    async fn recent_by_authors(
        &self,
        author_ids: &[String],
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ContentSnapshot>> {
        if author_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Rows strictly after the cursor thread; an unknown cursor yields nothing
        let sql = format!(
            r#"{}
            WHERE t.author_id = ANY($1)
              AND (
                $2::TEXT IS NULL
                OR (t.created_at, t.id) < (SELECT c.created_at, c.id FROM threads c WHERE c.id = $2)
              )
            ORDER BY t.created_at DESC, t.id DESC
            LIMIT $3"#,
            SNAPSHOT_SELECT
        );
        let rows = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(author_ids)
            .bind(cursor)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("recent_by_authors", e))?;

        Ok(rows.into_iter().map(ContentSnapshot::from).collect())
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> StoreResult<Vec<ContentSnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("{} WHERE t.id = ANY($1)", SNAPSHOT_SELECT);
        let rows = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("fetch_by_ids", e))?;

        Ok(rows.into_iter().map(ContentSnapshot::from).collect())
    }

    async fn fetch_one(&self, id: &str) -> StoreResult<Option<ContentSnapshot>> {
        let sql = format!("{} WHERE t.id = $1", SNAPSHOT_SELECT);
        let row = sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("fetch_one", e))?;

        Ok(row.map(ContentSnapshot::from))
    }

    async fn count(&self, filter: &ThreadFilter) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM threads
            WHERE ($1::TEXT[] IS NULL OR author_id = ANY($1))
            "#,
        )
        .bind(filter.author_ids.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("count", e))?;

        Ok(count.max(0) as u64)
    }

    async fn following_ids(&self, actor_id: &str) -> StoreResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT following_id
            FROM follows
            WHERE follower_id = $1
            ORDER BY following_id
            "#,
        )
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("following_ids", e))
    }

    async fn follower_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT follower_id
            FROM follows
            WHERE following_id = $1
            ORDER BY follower_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("follower_ids", e))
    }

    async fn liked_ids(&self, actor_id: &str, thread_ids: &[String]) -> StoreResult<HashSet<String>> {
        if thread_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT thread_id
            FROM likes
            WHERE user_id = $1 AND thread_id = ANY($2)
            "#,
        )
        .bind(actor_id)
        .bind(thread_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("liked_ids", e))?;

        Ok(ids.into_iter().collect())
    }
}
