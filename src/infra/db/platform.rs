//! Read-only adapters over the platform's own tables:
//! `users(id)`, `posts(id, author_id, created_at)`, `post_tags(post_id, tag)`
//! and `post_reactions(post_id, user_id, created_at)`.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        CandidateExclusions, PostCatalog, RepoError, TrendingPost, TrendingSource, UserDirectory,
    },
    domain::{entities::PostSummary, interest::normalize_tag},
};

use super::{PostgresRepositories, map_sqlx_error};

const POST_SUMMARY_COLUMNS: &str = r#"
    p.id,
    p.author_id,
    p.created_at,
    COALESCE(
        array_agg(pt.tag ORDER BY pt.tag) FILTER (WHERE pt.tag IS NOT NULL),
        ARRAY[]::text[]
    ) AS tags
"#;

/// `normalize_tag` in SQL, over `post_tags m`.
const NORMALIZED_MATCH_TAG: &str = "lower(btrim(ltrim(btrim(m.tag), '#')))";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    author_id: Uuid,
    created_at: OffsetDateTime,
    tags: Vec<String>,
}

impl From<PostRow> for PostSummary {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            tags: row.tags.iter().filter_map(|tag| normalize_tag(tag)).collect(),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TrendingRow {
    id: Uuid,
    author_id: Uuid,
    created_at: OffsetDateTime,
    tags: Vec<String>,
    score: f64,
}

#[async_trait]
impl UserDirectory for PostgresRepositories {
    async fn user_exists(&self, user_id: Uuid) -> Result<bool, RepoError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl PostCatalog for PostgresRepositories {
    async fn find_post(&self, post_id: Uuid) -> Result<Option<PostSummary>, RepoError> {
        let sql = format!(
            "SELECT {POST_SUMMARY_COLUMNS} FROM posts p \
             LEFT JOIN post_tags pt ON pt.post_id = p.id \
             WHERE p.id = $1 GROUP BY p.id"
        );
        let row: Option<PostRow> = sqlx::query_as(&sql)
            .bind(post_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(PostSummary::from))
    }

    async fn recent_by_authors(
        &self,
        author_ids: &[Uuid],
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PostSummary>, RepoError> {
        let sql = format!(
            "SELECT {POST_SUMMARY_COLUMNS} FROM posts p \
             LEFT JOIN post_tags pt ON pt.post_id = p.id \
             WHERE p.author_id = ANY($1) AND p.created_at >= $2 \
             GROUP BY p.id \
             ORDER BY p.created_at DESC, p.id ASC \
             LIMIT $3"
        );
        let rows: Vec<PostRow> = sqlx::query_as(&sql)
            .bind(author_ids)
            .bind(since)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(PostSummary::from).collect())
    }

    async fn posts_by_tag_overlap(
        &self,
        tags: &[String],
        exclusions: &CandidateExclusions,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PostSummary>, RepoError> {
        let sql = format!(
            "WITH matched AS ( \
                 SELECT m.post_id, COUNT(DISTINCT {NORMALIZED_MATCH_TAG}) AS overlap \
                 FROM post_tags m \
                 INNER JOIN posts p ON p.id = m.post_id \
                 WHERE {NORMALIZED_MATCH_TAG} = ANY($1) \
                   AND p.created_at >= $2 \
                   AND NOT (p.author_id = ANY($3)) \
                   AND NOT (p.id = ANY($4)) \
                 GROUP BY m.post_id \
             ) \
             SELECT {POST_SUMMARY_COLUMNS} FROM matched mt \
             INNER JOIN posts p ON p.id = mt.post_id \
             LEFT JOIN post_tags pt ON pt.post_id = p.id \
             GROUP BY p.id, mt.overlap \
             ORDER BY mt.overlap DESC, p.created_at DESC, p.id ASC \
             LIMIT $5"
        );
        let rows: Vec<PostRow> = sqlx::query_as(&sql)
            .bind(tags)
            .bind(since)
            .bind(exclusions.author_ids())
            .bind(exclusions.post_ids())
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(PostSummary::from).collect())
    }
}

/// Reaction counts per post inside the window, divided by the window maximum.
const WINDOW_SCORES_CTE: &str = r#"
    WITH counts AS (
        SELECT r.post_id, COUNT(*)::float8 AS reactions
        FROM post_reactions r
        INNER JOIN posts p ON p.id = r.post_id
        WHERE r.created_at >= $1 AND p.created_at >= $1
        GROUP BY r.post_id
    ),
    scored AS (
        SELECT post_id, reactions / MAX(reactions) OVER () AS score
        FROM counts
    )
"#;

#[async_trait]
impl TrendingSource for PostgresRepositories {
    async fn trending(
        &self,
        since: OffsetDateTime,
        exclusions: &CandidateExclusions,
        limit: u32,
    ) -> Result<Vec<TrendingPost>, RepoError> {
        let sql = format!(
            "{WINDOW_SCORES_CTE} \
             SELECT {POST_SUMMARY_COLUMNS}, s.score \
             FROM scored s \
             INNER JOIN posts p ON p.id = s.post_id \
             LEFT JOIN post_tags pt ON pt.post_id = p.id \
             WHERE NOT (p.author_id = ANY($2)) AND NOT (p.id = ANY($3)) \
             GROUP BY p.id, s.score \
             ORDER BY s.score DESC, p.created_at DESC, p.id ASC \
             LIMIT $4"
        );
        let rows: Vec<TrendingRow> = sqlx::query_as(&sql)
            .bind(since)
            .bind(exclusions.author_ids())
            .bind(exclusions.post_ids())
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows
            .into_iter()
            .map(|row| TrendingPost {
                score: row.score,
                post: PostSummary::from(PostRow {
                    id: row.id,
                    author_id: row.author_id,
                    created_at: row.created_at,
                    tags: row.tags,
                }),
            })
            .collect())
    }

    async fn scores_for(
        &self,
        post_ids: &[Uuid],
        since: OffsetDateTime,
    ) -> Result<HashMap<Uuid, f64>, RepoError> {
        let sql = format!(
            "{WINDOW_SCORES_CTE} SELECT post_id, score FROM scored WHERE post_id = ANY($2)"
        );
        let rows: Vec<(Uuid, f64)> = sqlx::query_as(&sql)
            .bind(since)
            .bind(post_ids)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().collect())
    }
}
