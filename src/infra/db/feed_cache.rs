use std::collections::HashSet;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{FeedCacheRepo, InstallOutcome, RepoError},
    domain::{
        entities::{FeedCacheStateRecord, FeedEntryRecord},
        feed::compare_entries,
        types::FeedReason,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct StateRow {
    user_id: Uuid,
    version: i64,
    built_version: Option<i64>,
    last_refresh_at: Option<OffsetDateTime>,
}

impl From<StateRow> for FeedCacheStateRecord {
    fn from(row: StateRow) -> Self {
        Self {
            user_id: row.user_id,
            version: row.version.max(0) as u64,
            built_version: row.built_version.map(|v| v.max(0) as u64),
            last_refresh_at: row.last_refresh_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    user_id: Uuid,
    post_id: Uuid,
    score: f64,
    reason: String,
    post_created_at: OffsetDateTime,
    added_at: OffsetDateTime,
}

impl TryFrom<EntryRow> for FeedEntryRecord {
    type Error = RepoError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let reason = FeedReason::try_from(row.reason.as_str())
            .map_err(|_| RepoError::integrity(format!("unknown feed reason `{}`", row.reason)))?;
        Ok(Self {
            user_id: row.user_id,
            post_id: row.post_id,
            score: row.score,
            reason,
            post_created_at: row.post_created_at,
            added_at: row.added_at,
        })
    }
}

fn to_db_version(version: u64) -> Result<i64, RepoError> {
    i64::try_from(version).map_err(|_| RepoError::InvalidInput {
        message: format!("feed version {version} exceeds storage range"),
    })
}

#[async_trait]
impl FeedCacheRepo for PostgresRepositories {
    async fn load_state(&self, user_id: Uuid) -> Result<Option<FeedCacheStateRecord>, RepoError> {
        let row: Option<StateRow> = sqlx::query_as(
            r#"
            SELECT user_id, version, built_version, last_refresh_at
            FROM feed_cache_state
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(FeedCacheStateRecord::from))
    }

    async fn bump_version(&self, user_id: Uuid) -> Result<u64, RepoError> {
        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feed_cache_state (user_id, version)
            VALUES ($1, 1)
            ON CONFLICT (user_id) DO UPDATE SET version = feed_cache_state.version + 1
            RETURNING version
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(version.max(0) as u64)
    }

    async fn load_entries(&self, user_id: Uuid) -> Result<Vec<FeedEntryRecord>, RepoError> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT user_id, post_id, score, reason, post_created_at, added_at
            FROM feed_cache_entries
            WHERE user_id = $1
            ORDER BY score DESC, post_created_at DESC, post_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        let mut entries = rows
            .into_iter()
            .map(FeedEntryRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(compare_entries);
        Ok(entries)
    }

    async fn install(
        &self,
        user_id: Uuid,
        entries: Vec<FeedEntryRecord>,
        built_version: u64,
        refreshed_at: OffsetDateTime,
    ) -> Result<InstallOutcome, RepoError> {
        let built = to_db_version(built_version)?;
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "INSERT INTO feed_cache_state (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let installed: Option<i64> = sqlx::query_scalar(
            "SELECT built_version FROM feed_cache_state WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if let Some(installed_version) = installed.filter(|installed| *installed > built) {
            return Ok(InstallOutcome::Superseded {
                installed_version: installed_version as u64,
            });
        }

        sqlx::query("DELETE FROM feed_cache_entries WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut post_ids = Vec::with_capacity(entries.len());
        let mut scores = Vec::with_capacity(entries.len());
        let mut reasons = Vec::with_capacity(entries.len());
        let mut created = Vec::with_capacity(entries.len());
        let mut added = Vec::with_capacity(entries.len());
        for entry in &entries {
            post_ids.push(entry.post_id);
            scores.push(entry.score);
            reasons.push(entry.reason.as_str().to_string());
            created.push(entry.post_created_at);
            added.push(entry.added_at);
        }
        sqlx::query(
            r#"
            INSERT INTO feed_cache_entries
                (user_id, post_id, score, reason, post_created_at, added_at)
            SELECT $1, e.post_id, e.score, e.reason, e.post_created_at, e.added_at
            FROM UNNEST($2::uuid[], $3::float8[], $4::text[], $5::timestamptz[], $6::timestamptz[])
                AS e(post_id, score, reason, post_created_at, added_at)
            "#,
        )
        .bind(user_id)
        .bind(post_ids)
        .bind(scores)
        .bind(reasons)
        .bind(created)
        .bind(added)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            UPDATE feed_cache_state
            SET built_version = $2,
                last_refresh_at = $3,
                version = GREATEST(version, $2)
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(built)
        .bind(refreshed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(InstallOutcome::Installed)
    }

    async fn evict(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<u64, RepoError> {
        let removed =
            sqlx::query("DELETE FROM feed_cache_entries WHERE user_id = $1 AND post_id = ANY($2)")
                .bind(user_id)
                .bind(post_ids)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?
                .rows_affected();
        Ok(removed)
    }

    async fn record_seen(
        &self,
        user_id: Uuid,
        post_ids: &[Uuid],
        at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO feed_seen_posts (user_id, post_id, seen_at)
            SELECT $1, p.post_id, $3 FROM UNNEST($2::uuid[]) AS p(post_id)
            ON CONFLICT (user_id, post_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(post_ids)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn seen_posts(&self, user_id: Uuid) -> Result<HashSet<Uuid>, RepoError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT post_id FROM feed_seen_posts WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Ok(ids.into_iter().collect())
    }

    async fn purge_user(&self, user_id: Uuid) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        for sql in [
            "DELETE FROM feed_cache_entries WHERE user_id = $1",
            "DELETE FROM feed_seen_posts WHERE user_id = $1",
            "UPDATE feed_cache_state \
             SET version = version + 1, built_version = NULL, last_refresh_at = NULL \
             WHERE user_id = $1",
        ] {
            sqlx::query(sql)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}
