use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    application::repos::{InterestRepo, RepoError},
    domain::{entities::InterestEntryRecord, interest::DecayPolicy, types::SignalSource},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct InterestRow {
    user_id: Uuid,
    tag: String,
    source: String,
    score: f64,
    updated_at: OffsetDateTime,
}

impl TryFrom<InterestRow> for InterestEntryRecord {
    type Error = RepoError;

    fn try_from(row: InterestRow) -> Result<Self, Self::Error> {
        let source = SignalSource::try_from(row.source.as_str()).map_err(|_| {
            RepoError::integrity(format!("unknown signal source `{}`", row.source))
        })?;
        Ok(Self {
            user_id: row.user_id,
            tag: row.tag,
            score: row.score,
            source,
            updated_at: row.updated_at,
        })
    }
}

fn half_life_seconds(half_life: Option<Duration>) -> Option<f64> {
    half_life.map(|d| d.as_seconds_f64()).filter(|secs| *secs > 0.0)
}

#[async_trait]
impl InterestRepo for PostgresRepositories {
    async fn merge_signal(
        &self,
        user_id: Uuid,
        tag: &str,
        source: SignalSource,
        weight: f64,
        half_life: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<InterestEntryRecord, RepoError> {
        // ON CONFLICT holds the row lock across decay and add. The exponent is
        // capped so power() cannot underflow.
        let row: InterestRow = sqlx::query_as(
            r#"
            INSERT INTO interest_entries (user_id, tag, source, score, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, tag, source) DO UPDATE SET
                score = interest_entries.score * COALESCE(
                    power(
                        0.5::float8,
                        LEAST(
                            GREATEST(
                                EXTRACT(EPOCH FROM (EXCLUDED.updated_at - interest_entries.updated_at))::float8,
                                0
                            ) / $6::float8,
                            1000
                        )
                    ),
                    1.0
                ) + EXCLUDED.score,
                updated_at = GREATEST(EXCLUDED.updated_at, interest_entries.updated_at)
            RETURNING user_id, tag, source, score, updated_at
            "#,
        )
        .bind(user_id)
        .bind(tag)
        .bind(source.as_str())
        .bind(weight)
        .bind(now)
        .bind(half_life_seconds(half_life))
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        row.try_into()
    }

    async fn list_entries(&self, user_id: Uuid) -> Result<Vec<InterestEntryRecord>, RepoError> {
        let rows: Vec<InterestRow> = sqlx::query_as(
            r#"
            SELECT user_id, tag, source, score, updated_at
            FROM interest_entries
            WHERE user_id = $1
            ORDER BY tag, source
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(InterestEntryRecord::try_from).collect()
    }

    async fn delete_decayed(
        &self,
        policy: &DecayPolicy,
        now: OffsetDateTime,
    ) -> Result<u64, RepoError> {
        let removed = sqlx::query(
            r#"
            DELETE FROM interest_entries
            WHERE score * COALESCE(
                power(
                    0.5::float8,
                    LEAST(
                        GREATEST(EXTRACT(EPOCH FROM ($1::timestamptz - updated_at))::float8, 0)
                            / CASE source
                                WHEN 'like' THEN $2::float8
                                WHEN 'post' THEN $3::float8
                                WHEN 'follow' THEN $4::float8
                                WHEN 'profile' THEN $5::float8
                              END,
                        1000
                    )
                ),
                1.0
            ) < $6
            "#,
        )
        .bind(now)
        .bind(half_life_seconds(policy.like))
        .bind(half_life_seconds(policy.post))
        .bind(half_life_seconds(policy.follow))
        .bind(half_life_seconds(policy.profile))
        .bind(policy.epsilon)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();
        Ok(removed)
    }

    async fn purge_user(&self, user_id: Uuid) -> Result<u64, RepoError> {
        let removed = sqlx::query("DELETE FROM interest_entries WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        Ok(removed)
    }
}
