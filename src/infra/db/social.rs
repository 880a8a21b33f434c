use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::{
        pagination::{ConnectionCursor, CursorPage, PageRequest},
        repos::{BlockOutcome, FollowOutcome, RepoError, SocialGraphRepo},
    },
    domain::{
        entities::{Connection, Relationship, SocialEdgeRecord},
        types::EdgeKind,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct EdgeRow {
    source_id: Uuid,
    target_id: Uuid,
    kind: String,
    created_at: OffsetDateTime,
}

impl TryFrom<EdgeRow> for SocialEdgeRecord {
    type Error = RepoError;

    fn try_from(row: EdgeRow) -> Result<Self, Self::Error> {
        let kind = EdgeKind::try_from(row.kind.as_str())
            .map_err(|_| RepoError::integrity(format!("unknown edge kind `{}`", row.kind)))?;
        Ok(Self {
            source_id: row.source_id,
            target_id: row.target_id,
            kind,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    user_id: Uuid,
    since: OffsetDateTime,
}

/// Advisory lock key shared by both orderings of a pair.
fn pair_lock_key(a: Uuid, b: Uuid) -> i64 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mixed = low.as_u128() ^ high.as_u128().rotate_left(64);
    ((mixed as u64) ^ ((mixed >> 64) as u64)) as i64
}

async fn lock_pair(
    tx: &mut Transaction<'_, Postgres>,
    a: Uuid,
    b: Uuid,
) -> Result<(), RepoError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(pair_lock_key(a, b))
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

async fn load_relationship<'e, E>(
    executor: E,
    user_id: Uuid,
    target_id: Uuid,
) -> Result<Relationship, RepoError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT source_id, kind
        FROM social_edges
        WHERE (source_id = $1 AND target_id = $2)
           OR (source_id = $2 AND target_id = $1)
        "#,
    )
    .bind(user_id)
    .bind(target_id)
    .fetch_all(executor)
    .await
    .map_err(map_sqlx_error)?;

    let mut rel = Relationship::empty(user_id, target_id);
    for (source_id, kind) in rows {
        let outgoing = source_id == user_id;
        match (EdgeKind::try_from(kind.as_str()), outgoing) {
            (Ok(EdgeKind::Follows), true) => rel.following = true,
            (Ok(EdgeKind::Follows), false) => rel.followed_by = true,
            (Ok(EdgeKind::Blocks), true) => rel.blocking = true,
            (Ok(EdgeKind::Blocks), false) => rel.blocked_by = true,
            (Ok(EdgeKind::Mutes), true) => rel.muting = true,
            (Ok(EdgeKind::Mutes), false) => {}
            (Err(()), _) => {
                return Err(RepoError::integrity(format!("unknown edge kind `{kind}`")));
            }
        }
    }
    Ok(rel)
}

async fn insert_edge(
    tx: &mut Transaction<'_, Postgres>,
    source_id: Uuid,
    target_id: Uuid,
    kind: EdgeKind,
    at: OffsetDateTime,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"
        INSERT INTO social_edges (source_id, target_id, kind, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(source_id)
    .bind(target_id)
    .bind(kind.as_str())
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

impl PostgresRepositories {
    async fn list_connections(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
        inbound: bool,
    ) -> Result<CursorPage<Connection>, RepoError> {
        let sql = if inbound {
            r#"
            SELECT source_id AS user_id, created_at AS since
            FROM social_edges
            WHERE target_id = $1
              AND kind = 'follows'
              AND ($2::timestamptz IS NULL OR created_at < $2 OR (created_at = $2 AND source_id > $3))
            ORDER BY created_at DESC, source_id ASC
            LIMIT $4
            "#
        } else {
            r#"
            SELECT target_id AS user_id, created_at AS since
            FROM social_edges
            WHERE source_id = $1
              AND kind = 'follows'
              AND ($2::timestamptz IS NULL OR created_at < $2 OR (created_at = $2 AND target_id > $3))
            ORDER BY created_at DESC, target_id ASC
            LIMIT $4
            "#
        };
        let rows: Vec<ConnectionRow> = sqlx::query_as(sql)
            .bind(user_id)
            .bind(page.cursor.map(|cursor| cursor.since()))
            .bind(page.cursor.map(|cursor| cursor.user_id()))
            .bind(i64::from(page.limit) + 1)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let rows = rows
            .into_iter()
            .map(|row| Connection {
                user_id: row.user_id,
                since: row.since,
            })
            .collect();
        Ok(CursorPage::from_overfetch(rows, page.limit))
    }
}

#[async_trait]
impl SocialGraphRepo for PostgresRepositories {
    async fn relationship(
        &self,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<Relationship, RepoError> {
        load_relationship(self.pool(), user_id, target_id).await
    }

    async fn insert_follow(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<FollowOutcome, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        lock_pair(&mut tx, source_id, target_id).await?;

        let existing = load_relationship(&mut *tx, source_id, target_id).await?;
        if existing.is_blocked_either_way() {
            return Ok(FollowOutcome::Blocked(existing));
        }
        if existing.following {
            return Ok(FollowOutcome::AlreadyFollowing(existing));
        }

        insert_edge(&mut tx, source_id, target_id, EdgeKind::Follows, at).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(FollowOutcome::Created(SocialEdgeRecord {
            source_id,
            target_id,
            kind: EdgeKind::Follows,
            created_at: at,
        }))
    }

    async fn insert_block(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<BlockOutcome, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        lock_pair(&mut tx, source_id, target_id).await?;

        let existing = load_relationship(&mut *tx, source_id, target_id).await?;
        if existing.blocking {
            return Ok(BlockOutcome::AlreadyBlocked);
        }

        let removed = sqlx::query(
            r#"
            DELETE FROM social_edges
            WHERE kind = 'follows'
              AND ((source_id = $1 AND target_id = $2) OR (source_id = $2 AND target_id = $1))
            "#,
        )
        .bind(source_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        insert_edge(&mut tx, source_id, target_id, EdgeKind::Blocks, at).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(BlockOutcome::Created {
            edge: SocialEdgeRecord {
                source_id,
                target_id,
                kind: EdgeKind::Blocks,
                created_at: at,
            },
            removed_follows: removed as u32,
        })
    }

    async fn insert_mute(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO social_edges (source_id, target_id, kind, created_at)
            VALUES ($1, $2, 'mutes', $3)
            ON CONFLICT (source_id, target_id, kind) DO NOTHING
            "#,
        )
        .bind(source_id)
        .bind(target_id)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn remove_edge(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        kind: EdgeKind,
    ) -> Result<bool, RepoError> {
        let removed = sqlx::query(
            "DELETE FROM social_edges WHERE source_id = $1 AND target_id = $2 AND kind = $3",
        )
        .bind(source_id)
        .bind(target_id)
        .bind(kind.as_str())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();
        Ok(removed > 0)
    }

    async fn list_followers(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
    ) -> Result<CursorPage<Connection>, RepoError> {
        self.list_connections(user_id, page, true).await
    }

    async fn list_following(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
    ) -> Result<CursorPage<Connection>, RepoError> {
        self.list_connections(user_id, page, false).await
    }

    async fn following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        sqlx::query_scalar(
            r#"
            SELECT target_id
            FROM social_edges
            WHERE source_id = $1 AND kind = 'follows'
            ORDER BY created_at DESC, target_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn excluded_authors(&self, user_id: Uuid) -> Result<HashSet<Uuid>, RepoError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT target_id FROM social_edges
            WHERE source_id = $1 AND kind IN ('blocks', 'mutes')
            UNION
            SELECT source_id FROM social_edges
            WHERE target_id = $1 AND kind = 'blocks'
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(ids.into_iter().collect())
    }

    async fn edges_touching(&self, user_id: Uuid) -> Result<Vec<SocialEdgeRecord>, RepoError> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT source_id, target_id, kind, created_at
            FROM social_edges
            WHERE source_id = $1 OR target_id = $1
            ORDER BY created_at, source_id, target_id, kind
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(SocialEdgeRecord::try_from).collect()
    }

    async fn purge_user(&self, user_id: Uuid) -> Result<u64, RepoError> {
        let removed = sqlx::query("DELETE FROM social_edges WHERE source_id = $1 OR target_id = $1")
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        Ok(removed)
    }
}
