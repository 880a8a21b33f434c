//! Repository traits describing persistence adapters and platform collaborators.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::application::pagination::{ConnectionCursor, CursorPage, PageRequest, PaginationError};
use crate::domain::entities::{
    Connection, FeedCacheStateRecord, FeedEntryRecord, InterestEntryRecord, PostSummary,
    Relationship, SocialEdgeRecord,
};
use crate::domain::interest::DecayPolicy;
use crate::domain::types::{EdgeKind, SignalSource};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity violation: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// I/O failures a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Persistence(_) | RepoError::Timeout)
    }
}

/// Outcome of a follow insert performed under the pair's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowOutcome {
    Created(SocialEdgeRecord),
    AlreadyFollowing(Relationship),
    Blocked(Relationship),
}

/// Outcome of a block insert performed under the pair's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Created {
        edge: SocialEdgeRecord,
        removed_follows: u32,
    },
    AlreadyBlocked,
}

#[async_trait]
pub trait SocialGraphRepo: Send + Sync {
    async fn relationship(&self, user_id: Uuid, target_id: Uuid)
    -> Result<Relationship, RepoError>;

    /// Insert `source follows target` unless a follow already exists or a
    /// block exists in either direction. Atomic with respect to
    /// [`SocialGraphRepo::insert_block`] for the same pair.
    async fn insert_follow(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<FollowOutcome, RepoError>;

    /// Remove every follow edge between the pair, then insert the block edge,
    /// as one atomic step.
    async fn insert_block(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<BlockOutcome, RepoError>;

    /// Insert a mute edge. Returns false when it already existed.
    async fn insert_mute(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError>;

    /// Remove one edge. Returns false when no such edge existed.
    async fn remove_edge(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        kind: EdgeKind,
    ) -> Result<bool, RepoError>;

    async fn list_followers(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
    ) -> Result<CursorPage<Connection>, RepoError>;

    async fn list_following(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
    ) -> Result<CursorPage<Connection>, RepoError>;

    async fn following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError>;

    /// Authors hidden from `user_id`: those it blocks or mutes, and those
    /// blocking it.
    async fn excluded_authors(&self, user_id: Uuid) -> Result<HashSet<Uuid>, RepoError>;

    async fn edges_touching(&self, user_id: Uuid) -> Result<Vec<SocialEdgeRecord>, RepoError>;

    /// Delete every edge with `user_id` on either end. Returns the number removed.
    async fn purge_user(&self, user_id: Uuid) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait InterestRepo: Send + Sync {
    /// Read-modify-write of one `(user, tag, source)` row under row-level
    /// atomicity: `score = score * decay(now - updated_at) + weight`.
    async fn merge_signal(
        &self,
        user_id: Uuid,
        tag: &str,
        source: SignalSource,
        weight: f64,
        half_life: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<InterestEntryRecord, RepoError>;

    async fn list_entries(&self, user_id: Uuid) -> Result<Vec<InterestEntryRecord>, RepoError>;

    /// Physically delete rows whose decayed score is below the policy's epsilon.
    async fn delete_decayed(&self, policy: &DecayPolicy, now: OffsetDateTime)
    -> Result<u64, RepoError>;

    async fn purge_user(&self, user_id: Uuid) -> Result<u64, RepoError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// A result built from a newer version is already in place.
    Superseded { installed_version: u64 },
}

#[async_trait]
pub trait FeedCacheRepo: Send + Sync {
    async fn load_state(&self, user_id: Uuid) -> Result<Option<FeedCacheStateRecord>, RepoError>;

    /// Increment the cache version, creating the state row if needed.
    async fn bump_version(&self, user_id: Uuid) -> Result<u64, RepoError>;

    /// Entries in feed order.
    async fn load_entries(&self, user_id: Uuid) -> Result<Vec<FeedEntryRecord>, RepoError>;

    /// Replace the whole entry set in one step. Never installs a result
    /// built from an older version than the one already installed, and never
    /// leaves the version counter below `built_version`.
    async fn install(
        &self,
        user_id: Uuid,
        entries: Vec<FeedEntryRecord>,
        built_version: u64,
        refreshed_at: OffsetDateTime,
    ) -> Result<InstallOutcome, RepoError>;

    async fn evict(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<u64, RepoError>;

    async fn record_seen(
        &self,
        user_id: Uuid,
        post_ids: &[Uuid],
        at: OffsetDateTime,
    ) -> Result<(), RepoError>;

    async fn seen_posts(&self, user_id: Uuid) -> Result<HashSet<Uuid>, RepoError>;

    /// Drop entries, seen records and the installed build. The version
    /// counter survives and is bumped, so it never moves backwards.
    async fn purge_user(&self, user_id: Uuid) -> Result<(), RepoError>;
}

/// Account existence, owned by the platform's account system.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, user_id: Uuid) -> Result<bool, RepoError>;
}

/// Read access to the platform's post store.
#[async_trait]
pub trait PostCatalog: Send + Sync {
    async fn find_post(&self, post_id: Uuid) -> Result<Option<PostSummary>, RepoError>;

    /// Posts by any of `author_ids` created at or after `since`, newest first.
    async fn recent_by_authors(
        &self,
        author_ids: &[Uuid],
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PostSummary>, RepoError>;

    /// Posts carrying at least one of the normalised `tags`, created at or
    /// after `since`, ordered by the number of distinct matching tags, then
    /// newest first, then id. Excluded rows are skipped before `limit` applies.
    async fn posts_by_tag_overlap(
        &self,
        tags: &[String],
        exclusions: &CandidateExclusions,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PostSummary>, RepoError>;
}

/// Authors and posts a candidate query must skip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateExclusions {
    pub authors: HashSet<Uuid>,
    pub posts: HashSet<Uuid>,
}

impl CandidateExclusions {
    pub fn admits(&self, post: &PostSummary) -> bool {
        !self.authors.contains(&post.author_id) && !self.posts.contains(&post.id)
    }

    pub(crate) fn author_ids(&self) -> Vec<Uuid> {
        self.authors.iter().copied().collect()
    }

    pub(crate) fn post_ids(&self) -> Vec<Uuid> {
        self.posts.iter().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendingPost {
    pub post: PostSummary,
    /// Engagement velocity normalised to `[0, 1]`.
    pub score: f64,
}

/// Platform-wide engagement statistics.
#[async_trait]
pub trait TrendingSource: Send + Sync {
    /// Highest-velocity posts created at or after `since`, best first.
    /// Excluded rows are skipped before `limit` applies; scores stay
    /// normalised against the whole window.
    async fn trending(
        &self,
        since: OffsetDateTime,
        exclusions: &CandidateExclusions,
        limit: u32,
    ) -> Result<Vec<TrendingPost>, RepoError>;

    async fn scores_for(
        &self,
        post_ids: &[Uuid],
        since: OffsetDateTime,
    ) -> Result<HashMap<Uuid, f64>, RepoError>;
}
