//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{EdgeKind, FeedReason, SignalSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocialEdgeRecord {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub kind: EdgeKind,
    pub created_at: OffsetDateTime,
}

/// Edge kinds between an ordered pair, seen from `user_id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub user_id: Uuid,
    pub target_id: Uuid,
    pub following: bool,
    pub followed_by: bool,
    pub blocking: bool,
    pub blocked_by: bool,
    pub muting: bool,
}

impl Relationship {
    pub fn empty(user_id: Uuid, target_id: Uuid) -> Self {
        Self {
            user_id,
            target_id,
            ..Default::default()
        }
    }

    pub fn is_blocked_either_way(&self) -> bool {
        self.blocking || self.blocked_by
    }
}

impl From<Relationship> for reverie_api_types::RelationshipResponse {
    fn from(rel: Relationship) -> Self {
        Self {
            user_id: rel.user_id,
            target_id: rel.target_id,
            following: rel.following,
            followed_by: rel.followed_by,
            blocking: rel.blocking,
            blocked_by: rel.blocked_by,
            muting: rel.muting,
        }
    }
}

/// One end of a follow edge, as listed on a followers/following page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub user_id: Uuid,
    pub since: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterestEntryRecord {
    pub user_id: Uuid,
    pub tag: String,
    pub score: f64,
    pub source: SignalSource,
    pub updated_at: OffsetDateTime,
}

/// Post metadata as exposed by the platform's post store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostSummary {
    pub id: Uuid,
    pub author_id: Uuid,
    pub tags: Vec<String>,
    pub created_at: OffsetDateTime,
}

/// An unscored feed candidate. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePost {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub tags: Vec<String>,
    pub created_at: OffsetDateTime,
    pub trending_score: f64,
    pub reason: FeedReason,
}

impl CandidatePost {
    pub fn from_summary(post: PostSummary, trending_score: f64, reason: FeedReason) -> Self {
        Self {
            post_id: post.id,
            author_id: post.author_id,
            tags: post.tags,
            created_at: post.created_at,
            trending_score,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntryRecord {
    pub user_id: Uuid,
    pub post_id: Uuid,
    pub score: f64,
    pub reason: FeedReason,
    pub post_created_at: OffsetDateTime,
    pub added_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedCacheStateRecord {
    pub user_id: Uuid,
    /// Bumped by every write that invalidates the cache.
    pub version: u64,
    /// Version observed when the installed entry set was generated.
    pub built_version: Option<u64>,
    pub last_refresh_at: Option<OffsetDateTime>,
}

impl FeedCacheStateRecord {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            version: 0,
            built_version: None,
            last_refresh_at: None,
        }
    }
}
