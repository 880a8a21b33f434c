use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        CandidateExclusions, PostCatalog, RepoError, TrendingPost, TrendingSource, UserDirectory,
    },
    domain::{entities::PostSummary, interest::normalize_tag},
};

/// Stand-in for the platform's account, post and reaction stores.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    users: DashSet<Uuid>,
    posts: DashMap<Uuid, PostSummary>,
    reactions: DashMap<Uuid, Vec<OffsetDateTime>>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: Uuid) {
        self.users.insert(user_id);
    }

    pub fn remove_user(&self, user_id: Uuid) {
        self.users.remove(&user_id);
    }

    /// Register a post. Tags are normalised the same way interest tags are.
    pub fn add_post(
        &self,
        author_id: Uuid,
        tags: &[&str],
        created_at: OffsetDateTime,
    ) -> PostSummary {
        let post = PostSummary {
            id: Uuid::new_v4(),
            author_id,
            tags: tags.iter().filter_map(|tag| normalize_tag(tag)).collect(),
            created_at,
        };
        self.posts.insert(post.id, post.clone());
        post
    }

    pub fn add_reaction(&self, post_id: Uuid, at: OffsetDateTime) {
        self.reactions.entry(post_id).or_default().push(at);
    }

    fn newest_first(mut posts: Vec<PostSummary>, limit: u32) -> Vec<PostSummary> {
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        posts.truncate(limit as usize);
        posts
    }

    /// Reaction counts inside the window for posts created inside it.
    fn window_counts(&self, since: OffsetDateTime) -> HashMap<Uuid, usize> {
        self.reactions
            .iter()
            .filter(|reactions| {
                self.posts
                    .get(reactions.key())
                    .is_some_and(|post| post.created_at >= since)
            })
            .map(|reactions| {
                let count = reactions.iter().filter(|at| **at >= since).count();
                (*reactions.key(), count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

#[async_trait]
impl UserDirectory for InMemoryPlatform {
    async fn user_exists(&self, user_id: Uuid) -> Result<bool, RepoError> {
        Ok(self.users.contains(&user_id))
    }
}

#[async_trait]
impl PostCatalog for InMemoryPlatform {
    async fn find_post(&self, post_id: Uuid) -> Result<Option<PostSummary>, RepoError> {
        Ok(self.posts.get(&post_id).map(|post| post.clone()))
    }

    async fn recent_by_authors(
        &self,
        author_ids: &[Uuid],
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PostSummary>, RepoError> {
        let authors: HashSet<&Uuid> = author_ids.iter().collect();
        let posts = self
            .posts
            .iter()
            .filter(|post| authors.contains(&post.author_id) && post.created_at >= since)
            .map(|post| post.clone())
            .collect();
        Ok(Self::newest_first(posts, limit))
    }

    async fn posts_by_tag_overlap(
        &self,
        tags: &[String],
        exclusions: &CandidateExclusions,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PostSummary>, RepoError> {
        let mut matched: Vec<(usize, PostSummary)> = self
            .posts
            .iter()
            .filter(|post| post.created_at >= since && exclusions.admits(post))
            .filter_map(|post| {
                let overlap = tags.iter().filter(|tag| post.tags.contains(tag)).count();
                (overlap > 0).then(|| (overlap, post.clone()))
            })
            .collect();
        matched.sort_by(|(a_overlap, a), (b_overlap, b)| {
            b_overlap
                .cmp(a_overlap)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        matched.truncate(limit as usize);
        Ok(matched.into_iter().map(|(_, post)| post).collect())
    }
}

#[async_trait]
impl TrendingSource for InMemoryPlatform {
    async fn trending(
        &self,
        since: OffsetDateTime,
        exclusions: &CandidateExclusions,
        limit: u32,
    ) -> Result<Vec<TrendingPost>, RepoError> {
        let counts = self.window_counts(since);
        let Some(max) = counts.values().copied().max() else {
            return Ok(Vec::new());
        };
        let mut trending: Vec<TrendingPost> = counts
            .into_iter()
            .filter_map(|(post_id, count)| {
                let post = self.posts.get(&post_id)?.clone();
                if !exclusions.admits(&post) {
                    return None;
                }
                Some(TrendingPost {
                    post,
                    score: count as f64 / max as f64,
                })
            })
            .collect();
        trending.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.post.created_at.cmp(&a.post.created_at))
                .then_with(|| a.post.id.cmp(&b.post.id))
        });
        trending.truncate(limit as usize);
        Ok(trending)
    }

    async fn scores_for(
        &self,
        post_ids: &[Uuid],
        since: OffsetDateTime,
    ) -> Result<HashMap<Uuid, f64>, RepoError> {
        let counts = self.window_counts(since);
        let max = counts.values().copied().max().unwrap_or(0);
        if max == 0 {
            return Ok(HashMap::new());
        }
        Ok(post_ids
            .iter()
            .filter_map(|id| counts.get(id).map(|count| (*id, *count as f64 / max as f64)))
            .collect())
    }
}
