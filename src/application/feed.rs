//! Feed orchestration: paged reads plus the write-side hooks that keep
//! interest profiles and cached feeds current.

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    application::{
        interests::{InterestProfileTracker, SignalError},
        pagination::{ConnectionCursor, PageRequest},
        repos::{PostCatalog, RepoError, SocialGraphRepo},
        social::{BlockReport, SocialGraphError, SocialGraphService},
    },
    cache::{FeedCache, FeedPage},
    domain::{
        entities::{PostSummary, SocialEdgeRecord},
        types::SignalSource,
    },
};

const METRIC_SIGNAL_FAILED: &str = "reverie_signal_failed_total";
const DEFAULT_FANOUT_BATCH: u32 = 500;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("page must be 1 or greater, got {page}")]
    InvalidPage { page: u32 },
    #[error("feed is not available yet, retry shortly")]
    ColdCacheUnavailable(#[source] RepoError),
    #[error(transparent)]
    Store(#[from] RepoError),
}

impl FeedError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::InvalidPage { .. } => false,
            FeedError::ColdCacheUnavailable(_) => true,
            FeedError::Store(err) => err.is_transient(),
        }
    }
}

/// What [`FeedOrchestrator::purge_user`] removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeReport {
    pub edges: u64,
    pub interest_entries: u64,
    pub caches_invalidated: u64,
}

#[derive(Clone)]
pub struct FeedOrchestrator {
    social: SocialGraphService,
    graph: Arc<dyn SocialGraphRepo>,
    interests: InterestProfileTracker,
    catalog: Arc<dyn PostCatalog>,
    cache: FeedCache,
    fanout_batch: u32,
}

impl FeedOrchestrator {
    pub fn new(
        social: SocialGraphService,
        graph: Arc<dyn SocialGraphRepo>,
        interests: InterestProfileTracker,
        catalog: Arc<dyn PostCatalog>,
        cache: FeedCache,
    ) -> Self {
        Self {
            social,
            graph,
            interests,
            catalog,
            cache,
            fanout_batch: DEFAULT_FANOUT_BATCH,
        }
    }

    /// Followers invalidated per page when a post fans out.
    pub fn with_fanout_batch(mut self, batch: u32) -> Self {
        self.fanout_batch = batch.max(1);
        self
    }

    pub fn social(&self) -> &SocialGraphService {
        &self.social
    }

    pub fn interests(&self) -> &InterestProfileTracker {
        &self.interests
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    pub async fn get_feed(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<FeedPage, FeedError> {
        self.cache.get(user_id, page, page_size).await
    }

    /// Consume posts the user has read: they leave the cached list and the
    /// interest source skips them on later rebuilds.
    pub async fn mark_seen(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<u64, FeedError> {
        let unique: Vec<Uuid> = post_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(0);
        }
        Ok(self.cache.consume(user_id, &unique).await?)
    }

    #[instrument(skip(self))]
    pub async fn on_follow(
        &self,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<SocialEdgeRecord, SocialGraphError> {
        let edge = self.social.follow(user_id, target_id).await?;

        let count = self.interests.config().follow_tag_count;
        match self.interests.top_tags(target_id, count).await {
            Ok(top) => {
                let tags: Vec<String> = top.into_iter().map(|t| t.tag).collect();
                let result = self.interests.record(user_id, &tags, SignalSource::Follow).await;
                swallow_signal(user_id, "follow", result);
            }
            Err(err) => swallow_signal(user_id, "follow", Err(SignalError::Store(err))),
        }

        self.invalidate_quietly(user_id, "follow").await;
        Ok(edge)
    }

    pub async fn on_unfollow(&self, user_id: Uuid, target_id: Uuid) -> Result<(), SocialGraphError> {
        self.social.unfollow(user_id, target_id).await?;
        self.invalidate_quietly(user_id, "unfollow").await;
        Ok(())
    }

    /// Block and drop follow edges; both users' feeds are invalidated so the
    /// next rebuild excludes each other.
    pub async fn on_block(
        &self,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<BlockReport, SocialGraphError> {
        let report = self.social.block(user_id, target_id).await?;
        self.invalidate_quietly(user_id, "block").await;
        self.invalidate_quietly(target_id, "block").await;
        Ok(report)
    }

    pub async fn on_unblock(&self, user_id: Uuid, target_id: Uuid) -> Result<bool, SocialGraphError> {
        let removed = self.social.unblock(user_id, target_id).await?;
        if removed {
            self.invalidate_quietly(user_id, "unblock").await;
            self.invalidate_quietly(target_id, "unblock").await;
        }
        Ok(removed)
    }

    pub async fn on_mute(&self, user_id: Uuid, target_id: Uuid) -> Result<(), SocialGraphError> {
        self.social.mute(user_id, target_id).await?;
        self.invalidate_quietly(user_id, "mute").await;
        Ok(())
    }

    pub async fn on_unmute(&self, user_id: Uuid, target_id: Uuid) -> Result<bool, SocialGraphError> {
        let removed = self.social.unmute(user_id, target_id).await?;
        if removed {
            self.invalidate_quietly(user_id, "unmute").await;
        }
        Ok(removed)
    }

    /// Called after the platform stored a like. Never fails.
    pub async fn on_like(&self, user_id: Uuid, post_id: Uuid) {
        match self.catalog.find_post(post_id).await {
            Ok(Some(post)) => {
                let result = self.interests.record(user_id, &post.tags, SignalSource::Like).await;
                swallow_signal(user_id, "like", result);
            }
            Ok(None) => warn!(%user_id, %post_id, op = "like", "liked post not found in catalog"),
            Err(err) => swallow_signal(user_id, "like", Err(SignalError::Store(err))),
        }
        self.invalidate_quietly(user_id, "like").await;
    }

    /// Called after the platform stored a post. Invalidates the author's and
    /// every follower's cache; rebuilding is left to each reader. Never fails.
    #[instrument(skip(self, post), fields(post_id = %post.id, author_id = %post.author_id))]
    pub async fn on_post_created(&self, post: &PostSummary) -> u64 {
        let author = post.author_id;
        let result = self.interests.record(author, &post.tags, SignalSource::Post).await;
        swallow_signal(author, "post", result);

        let mut invalidated = u64::from(self.invalidate_quietly(author, "post").await);
        let mut cursor: Option<ConnectionCursor> = None;
        loop {
            let page = match self
                .graph
                .list_followers(author, PageRequest::new(self.fanout_batch, cursor))
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    warn!(%author, op = "fanout", error = %error, "follower fan-out stopped early");
                    break;
                }
            };
            for follower in &page.items {
                if self.invalidate_quietly(follower.user_id, "fanout").await {
                    invalidated += 1;
                }
            }
            match page.next_cursor.as_deref().map(ConnectionCursor::decode) {
                Some(Ok(next)) => cursor = Some(next),
                Some(Err(error)) => {
                    warn!(%author, op = "fanout", error = %error, "follower cursor rejected");
                    break;
                }
                None => break,
            }
        }
        info!(invalidated, "post fan-out complete");
        invalidated
    }

    /// Explicit profile tags. These never decay. Never fails.
    pub async fn on_profile_tags_updated(&self, user_id: Uuid, tags: &[String]) {
        let result = self.interests.record(user_id, tags, SignalSource::Profile).await;
        swallow_signal(user_id, "profile", result);
        self.invalidate_quietly(user_id, "profile").await;
    }

    /// Forget everything about `user_id`. Safe to repeat.
    pub async fn purge_user(&self, user_id: Uuid) -> Result<PurgeReport, RepoError> {
        let neighbors: BTreeSet<Uuid> = self
            .graph
            .edges_touching(user_id)
            .await?
            .into_iter()
            .map(|edge| {
                if edge.source_id == user_id {
                    edge.target_id
                } else {
                    edge.source_id
                }
            })
            .collect();

        let edges = self.graph.purge_user(user_id).await?;
        let interest_entries = self.interests.purge_user(user_id).await?;
        self.cache.purge(user_id).await?;

        let mut caches_invalidated = 0;
        for neighbor in neighbors {
            if self.invalidate_quietly(neighbor, "purge").await {
                caches_invalidated += 1;
            }
        }
        info!(%user_id, edges, interest_entries, "user purged from feed engine");
        Ok(PurgeReport {
            edges,
            interest_entries,
            caches_invalidated,
        })
    }

    pub async fn compact_interests(&self) -> Result<u64, RepoError> {
        let removed = self.interests.compact().await?;
        info!(removed, "interest compaction finished");
        Ok(removed)
    }

    async fn invalidate_quietly(&self, user_id: Uuid, op: &'static str) -> bool {
        match self.cache.invalidate(user_id).await {
            Ok(_) => true,
            Err(error) => {
                warn!(%user_id, op, error = %error, "feed invalidation failed");
                false
            }
        }
    }
}

fn swallow_signal(user_id: Uuid, op: &'static str, result: Result<usize, SignalError>) {
    if let Err(error) = result {
        counter!(METRIC_SIGNAL_FAILED).increment(1);
        warn!(%user_id, op, error = %error, "interest signal dropped");
    }
}
