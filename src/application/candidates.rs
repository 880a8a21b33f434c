//! Candidate generation from the following, interest and trending sources.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    application::{
        interests::InterestProfileTracker,
        repos::{
            CandidateExclusions, FeedCacheRepo, PostCatalog, RepoError, SocialGraphRepo,
            TrendingSource,
        },
    },
    domain::{
        entities::{CandidatePost, PostSummary},
        types::FeedReason,
    },
    util::clock::Clock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateConfig {
    /// How far back the following and trending sources look.
    pub lookback: Duration,
    /// Number of top interest tags matched by the interest source.
    pub interest_tag_count: usize,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(72),
            interest_tag_count: 10,
        }
    }
}

#[derive(Clone)]
pub struct CandidateGenerator {
    graph: Arc<dyn SocialGraphRepo>,
    interests: InterestProfileTracker,
    catalog: Arc<dyn PostCatalog>,
    trending: Arc<dyn TrendingSource>,
    seen: Arc<dyn FeedCacheRepo>,
    config: CandidateConfig,
    clock: Arc<dyn Clock>,
}

impl CandidateGenerator {
    pub fn new(
        graph: Arc<dyn SocialGraphRepo>,
        interests: InterestProfileTracker,
        catalog: Arc<dyn PostCatalog>,
        trending: Arc<dyn TrendingSource>,
        seen: Arc<dyn FeedCacheRepo>,
        config: CandidateConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            graph,
            interests,
            catalog,
            trending,
            seen,
            config,
            clock,
        }
    }

    /// Up to `limit` unscored candidates, interleaved across sources.
    ///
    /// A post reachable through several sources is kept once, under the
    /// highest-priority reason. Blocked, muted and own posts never appear.
    #[instrument(skip(self))]
    pub async fn generate(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CandidatePost>, RepoError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let since = self.clock.now() - self.config.lookback;
        let fetch = u32::try_from(limit).unwrap_or(u32::MAX);

        let mut excluded = self.graph.excluded_authors(user_id).await?;
        excluded.insert(user_id);

        let following = self.following_source(user_id, &excluded, since, fetch).await?;
        let interest = self.interest_source(user_id, &excluded, since, fetch).await?;
        let authors_only = CandidateExclusions {
            authors: excluded.clone(),
            posts: HashSet::new(),
        };
        let trending = self.trending.trending(since, &authors_only, fetch).await?;

        let mut trending_scores: HashMap<Uuid, f64> = HashMap::new();
        let mut buckets: [Vec<(PostSummary, FeedReason)>; 3] = Default::default();
        let mut claimed: HashSet<Uuid> = HashSet::new();

        for post in following {
            if claimed.insert(post.id) {
                buckets[0].push((post, FeedReason::Following));
            }
        }
        for post in interest {
            if claimed.insert(post.id) {
                buckets[1].push((post, FeedReason::Interest));
            }
        }
        for item in trending {
            if excluded.contains(&item.post.author_id) {
                continue;
            }
            trending_scores.insert(item.post.id, item.score);
            if claimed.insert(item.post.id) {
                buckets[2].push((item.post, FeedReason::Trending));
            }
        }

        let interleaved = interleave(buckets, limit);
        let missing: Vec<Uuid> = interleaved
            .iter()
            .map(|(post, _)| post.id)
            .filter(|id| !trending_scores.contains_key(id))
            .collect();
        if !missing.is_empty() {
            match self.trending.scores_for(&missing, since).await {
                Ok(scores) => trending_scores.extend(scores),
                Err(error) => warn!(
                    %user_id,
                    op = "trending_scores",
                    error = %error,
                    "trending scores unavailable; treating as zero"
                ),
            }
        }

        Ok(interleaved
            .into_iter()
            .map(|(post, reason)| {
                let score = trending_scores.get(&post.id).copied().unwrap_or(0.0);
                CandidatePost::from_summary(post, score, reason)
            })
            .collect())
    }

    async fn following_source(
        &self,
        user_id: Uuid,
        excluded: &HashSet<Uuid>,
        since: OffsetDateTime,
        fetch: u32,
    ) -> Result<Vec<PostSummary>, RepoError> {
        let authors: Vec<Uuid> = self
            .graph
            .following_ids(user_id)
            .await?
            .into_iter()
            .filter(|author| !excluded.contains(author))
            .collect();
        if authors.is_empty() {
            return Ok(Vec::new());
        }
        let posts = self.catalog.recent_by_authors(&authors, since, fetch).await?;
        Ok(posts
            .into_iter()
            .filter(|post| !excluded.contains(&post.author_id))
            .collect())
    }

    /// Unseen posts sharing tags with the user's top interests, most overlap first.
    async fn interest_source(
        &self,
        user_id: Uuid,
        excluded: &HashSet<Uuid>,
        since: OffsetDateTime,
        fetch: u32,
    ) -> Result<Vec<PostSummary>, RepoError> {
        let top: Vec<String> = self
            .interests
            .top_tags(user_id, self.config.interest_tag_count)
            .await?
            .into_iter()
            .map(|tag| tag.tag)
            .collect();
        if top.is_empty() {
            return Ok(Vec::new());
        }
        let exclusions = CandidateExclusions {
            authors: excluded.clone(),
            posts: self.seen.seen_posts(user_id).await?,
        };
        self.catalog
            .posts_by_tag_overlap(&top, &exclusions, since, fetch)
            .await
    }
}

/// Round-robin across buckets until `limit` items are taken.
fn interleave<T>(buckets: [Vec<T>; 3], limit: usize) -> Vec<T> {
    let mut iters: Vec<_> = buckets.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::with_capacity(limit);
    loop {
        let mut progressed = false;
        for iter in iters.iter_mut() {
            if out.len() == limit {
                return out;
            }
            if let Some(item) = iter.next() {
                out.push(item);
                progressed = true;
            }
        }
        if !progressed {
            return out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::interests::InterestConfig;
    use crate::domain::types::SignalSource;
    use crate::infra::memory::{
        InMemoryFeedCacheStore, InMemoryInterestStore, InMemoryPlatform, InMemorySocialGraph,
    };
    use crate::util::clock::ManualClock;

    struct Fixture {
        graph: Arc<InMemorySocialGraph>,
        platform: Arc<InMemoryPlatform>,
        cache: Arc<InMemoryFeedCacheStore>,
        tracker: InterestProfileTracker,
        generator: CandidateGenerator,
        now: OffsetDateTime,
    }

    fn fixture() -> Fixture {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid timestamp");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now));
        let graph = Arc::new(InMemorySocialGraph::new());
        let platform = Arc::new(InMemoryPlatform::new());
        let cache = Arc::new(InMemoryFeedCacheStore::new());
        let tracker = InterestProfileTracker::new(
            Arc::new(InMemoryInterestStore::new()),
            InterestConfig::default(),
            clock.clone(),
        );
        let generator = CandidateGenerator::new(
            graph.clone(),
            tracker.clone(),
            platform.clone(),
            platform.clone(),
            cache.clone(),
            CandidateConfig::default(),
            clock,
        );
        Fixture {
            graph,
            platform,
            cache,
            tracker,
            generator,
            now,
        }
    }

    #[test]
    fn interleave_alternates_and_truncates() {
        let out = interleave([vec![1, 4, 6], vec![2], vec![3, 5]], 5);
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn cold_start_falls_back_to_trending() {
        let fx = fixture();
        let post = fx.platform.add_post(Uuid::new_v4(), &["ai"], fx.now);
        fx.platform.add_reaction(post.id, fx.now);

        let candidates = fx.generator.generate(Uuid::new_v4(), 10).await.expect("generate");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].reason, FeedReason::Trending);
        assert_eq!(candidates[0].trending_score, 1.0);
    }

    #[tokio::test]
    async fn following_outranks_trending_for_the_same_post() {
        let fx = fixture();
        let (reader, author) = (Uuid::new_v4(), Uuid::new_v4());
        fx.graph
            .insert_follow(reader, author, fx.now)
            .await
            .expect("follow");
        let post = fx.platform.add_post(author, &["ai"], fx.now);
        fx.platform.add_reaction(post.id, fx.now);

        let candidates = fx.generator.generate(reader, 10).await.expect("generate");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].reason, FeedReason::Following);
        assert_eq!(candidates[0].trending_score, 1.0);
    }

    #[tokio::test]
    async fn excluded_and_own_posts_never_appear() {
        let fx = fixture();
        let (reader, blocked, muted) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        fx.graph
            .insert_block(blocked, reader, fx.now)
            .await
            .expect("block");
        fx.graph
            .insert_mute(reader, muted, fx.now)
            .await
            .expect("mute");
        for author in [reader, blocked, muted] {
            let post = fx.platform.add_post(author, &["ai"], fx.now);
            fx.platform.add_reaction(post.id, fx.now);
        }
        fx.tracker
            .record(reader, &["ai".to_string()], SignalSource::Profile)
            .await
            .expect("profile");

        let candidates = fx.generator.generate(reader, 10).await.expect("generate");
        assert!(candidates.is_empty(), "unexpected {candidates:?}");
    }

    #[tokio::test]
    async fn long_read_history_does_not_starve_the_interest_source() {
        let fx = fixture();
        let reader = Uuid::new_v4();
        fx.tracker
            .record(reader, &["ai".to_string()], SignalSource::Profile)
            .await
            .expect("profile");
        let busy = Uuid::new_v4();
        let mut read = Vec::new();
        for minutes in 0..30 {
            let post = fx
                .platform
                .add_post(busy, &["ai"], fx.now - Duration::minutes(minutes));
            read.push(post.id);
        }
        fx.cache
            .record_seen(reader, &read, fx.now)
            .await
            .expect("seen");
        let unread = fx
            .platform
            .add_post(Uuid::new_v4(), &["ai"], fx.now - Duration::hours(5));

        let candidates = fx.generator.generate(reader, 10).await.expect("generate");
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.post_id).collect();
        assert_eq!(ids, vec![unread.id]);
    }

    #[tokio::test]
    async fn muted_trending_authors_do_not_use_up_the_limit() {
        let fx = fixture();
        let (reader, muted) = (Uuid::new_v4(), Uuid::new_v4());
        fx.graph
            .insert_mute(reader, muted, fx.now)
            .await
            .expect("mute");
        for minutes in 0..5 {
            let loud = fx
                .platform
                .add_post(muted, &["news"], fx.now - Duration::minutes(minutes));
            for _ in 0..3 {
                fx.platform.add_reaction(loud.id, fx.now);
            }
        }
        let quiet = fx
            .platform
            .add_post(Uuid::new_v4(), &["news"], fx.now - Duration::hours(2));
        fx.platform.add_reaction(quiet.id, fx.now);

        let candidates = fx.generator.generate(reader, 2).await.expect("generate");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].post_id, quiet.id);
        assert_eq!(candidates[0].reason, FeedReason::Trending);
    }

    #[tokio::test]
    async fn interest_source_prefers_overlap_and_skips_seen() {
        let fx = fixture();
        let reader = Uuid::new_v4();
        fx.tracker
            .record(reader, &["ai".to_string(), "rust".to_string()], SignalSource::Profile)
            .await
            .expect("profile");
        let author = Uuid::new_v4();
        let one_tag = fx.platform.add_post(author, &["ai"], fx.now);
        let two_tags = fx
            .platform
            .add_post(author, &["ai", "rust"], fx.now - Duration::hours(1));
        let seen = fx.platform.add_post(author, &["rust"], fx.now);
        fx.cache
            .record_seen(reader, &[seen.id], fx.now)
            .await
            .expect("seen");

        let candidates = fx.generator.generate(reader, 10).await.expect("generate");
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.post_id).collect();
        assert_eq!(ids, vec![two_tags.id, one_tag.id]);
        assert!(candidates.iter().all(|c| c.reason == FeedReason::Interest));
    }
}
