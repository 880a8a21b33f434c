//! Wiring of the feed engine's services over a set of stores.

use std::sync::Arc;

use crate::{
    application::{
        candidates::{CandidateConfig, CandidateGenerator},
        feed::FeedOrchestrator,
        interests::{InterestConfig, InterestProfileTracker},
        ranking::{RankingConfig, RankingScorer},
        repos::{
            FeedCacheRepo, InterestRepo, PostCatalog, SocialGraphRepo, TrendingSource,
            UserDirectory,
        },
        social::SocialGraphService,
    },
    cache::{FeedCache, FeedCacheConfig},
    config::Settings,
    util::clock::Clock,
};

/// Owned stores plus the platform collaborators the engine reads from.
#[derive(Clone)]
pub struct Stores {
    pub graph: Arc<dyn SocialGraphRepo>,
    pub interests: Arc<dyn InterestRepo>,
    pub feed_cache: Arc<dyn FeedCacheRepo>,
    pub users: Arc<dyn UserDirectory>,
    pub catalog: Arc<dyn PostCatalog>,
    pub trending: Arc<dyn TrendingSource>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub interest: InterestConfig,
    pub candidates: CandidateConfig,
    pub ranking: RankingConfig,
    pub cache: FeedCacheConfig,
    pub fanout_batch: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interest: InterestConfig::default(),
            candidates: CandidateConfig::default(),
            ranking: RankingConfig::default(),
            cache: FeedCacheConfig::default(),
            fanout_batch: 500,
        }
    }
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            interest: InterestConfig::from(&settings.interest),
            candidates: CandidateConfig {
                lookback: settings.feed.lookback,
                interest_tag_count: settings.feed.interest_tag_count.get() as usize,
            },
            ranking: RankingConfig::from(&settings.ranking),
            cache: FeedCacheConfig::from(&settings.feed),
            fanout_batch: settings.feed.fanout_batch.get(),
        }
    }
}

pub fn assemble(stores: Stores, config: EngineConfig, clock: Arc<dyn Clock>) -> FeedOrchestrator {
    let social = SocialGraphService::new(stores.graph.clone(), stores.users.clone(), clock.clone());
    let interests =
        InterestProfileTracker::new(stores.interests.clone(), config.interest, clock.clone());
    let generator = CandidateGenerator::new(
        stores.graph.clone(),
        interests.clone(),
        stores.catalog.clone(),
        stores.trending.clone(),
        stores.feed_cache.clone(),
        config.candidates,
        clock.clone(),
    );
    let scorer = RankingScorer::new(
        interests.clone(),
        stores.graph.clone(),
        config.ranking,
        clock.clone(),
    );
    let cache = FeedCache::new(stores.feed_cache.clone(), generator, scorer, config.cache, clock);

    FeedOrchestrator::new(social, stores.graph, interests, stores.catalog, cache)
        .with_fanout_batch(config.fanout_batch)
}
