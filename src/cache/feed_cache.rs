//! Per-user materialised feeds with version- and TTL-based staleness.
//!
//! State machine per user: `Empty -> Warm -> Stale -> Warm`. Reads on an
//! empty cache rebuild synchronously; reads on a stale cache serve what is
//! installed and refresh in the background.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{config::FeedCacheConfig, lease::RefreshLeases};
use crate::{
    application::{
        candidates::CandidateGenerator,
        feed::FeedError,
        ranking::RankingScorer,
        repos::{FeedCacheRepo, InstallOutcome, RepoError},
    },
    domain::{
        entities::{FeedCacheStateRecord, FeedEntryRecord},
        feed::page_bounds,
    },
    util::clock::Clock,
};

const METRIC_CACHE_HIT: &str = "reverie_feed_cache_hit_total";
const METRIC_CACHE_STALE: &str = "reverie_feed_cache_stale_total";
const METRIC_CACHE_COLD: &str = "reverie_feed_cache_cold_total";
const METRIC_REBUILD: &str = "reverie_feed_rebuild_total";
const METRIC_REBUILD_SKIPPED: &str = "reverie_feed_rebuild_skipped_total";
const METRIC_REBUILD_FAILED: &str = "reverie_feed_rebuild_failed_total";
const METRIC_REBUILD_MS: &str = "reverie_feed_rebuild_ms";
const METRIC_INVALIDATE: &str = "reverie_feed_invalidate_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Empty,
    Warm,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Installed { built_version: u64, entries: usize },
    /// Finished, but a result built from a newer version was already in place.
    Superseded { installed_version: u64 },
    /// Another rebuild for the user was in flight; this call waited for it.
    Coalesced,
}

/// One page of a user's feed, in feed order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub entries: Vec<FeedEntryRecord>,
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
    pub version: u64,
    /// True when the page came from a cache awaiting refresh.
    pub stale: bool,
}

#[derive(Clone)]
pub struct FeedCache {
    repo: Arc<dyn FeedCacheRepo>,
    generator: CandidateGenerator,
    scorer: RankingScorer,
    leases: RefreshLeases,
    config: FeedCacheConfig,
    clock: Arc<dyn Clock>,
}

impl FeedCache {
    pub fn new(
        repo: Arc<dyn FeedCacheRepo>,
        generator: CandidateGenerator,
        scorer: RankingScorer,
        config: FeedCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            generator,
            scorer,
            leases: RefreshLeases::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &FeedCacheConfig {
        &self.config
    }

    fn classify(&self, state: Option<&FeedCacheStateRecord>, now: OffsetDateTime) -> CacheStatus {
        let Some(state) = state else {
            return CacheStatus::Empty;
        };
        let Some(built_version) = state.built_version else {
            return CacheStatus::Empty;
        };
        let expired = state
            .last_refresh_at
            .is_none_or(|refreshed| now - refreshed > self.config.staleness);
        if expired || built_version != state.version {
            CacheStatus::Stale
        } else {
            CacheStatus::Warm
        }
    }

    pub async fn status(&self, user_id: Uuid) -> Result<CacheStatus, RepoError> {
        let state = self.repo.load_state(user_id).await?;
        Ok(self.classify(state.as_ref(), self.clock.now()))
    }

    /// Serve one 1-based page. `page_size` is clamped to the configured bounds.
    pub async fn get(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<FeedPage, FeedError> {
        if page == 0 {
            return Err(FeedError::InvalidPage { page });
        }
        let page_size = self.config.page_size(page_size);
        let now = self.clock.now();
        let state = self.repo.load_state(user_id).await?;

        let (state, stale) = match self.classify(state.as_ref(), now) {
            CacheStatus::Warm => {
                counter!(METRIC_CACHE_HIT).increment(1);
                (state, false)
            }
            CacheStatus::Empty => {
                counter!(METRIC_CACHE_COLD).increment(1);
                (self.fill_cold(user_id).await?, false)
            }
            CacheStatus::Stale => {
                counter!(METRIC_CACHE_STALE).increment(1);
                let live = self.live_entries(user_id, now).await?;
                if live.is_empty() {
                    self.refresh_empty(user_id, state).await
                } else {
                    self.spawn_refresh(user_id);
                    return Ok(self.paginate(live, state, page, page_size, true));
                }
            }
        };

        let live = self.live_entries(user_id, self.clock.now()).await?;
        Ok(self.paginate(live, state, page, page_size, stale))
    }

    /// Bump the version so the next read rebuilds. Never rebuilds itself.
    pub async fn invalidate(&self, user_id: Uuid) -> Result<u64, RepoError> {
        let version = self.repo.bump_version(user_id).await?;
        counter!(METRIC_INVALIDATE).increment(1);
        debug!(%user_id, version, "feed cache invalidated");
        Ok(version)
    }

    /// Rebuild now unless a rebuild for the user is already running, in which
    /// case wait for that one instead.
    pub async fn rebuild(&self, user_id: Uuid) -> Result<RebuildOutcome, RepoError> {
        match self.leases.try_acquire(user_id) {
            Some(_lease) => self.rebuild_locked(user_id).await,
            None => {
                counter!(METRIC_REBUILD_SKIPPED).increment(1);
                drop(self.leases.acquire(user_id).await);
                Ok(RebuildOutcome::Coalesced)
            }
        }
    }

    /// Wait for any in-flight rebuild of the user's feed.
    pub async fn settle(&self, user_id: Uuid) {
        drop(self.leases.acquire(user_id).await);
    }

    /// Record `post_ids` as seen and evict them from the cached list.
    pub async fn consume(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<u64, RepoError> {
        self.repo
            .record_seen(user_id, post_ids, self.clock.now())
            .await?;
        self.repo.evict(user_id, post_ids).await
    }

    /// Drop all cached state. The cache returns to `Empty`.
    ///
    /// Waits for any in-flight rebuild so its result cannot land afterwards.
    pub async fn purge(&self, user_id: Uuid) -> Result<(), RepoError> {
        let _lease = self.leases.acquire(user_id).await;
        self.repo.purge_user(user_id).await
    }

    async fn fill_cold(&self, user_id: Uuid) -> Result<Option<FeedCacheStateRecord>, FeedError> {
        let _lease = self.leases.acquire(user_id).await;
        let state = self.repo.load_state(user_id).await?;
        if self.classify(state.as_ref(), self.clock.now()) != CacheStatus::Empty {
            // Built by the rebuild we waited for.
            return Ok(state);
        }
        self.rebuild_locked(user_id)
            .await
            .map_err(FeedError::ColdCacheUnavailable)?;
        Ok(self.repo.load_state(user_id).await?)
    }

    /// A stale cache with nothing left to serve is refreshed inline; on
    /// failure the empty stale list is served.
    async fn refresh_empty(
        &self,
        user_id: Uuid,
        state: Option<FeedCacheStateRecord>,
    ) -> (Option<FeedCacheStateRecord>, bool) {
        let _lease = self.leases.acquire(user_id).await;
        if let Ok(current) = self.repo.load_state(user_id).await
            && self.classify(current.as_ref(), self.clock.now()) == CacheStatus::Warm
        {
            return (current, false);
        }
        match self.rebuild_locked(user_id).await {
            Ok(_) => match self.repo.load_state(user_id).await {
                Ok(fresh) => (fresh, false),
                Err(_) => (state, true),
            },
            Err(error) => {
                warn!(%user_id, op = "rebuild", error = %error, "serving stale feed after failed rebuild");
                (state, true)
            }
        }
    }

    fn spawn_refresh(&self, user_id: Uuid) {
        let Some(lease) = self.leases.try_acquire(user_id) else {
            counter!(METRIC_REBUILD_SKIPPED).increment(1);
            return;
        };
        let cache = self.clone();
        tokio::spawn(async move {
            let _lease = lease;
            if let Err(error) = cache.rebuild_locked(user_id).await {
                warn!(%user_id, op = "background_rebuild", error = %error, "stale feed refresh failed");
            }
        });
    }

    /// Generate, rank and install. Caller holds the user's lease.
    async fn rebuild_locked(&self, user_id: Uuid) -> Result<RebuildOutcome, RepoError> {
        let started = Instant::now();
        let result = self.build_and_install(user_id).await;
        histogram!(METRIC_REBUILD_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        match &result {
            Ok(outcome) => {
                counter!(METRIC_REBUILD).increment(1);
                info!(%user_id, ?outcome, "feed rebuilt");
            }
            Err(_) => counter!(METRIC_REBUILD_FAILED).increment(1),
        }
        result
    }

    async fn build_and_install(&self, user_id: Uuid) -> Result<RebuildOutcome, RepoError> {
        // The version is read before generation so that any write landing
        // during the build leaves the installed result stale.
        let built_version = self
            .repo
            .load_state(user_id)
            .await?
            .map(|state| state.version)
            .unwrap_or(0);
        let capacity = self.config.capacity_non_zero().get();
        let candidates = self.generator.generate(user_id, capacity).await?;
        let ranking = self.scorer.rank(user_id, candidates).await;

        let now = self.clock.now();
        let entries: Vec<FeedEntryRecord> = ranking
            .posts
            .into_iter()
            .take(capacity)
            .map(|ranked| FeedEntryRecord {
                user_id,
                post_id: ranked.candidate.post_id,
                score: ranked.score,
                reason: ranked.candidate.reason,
                post_created_at: ranked.candidate.created_at,
                added_at: now,
            })
            .collect();
        let count = entries.len();

        match self
            .repo
            .install(user_id, entries, built_version, now)
            .await?
        {
            InstallOutcome::Installed => Ok(RebuildOutcome::Installed {
                built_version,
                entries: count,
            }),
            InstallOutcome::Superseded { installed_version } => {
                Ok(RebuildOutcome::Superseded { installed_version })
            }
        }
    }

    async fn live_entries(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Vec<FeedEntryRecord>, RepoError> {
        let ttl = self.config.entry_ttl;
        let mut entries = self.repo.load_entries(user_id).await?;
        entries.retain(|entry| now - entry.added_at <= ttl);
        Ok(entries)
    }

    fn paginate(
        &self,
        entries: Vec<FeedEntryRecord>,
        state: Option<FeedCacheStateRecord>,
        page: u32,
        page_size: u32,
        stale: bool,
    ) -> FeedPage {
        let total = entries.len();
        let (start, end) = page_bounds(total, page, page_size);
        FeedPage {
            entries: entries[start..end].to_vec(),
            page,
            page_size,
            total,
            version: state.map(|s| s.version).unwrap_or(0),
            stale,
        }
    }
}
