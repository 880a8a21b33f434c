//! Weighted scoring of feed candidates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::{
    application::{interests::InterestProfileTracker, repos::SocialGraphRepo},
    domain::{
        entities::CandidatePost,
        feed::compare_ranked,
        interest::decay_factor,
    },
    util::clock::Clock,
};

const METRIC_RANKING_DEGRADED: &str = "reverie_ranking_degraded_total";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub recency: f64,
    pub interest: f64,
    pub trending: f64,
    pub affinity: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            recency: 0.4,
            interest: 0.3,
            trending: 0.2,
            affinity: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingConfig {
    pub weights: RankingWeights,
    pub recency_half_life: Duration,
    /// Affinity term for posts by followed authors.
    pub author_affinity_boost: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            recency_half_life: Duration::hours(24),
            author_affinity_boost: 0.2,
        }
    }
}

impl From<&crate::config::RankingSettings> for RankingConfig {
    fn from(settings: &crate::config::RankingSettings) -> Self {
        Self {
            weights: RankingWeights {
                recency: settings.recency_weight,
                interest: settings.interest_weight,
                trending: settings.trending_weight,
                affinity: settings.affinity_weight,
            },
            recency_half_life: settings.recency_half_life,
            author_affinity_boost: settings.author_affinity_boost,
        }
    }
}

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("ranking degraded: {reason}")]
    Degraded { reason: String },
}

/// The per-user inputs the scorer needs, loaded once per ranking pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingContext {
    tag_scores: HashMap<String, f64>,
    total_score: f64,
    followed: HashSet<Uuid>,
}

impl RankingContext {
    pub fn new(tag_scores: HashMap<String, f64>, followed: HashSet<Uuid>) -> Self {
        let total_score = tag_scores.values().sum();
        Self {
            tag_scores,
            total_score,
            followed,
        }
    }

    /// Share of the user's interest mass carried by the candidate's tags.
    pub fn interest_overlap(&self, candidate: &CandidatePost) -> f64 {
        if self.total_score <= 0.0 {
            return 0.0;
        }
        let mut tags: Vec<&String> = candidate.tags.iter().collect();
        tags.sort();
        tags.dedup();
        let matched: f64 = tags
            .into_iter()
            .filter_map(|tag| self.tag_scores.get(tag))
            .sum();
        (matched / self.total_score).clamp(0.0, 1.0)
    }

    pub fn follows(&self, author_id: Uuid) -> bool {
        self.followed.contains(&author_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedPost {
    pub candidate: CandidatePost,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub posts: Vec<RankedPost>,
    /// True when the user's context was unavailable and only recency counted.
    pub degraded: bool,
}

#[derive(Clone)]
pub struct RankingScorer {
    interests: InterestProfileTracker,
    graph: Arc<dyn SocialGraphRepo>,
    config: RankingConfig,
    clock: Arc<dyn Clock>,
}

impl RankingScorer {
    pub fn new(
        interests: InterestProfileTracker,
        graph: Arc<dyn SocialGraphRepo>,
        config: RankingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            interests,
            graph,
            config,
            clock,
        }
    }

    pub async fn context(&self, user_id: Uuid) -> Result<RankingContext, RankingError> {
        let profile = self
            .interests
            .profile(user_id)
            .await
            .map_err(|err| RankingError::Degraded {
                reason: format!("interest profile unavailable: {err}"),
            })?;
        let followed = self
            .graph
            .following_ids(user_id)
            .await
            .map_err(|err| RankingError::Degraded {
                reason: format!("following list unavailable: {err}"),
            })?;
        Ok(RankingContext::new(
            profile.into_iter().map(|t| (t.tag, t.score)).collect(),
            followed.into_iter().collect(),
        ))
    }

    /// `0.5 ^ (age / half_life)`; posts from the future count as brand new.
    pub fn recency(&self, candidate: &CandidatePost, now: OffsetDateTime) -> f64 {
        decay_factor(now - candidate.created_at, Some(self.config.recency_half_life))
    }

    pub fn score_with(
        &self,
        context: &RankingContext,
        candidate: &CandidatePost,
        now: OffsetDateTime,
    ) -> f64 {
        let weights = &self.config.weights;
        let affinity = if context.follows(candidate.author_id) {
            self.config.author_affinity_boost
        } else {
            0.0
        };
        weights.recency * self.recency(candidate, now)
            + weights.interest * context.interest_overlap(candidate)
            + weights.trending * candidate.trending_score.clamp(0.0, 1.0)
            + weights.affinity * affinity
    }

    /// Score of one candidate for `user_id`.
    pub async fn score(
        &self,
        user_id: Uuid,
        candidate: &CandidatePost,
    ) -> Result<f64, RankingError> {
        let context = self.context(user_id).await?;
        Ok(self.score_with(&context, candidate, self.clock.now()))
    }

    /// Score and totally order `candidates`. Falls back to recency-only
    /// scores when the user's context cannot be loaded.
    pub async fn rank(&self, user_id: Uuid, candidates: Vec<CandidatePost>) -> Ranking {
        let now = self.clock.now();
        let (context, degraded) = match self.context(user_id).await {
            Ok(context) => (Some(context), false),
            Err(error) => {
                counter!(METRIC_RANKING_DEGRADED).increment(1);
                warn!(%user_id, op = "rank", error = %error, "falling back to recency-only ranking");
                (None, true)
            }
        };

        let mut posts: Vec<RankedPost> = candidates
            .into_iter()
            .map(|candidate| {
                let score = match &context {
                    Some(context) => self.score_with(context, &candidate, now),
                    None => self.config.weights.recency * self.recency(&candidate, now),
                };
                RankedPost { candidate, score }
            })
            .collect();
        posts.sort_by(|a, b| {
            compare_ranked(
                (a.score, a.candidate.created_at, a.candidate.post_id),
                (b.score, b.candidate.created_at, b.candidate.post_id),
            )
        });
        Ranking { posts, degraded }
    }
}
