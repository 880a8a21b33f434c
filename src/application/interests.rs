//! Per-user interest profiles: decaying tag scores fed by behavioral signals.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    application::repos::{InterestRepo, RepoError},
    domain::{
        interest::{DecayPolicy, TagScore, aggregate_tags, normalize_tag},
        types::SignalSource,
    },
    util::clock::Clock,
};

/// Weight merged into a tag per signal, by source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    pub like: f64,
    pub post: f64,
    pub follow: f64,
    pub profile: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            like: 1.0,
            post: 2.0,
            follow: 0.5,
            profile: 3.0,
        }
    }
}

impl SignalWeights {
    pub fn weight(&self, source: SignalSource) -> f64 {
        match source {
            SignalSource::Like => self.like,
            SignalSource::Post => self.post,
            SignalSource::Follow => self.follow,
            SignalSource::Profile => self.profile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterestConfig {
    pub weights: SignalWeights,
    pub decay: DecayPolicy,
    /// How many of a followed author's top tags a follow copies over.
    pub follow_tag_count: usize,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            decay: DecayPolicy::default(),
            follow_tag_count: 5,
        }
    }
}

impl From<&crate::config::InterestSettings> for InterestConfig {
    fn from(settings: &crate::config::InterestSettings) -> Self {
        Self {
            weights: SignalWeights {
                like: settings.like_weight,
                post: settings.post_weight,
                follow: settings.follow_weight,
                profile: settings.profile_weight,
            },
            decay: DecayPolicy {
                like: settings.like_half_life,
                post: settings.post_half_life,
                follow: settings.follow_half_life,
                profile: settings.profile_half_life,
                epsilon: settings.epsilon,
            },
            follow_tag_count: settings.follow_tag_count.get() as usize,
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal weight must be finite and non-negative, got {0}")]
    InvalidWeight(f64),
    #[error(transparent)]
    Store(#[from] RepoError),
}

#[derive(Clone)]
pub struct InterestProfileTracker {
    repo: Arc<dyn InterestRepo>,
    config: InterestConfig,
    clock: Arc<dyn Clock>,
}

impl InterestProfileTracker {
    pub fn new(repo: Arc<dyn InterestRepo>, config: InterestConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &InterestConfig {
        &self.config
    }

    /// Merge `weight` into every tag of the signal. Tags are normalised and
    /// de-duplicated first; returns how many rows were touched.
    #[instrument(skip(self, tags), fields(tag_count = tags.len()))]
    pub async fn apply_signal(
        &self,
        user_id: Uuid,
        tags: &[String],
        source: SignalSource,
        weight: f64,
    ) -> Result<usize, SignalError> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(SignalError::InvalidWeight(weight));
        }
        let tags: BTreeSet<String> = tags.iter().filter_map(|tag| normalize_tag(tag)).collect();
        let half_life = self.config.decay.half_life(source);
        let now = self.clock.now();
        for tag in &tags {
            self.repo
                .merge_signal(user_id, tag, source, weight, half_life, now)
                .await?;
        }
        debug!(%user_id, source = source.as_str(), merged = tags.len(), "interest signal applied");
        Ok(tags.len())
    }

    /// [`Self::apply_signal`] with the configured weight for `source`.
    pub async fn record(
        &self,
        user_id: Uuid,
        tags: &[String],
        source: SignalSource,
    ) -> Result<usize, SignalError> {
        self.apply_signal(user_id, tags, source, self.config.weights.weight(source))
            .await
    }

    /// The `n` highest-scoring tags, decayed to now.
    pub async fn top_tags(&self, user_id: Uuid, n: usize) -> Result<Vec<TagScore>, RepoError> {
        let mut tags = self.profile(user_id).await?;
        tags.truncate(n);
        Ok(tags)
    }

    /// Every live tag of the user, best first.
    pub async fn profile(&self, user_id: Uuid) -> Result<Vec<TagScore>, RepoError> {
        let entries = self.repo.list_entries(user_id).await?;
        Ok(aggregate_tags(&entries, &self.config.decay, self.clock.now()))
    }

    /// Physically delete entries that decayed below epsilon.
    pub async fn compact(&self) -> Result<u64, RepoError> {
        self.repo
            .delete_decayed(&self.config.decay, self.clock.now())
            .await
    }

    pub async fn purge_user(&self, user_id: Uuid) -> Result<u64, RepoError> {
        self.repo.purge_user(user_id).await
    }
}
