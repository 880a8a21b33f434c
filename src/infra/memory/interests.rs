use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    application::repos::{InterestRepo, RepoError},
    domain::{
        entities::InterestEntryRecord,
        interest::{DecayPolicy, merged_score},
        types::SignalSource,
    },
};

#[derive(Debug, Clone, Copy)]
struct StoredScore {
    score: f64,
    updated_at: OffsetDateTime,
}

/// Interest rows grouped per user; a merge holds the user's map entry for
/// the whole read-modify-write.
#[derive(Debug, Default)]
pub struct InMemoryInterestStore {
    users: DashMap<Uuid, HashMap<(String, SignalSource), StoredScore>>,
}

impl InMemoryInterestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterestRepo for InMemoryInterestStore {
    async fn merge_signal(
        &self,
        user_id: Uuid,
        tag: &str,
        source: SignalSource,
        weight: f64,
        half_life: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<InterestEntryRecord, RepoError> {
        let mut rows = self.users.entry(user_id).or_default();
        let key = (tag.to_string(), source);
        let previous = rows
            .get(&key)
            .map(|stored| (stored.score, stored.updated_at));
        let score = merged_score(previous, weight, half_life, now);
        let updated_at = previous.map_or(now, |(_, at)| at.max(now));
        rows.insert(key, StoredScore { score, updated_at });
        Ok(InterestEntryRecord {
            user_id,
            tag: tag.to_string(),
            score,
            source,
            updated_at,
        })
    }

    async fn list_entries(&self, user_id: Uuid) -> Result<Vec<InterestEntryRecord>, RepoError> {
        let Some(rows) = self.users.get(&user_id) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<InterestEntryRecord> = rows
            .iter()
            .map(|((tag, source), stored)| InterestEntryRecord {
                user_id,
                tag: tag.clone(),
                score: stored.score,
                source: *source,
                updated_at: stored.updated_at,
            })
            .collect();
        entries.sort_by(|a, b| a.tag.cmp(&b.tag).then_with(|| a.source.cmp(&b.source)));
        Ok(entries)
    }

    async fn delete_decayed(
        &self,
        policy: &DecayPolicy,
        now: OffsetDateTime,
    ) -> Result<u64, RepoError> {
        let mut removed = 0u64;
        for mut rows in self.users.iter_mut() {
            let user_id = *rows.key();
            rows.retain(|(tag, source), stored| {
                let record = InterestEntryRecord {
                    user_id,
                    tag: tag.clone(),
                    score: stored.score,
                    source: *source,
                    updated_at: stored.updated_at,
                };
                let keep = policy.live_score(&record, now).is_some();
                if !keep {
                    removed += 1;
                }
                keep
            });
        }
        self.users.retain(|_, rows| !rows.is_empty());
        Ok(removed)
    }

    async fn purge_user(&self, user_id: Uuid) -> Result<u64, RepoError> {
        Ok(self
            .users
            .remove(&user_id)
            .map(|(_, rows)| rows.len() as u64)
            .unwrap_or(0))
    }
}
