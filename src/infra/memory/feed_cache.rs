use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{FeedCacheRepo, InstallOutcome, RepoError},
    domain::{
        entities::{FeedCacheStateRecord, FeedEntryRecord},
        feed::compare_entries,
    },
};

#[derive(Debug)]
struct UserFeed {
    state: FeedCacheStateRecord,
    entries: Vec<FeedEntryRecord>,
}

impl UserFeed {
    fn new(user_id: Uuid) -> Self {
        Self {
            state: FeedCacheStateRecord::new(user_id),
            entries: Vec::new(),
        }
    }
}

/// Per-user materialised feeds. State and entries share one map entry, so an
/// install swaps both under the same lock.
#[derive(Debug, Default)]
pub struct InMemoryFeedCacheStore {
    feeds: DashMap<Uuid, UserFeed>,
    seen: DashMap<Uuid, HashSet<Uuid>>,
}

impl InMemoryFeedCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedCacheRepo for InMemoryFeedCacheStore {
    async fn load_state(&self, user_id: Uuid) -> Result<Option<FeedCacheStateRecord>, RepoError> {
        Ok(self.feeds.get(&user_id).map(|feed| feed.state))
    }

    async fn bump_version(&self, user_id: Uuid) -> Result<u64, RepoError> {
        let mut feed = self
            .feeds
            .entry(user_id)
            .or_insert_with(|| UserFeed::new(user_id));
        feed.state.version += 1;
        Ok(feed.state.version)
    }

    async fn load_entries(&self, user_id: Uuid) -> Result<Vec<FeedEntryRecord>, RepoError> {
        Ok(self
            .feeds
            .get(&user_id)
            .map(|feed| feed.entries.clone())
            .unwrap_or_default())
    }

    async fn install(
        &self,
        user_id: Uuid,
        mut entries: Vec<FeedEntryRecord>,
        built_version: u64,
        refreshed_at: OffsetDateTime,
    ) -> Result<InstallOutcome, RepoError> {
        entries.sort_by(compare_entries);
        let mut feed = self
            .feeds
            .entry(user_id)
            .or_insert_with(|| UserFeed::new(user_id));
        if let Some(installed_version) = feed
            .state
            .built_version
            .filter(|installed| *installed > built_version)
        {
            return Ok(InstallOutcome::Superseded { installed_version });
        }
        feed.entries = entries;
        feed.state.version = feed.state.version.max(built_version);
        feed.state.built_version = Some(built_version);
        feed.state.last_refresh_at = Some(refreshed_at);
        Ok(InstallOutcome::Installed)
    }

    async fn evict(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<u64, RepoError> {
        let Some(mut feed) = self.feeds.get_mut(&user_id) else {
            return Ok(0);
        };
        let before = feed.entries.len();
        feed.entries.retain(|entry| !post_ids.contains(&entry.post_id));
        Ok((before - feed.entries.len()) as u64)
    }

    async fn record_seen(
        &self,
        user_id: Uuid,
        post_ids: &[Uuid],
        _at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        self.seen
            .entry(user_id)
            .or_default()
            .extend(post_ids.iter().copied());
        Ok(())
    }

    async fn seen_posts(&self, user_id: Uuid) -> Result<HashSet<Uuid>, RepoError> {
        Ok(self
            .seen
            .get(&user_id)
            .map(|set| set.clone())
            .unwrap_or_default())
    }

    async fn purge_user(&self, user_id: Uuid) -> Result<(), RepoError> {
        if let Some(mut feed) = self.feeds.get_mut(&user_id) {
            feed.entries.clear();
            feed.state.version += 1;
            feed.state.built_version = None;
            feed.state.last_refresh_at = None;
        }
        self.seen.remove(&user_id);
        Ok(())
    }
}
