//! In-process adapters backed by `dashmap`, used when no database is configured.

mod feed_cache;
mod interests;
mod platform;
mod social;

pub use feed_cache::InMemoryFeedCacheStore;
pub use interests::InMemoryInterestStore;
pub use platform::InMemoryPlatform;
pub use social::InMemorySocialGraph;

use std::sync::Arc;

use crate::application::engine::Stores;

impl Stores {
    /// Fresh in-memory stores reading posts and accounts from `platform`.
    pub fn in_memory(platform: Arc<InMemoryPlatform>) -> Self {
        Self {
            graph: Arc::new(InMemorySocialGraph::new()),
            interests: Arc::new(InMemoryInterestStore::new()),
            feed_cache: Arc::new(InMemoryFeedCacheStore::new()),
            users: platform.clone(),
            catalog: platform.clone(),
            trending: platform,
        }
    }
}
