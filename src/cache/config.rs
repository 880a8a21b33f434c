//! Feed cache configuration.

use std::num::NonZeroUsize;

use time::Duration;

const DEFAULT_STALENESS_SECONDS: i64 = 600;
const DEFAULT_CAPACITY: usize = 200;
const DEFAULT_ENTRY_TTL_SECONDS: i64 = 48 * 60 * 60;
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCacheConfig {
    /// A built feed older than this is stale.
    pub staleness: Duration,
    /// Maximum entries kept per user after a rebuild.
    pub capacity: usize,
    /// Entries added longer ago than this are no longer served.
    pub entry_ttl: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for FeedCacheConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::seconds(DEFAULT_STALENESS_SECONDS),
            capacity: DEFAULT_CAPACITY,
            entry_ttl: Duration::seconds(DEFAULT_ENTRY_TTL_SECONDS),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl From<&crate::config::FeedSettings> for FeedCacheConfig {
    fn from(settings: &crate::config::FeedSettings) -> Self {
        Self {
            staleness: settings.staleness,
            capacity: settings.cache_capacity.get() as usize,
            entry_ttl: settings.entry_ttl,
            default_page_size: settings.default_page_size.get(),
            max_page_size: settings.max_page_size.get(),
        }
    }
}

impl FeedCacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Clamp a requested page size into `[1, max_page_size]`; `None` picks the default.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        let max = self.max_page_size.max(1);
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, max)
    }
}
