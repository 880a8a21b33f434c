//! Reverie feed cache
//!
//! Keeps a materialised, score-ordered feed per user:
//!
//! - **State**: a version bumped by every invalidating write, plus the
//!   version and time of the last installed build
//! - **Entries**: the ranked list, swapped as a whole on rebuild
//! - **Leases**: one rebuild per user at a time
//!
//! ## Configuration
//!
//! ```toml
//! [feed]
//! staleness_seconds = 600
//! cache_capacity = 200
//! entry_ttl_seconds = 172800
//! ```

mod config;
mod feed_cache;
mod lease;
pub(crate) mod lock;

pub use config::FeedCacheConfig;
pub use feed_cache::{CacheStatus, FeedCache, FeedPage, RebuildOutcome};
pub use lease::{RefreshLease, RefreshLeases};
