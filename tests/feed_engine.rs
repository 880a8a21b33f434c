//! End-to-end behaviour of the feed engine over the in-memory stores.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use reverie::application::engine::{self, EngineConfig, Stores};
use reverie::application::feed::{FeedError, FeedOrchestrator};
use reverie::application::pagination::PageRequest;
use reverie::application::repos::{CandidateExclusions, RepoError, TrendingPost, TrendingSource};
use reverie::application::social::SocialGraphError;
use reverie::cache::{CacheStatus, RebuildOutcome};
use reverie::domain::types::FeedReason;
use reverie::infra::memory::InMemoryPlatform;
use reverie::util::clock::{Clock, ManualClock};

/// Wraps the platform's trending source to count feed generations and to
/// simulate an outage.
struct CountingTrending {
    inner: Arc<InMemoryPlatform>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: std::time::Duration,
}

#[async_trait]
impl TrendingSource for CountingTrending {
    async fn trending(
        &self,
        since: OffsetDateTime,
        exclusions: &CandidateExclusions,
        limit: u32,
    ) -> Result<Vec<TrendingPost>, RepoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        self.inner.trending(since, exclusions, limit).await
    }

    async fn scores_for(
        &self,
        post_ids: &[Uuid],
        since: OffsetDateTime,
    ) -> Result<HashMap<Uuid, f64>, RepoError> {
        self.inner.scores_for(post_ids, since).await
    }
}

struct Harness {
    platform: Arc<InMemoryPlatform>,
    clock: ManualClock,
    trending: Arc<CountingTrending>,
    feed: FeedOrchestrator,
}

impl Harness {
    fn new() -> Self {
        Self::with_delay(std::time::Duration::ZERO)
    }

    fn with_delay(delay: std::time::Duration) -> Self {
        let start = OffsetDateTime::from_unix_timestamp(1_760_000_000).expect("valid timestamp");
        let clock = ManualClock::new(start);
        let platform = Arc::new(InMemoryPlatform::new());
        let trending = Arc::new(CountingTrending {
            inner: platform.clone(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        });
        let mut stores = Stores::in_memory(platform.clone());
        stores.trending = trending.clone() as Arc<dyn TrendingSource>;
        let feed = engine::assemble(stores, EngineConfig::default(), Arc::new(clock.clone()));
        Self {
            platform,
            clock,
            trending,
            feed,
        }
    }

    fn user(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.platform.add_user(id);
        id
    }

    async fn post(&self, author: Uuid, tags: &[&str], age: Duration) -> Uuid {
        let post = self
            .platform
            .add_post(author, tags, self.clock.now() - age);
        self.feed.on_post_created(&post).await;
        post.id
    }

    fn generations(&self) -> usize {
        self.trending.calls.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn followed_author_post_reaches_feed_after_invalidation() {
    let h = Harness::new();
    let (alice, bob) = (h.user(), h.user());

    h.feed.on_follow(alice, bob).await.expect("follow");
    let first = h.post(bob, &["rust"], Duration::hours(2)).await;

    let page = h.feed.get_feed(alice, 1, None).await.expect("cold read");
    assert!(!page.stale);
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].post_id, first);
    assert_eq!(page.entries[0].reason, FeedReason::Following);

    let second = h.post(bob, &["rust"], Duration::minutes(5)).await;
    assert_eq!(
        h.feed.cache().status(alice).await.expect("status"),
        CacheStatus::Stale
    );

    let stale = h.feed.get_feed(alice, 1, None).await.expect("stale read");
    assert!(stale.stale);
    assert!(stale.entries.iter().all(|e| e.post_id != second));

    h.feed.cache().settle(alice).await;
    let fresh = h.feed.get_feed(alice, 1, None).await.expect("fresh read");
    assert!(!fresh.stale);
    let ids: Vec<Uuid> = fresh.entries.iter().map(|e| e.post_id).collect();
    assert_eq!(ids, vec![second, first], "newer post ranks first");
}

#[tokio::test]
async fn repeated_likes_surface_interest_posts_from_strangers() {
    let h = Harness::new();
    let (reader, writer, stranger) = (h.user(), h.user(), h.user());

    for _ in 0..5 {
        let liked = h
            .platform
            .add_post(writer, &["travel"], h.clock.now() - Duration::hours(30));
        h.feed.on_like(reader, liked.id).await;
    }
    let other = h
        .platform
        .add_post(writer, &["cooking"], h.clock.now() - Duration::hours(30));
    h.feed.on_like(reader, other.id).await;

    let top = h
        .feed
        .interests()
        .top_tags(reader, 1)
        .await
        .expect("profile");
    assert_eq!(top[0].tag, "travel");

    let fresh = h.post(stranger, &["travel"], Duration::minutes(10)).await;
    let page = h.feed.get_feed(reader, 1, None).await.expect("feed");
    let entry = page
        .entries
        .iter()
        .find(|e| e.post_id == fresh)
        .expect("interest post present");
    assert_eq!(entry.reason, FeedReason::Interest);
}

#[tokio::test]
async fn cold_start_falls_back_to_trending() {
    let h = Harness::new();
    let (newcomer, author) = (h.user(), h.user());
    let hot = h
        .platform
        .add_post(author, &["news"], h.clock.now() - Duration::hours(1));
    for _ in 0..3 {
        h.platform.add_reaction(hot.id, h.clock.now());
    }

    let page = h.feed.get_feed(newcomer, 1, None).await.expect("feed");
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].reason, FeedReason::Trending);
}

#[tokio::test]
async fn concurrent_cold_reads_share_one_rebuild() {
    let h = Arc::new(Harness::with_delay(std::time::Duration::from_millis(50)));
    let (reader, author) = (h.user(), h.user());
    h.feed.on_follow(reader, author).await.expect("follow");
    h.post(author, &["rust"], Duration::hours(1)).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.feed.get_feed(reader, 1, None).await.expect("feed")
        }));
    }
    let mut pages = Vec::new();
    for task in tasks {
        pages.push(task.await.expect("join"));
    }

    assert_eq!(h.generations(), 1);
    assert!(pages.windows(2).all(|w| w[0].entries == w[1].entries));
}

#[tokio::test]
async fn explicit_rebuilds_coalesce() {
    let h = Arc::new(Harness::with_delay(std::time::Duration::from_millis(50)));
    let reader = h.user();

    let first = {
        let h = h.clone();
        tokio::spawn(async move { h.feed.cache().rebuild(reader).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = h.feed.cache().rebuild(reader).await.expect("second");
    let first = first.await.expect("join").expect("first");

    assert!(matches!(first, RebuildOutcome::Installed { .. }));
    assert_eq!(second, RebuildOutcome::Coalesced);
    assert_eq!(h.generations(), 1);
}

#[tokio::test]
async fn block_removes_follows_and_hides_author() {
    let h = Harness::new();
    let (alice, bob) = (h.user(), h.user());
    h.feed.on_follow(alice, bob).await.expect("follow");
    h.feed.on_follow(bob, alice).await.expect("follow back");
    let hot = h.post(bob, &["rust"], Duration::hours(1)).await;
    for _ in 0..4 {
        h.platform.add_reaction(hot, h.clock.now());
    }

    let before = h.feed.get_feed(alice, 1, None).await.expect("feed");
    assert!(before.entries.iter().any(|e| e.post_id == hot));

    let report = h.feed.on_block(bob, alice).await.expect("block");
    assert_eq!(report.removed_follows, 2);

    let rel = h
        .feed
        .social()
        .relationship(alice, bob)
        .await
        .expect("relationship");
    assert!(!rel.following && !rel.followed_by && rel.blocked_by);

    // Both caches were invalidated; read, settle, read again.
    let _ = h.feed.get_feed(alice, 1, None).await.expect("feed");
    h.feed.cache().settle(alice).await;
    let after = h.feed.get_feed(alice, 1, None).await.expect("feed");
    assert!(after.entries.iter().all(|e| e.post_id != hot));

    let err = h.feed.on_follow(alice, bob).await.expect_err("blocked");
    assert!(matches!(err, SocialGraphError::Conflict { .. }));
}

#[tokio::test]
async fn duplicate_follow_reports_existing_state() {
    let h = Harness::new();
    let (alice, bob) = (h.user(), h.user());
    h.feed.on_follow(alice, bob).await.expect("follow");

    match h.feed.on_follow(alice, bob).await {
        Err(SocialGraphError::Conflict { existing, .. }) => assert!(existing.following),
        other => panic!("expected conflict, got {other:?}"),
    }

    let page = h
        .feed
        .social()
        .followers(bob, PageRequest::new(10, None))
        .await
        .expect("followers");
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn muted_authors_leave_every_source() {
    let h = Harness::new();
    let (alice, bob) = (h.user(), h.user());
    h.feed.on_follow(alice, bob).await.expect("follow");
    let post = h.post(bob, &["rust"], Duration::hours(1)).await;

    h.feed.on_mute(alice, bob).await.expect("mute");
    h.feed.cache().rebuild(alice).await.expect("rebuild");

    let page = h.feed.get_feed(alice, 1, None).await.expect("feed");
    assert!(page.entries.iter().all(|e| e.post_id != post));
    let rel = h.feed.social().relationship(alice, bob).await.expect("rel");
    assert!(rel.following, "mute leaves the follow edge alone");
}

#[tokio::test]
async fn paging_is_stable_and_complete() {
    let h = Harness::new();
    let reader = h.user();
    let authors: Vec<Uuid> = (0..5).map(|_| h.user()).collect();
    for author in &authors {
        h.feed.on_follow(reader, *author).await.expect("follow");
        for hours in 1..=5 {
            h.post(*author, &["rust"], Duration::hours(hours)).await;
        }
    }

    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for page in 1..=4 {
        let result = h.feed.get_feed(reader, page, Some(7)).await.expect("page");
        assert_eq!(result.total, 25);
        for entry in result.entries {
            assert!(seen.insert(entry.post_id), "no duplicates across pages");
            ordered.push(entry);
        }
    }
    assert_eq!(ordered.len(), 25);
    assert!(ordered.windows(2).all(|w| w[0].score >= w[1].score));

    let again = h.feed.get_feed(reader, 1, Some(7)).await.expect("page");
    let ids: Vec<Uuid> = again.entries.iter().map(|e| e.post_id).collect();
    let expected: Vec<Uuid> = ordered.iter().take(7).map(|e| e.post_id).collect();
    assert_eq!(ids, expected);

    let beyond = h.feed.get_feed(reader, 9, Some(7)).await.expect("page");
    assert!(beyond.entries.is_empty());
    assert_eq!(beyond.total, 25);

    let err = h.feed.get_feed(reader, 0, None).await.expect_err("page zero");
    assert!(matches!(err, FeedError::InvalidPage { page: 0 }));
}

#[tokio::test]
async fn page_size_is_clamped() {
    let h = Harness::new();
    let reader = h.user();
    let page = h.feed.get_feed(reader, 1, Some(10_000)).await.expect("feed");
    assert_eq!(page.page_size, 100);
    let page = h.feed.get_feed(reader, 1, Some(0)).await.expect("feed");
    assert_eq!(page.page_size, 1);
}

#[tokio::test]
async fn invalidate_is_idempotent_and_never_rebuilds() {
    let h = Harness::new();
    let reader = h.user();
    h.feed.get_feed(reader, 1, None).await.expect("warm");
    let built = h.generations();

    h.feed.cache().invalidate(reader).await.expect("invalidate");
    h.feed.cache().invalidate(reader).await.expect("invalidate");
    assert_eq!(h.generations(), built);
    assert_eq!(
        h.feed.cache().status(reader).await.expect("status"),
        CacheStatus::Stale
    );

    h.feed.cache().rebuild(reader).await.expect("rebuild");
    assert_eq!(
        h.feed.cache().status(reader).await.expect("status"),
        CacheStatus::Warm
    );
}

#[tokio::test]
async fn cache_goes_stale_with_time() {
    let h = Harness::new();
    let (reader, author) = (h.user(), h.user());
    h.feed.on_follow(reader, author).await.expect("follow");
    h.post(author, &["rust"], Duration::hours(1)).await;
    h.feed.get_feed(reader, 1, None).await.expect("warm");

    h.clock.advance(Duration::minutes(9));
    assert_eq!(
        h.feed.cache().status(reader).await.expect("status"),
        CacheStatus::Warm
    );

    h.clock.advance(Duration::minutes(2));
    let page = h.feed.get_feed(reader, 1, None).await.expect("stale");
    assert!(page.stale);
    h.feed.cache().settle(reader).await;
    assert_eq!(
        h.feed.cache().status(reader).await.expect("status"),
        CacheStatus::Warm
    );
}

#[tokio::test]
async fn stale_page_is_served_when_refresh_fails() {
    let h = Harness::new();
    let (reader, author) = (h.user(), h.user());
    h.feed.on_follow(reader, author).await.expect("follow");
    let post = h.post(author, &["rust"], Duration::hours(1)).await;
    h.feed.get_feed(reader, 1, None).await.expect("warm");

    h.trending.failing.store(true, Ordering::SeqCst);
    h.feed.cache().invalidate(reader).await.expect("invalidate");

    let page = h.feed.get_feed(reader, 1, None).await.expect("stale read");
    assert!(page.stale);
    assert_eq!(page.entries[0].post_id, post);

    h.feed.cache().settle(reader).await;
    assert_eq!(
        h.feed.cache().status(reader).await.expect("status"),
        CacheStatus::Stale
    );
}

#[tokio::test]
async fn cold_read_reports_unavailable_when_rebuild_fails() {
    let h = Harness::new();
    let reader = h.user();
    h.trending.failing.store(true, Ordering::SeqCst);

    let err = h.feed.get_feed(reader, 1, None).await.expect_err("cold");
    assert!(matches!(err, FeedError::ColdCacheUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn seen_posts_leave_the_cached_feed() {
    let h = Harness::new();
    let (reader, author) = (h.user(), h.user());
    h.feed.on_follow(reader, author).await.expect("follow");
    let read = h.post(author, &["rust"], Duration::hours(2)).await;
    let unread = h.post(author, &["rust"], Duration::hours(1)).await;
    h.feed.get_feed(reader, 1, None).await.expect("warm");

    let evicted = h.feed.mark_seen(reader, &[read, read]).await.expect("seen");
    assert_eq!(evicted, 1);

    let page = h.feed.get_feed(reader, 1, None).await.expect("feed");
    let ids: Vec<Uuid> = page.entries.iter().map(|e| e.post_id).collect();
    assert_eq!(ids, vec![unread]);
}

#[tokio::test]
async fn purge_forgets_the_user() {
    let h = Harness::new();
    let (alice, bob, carol) = (h.user(), h.user(), h.user());
    h.feed.on_follow(alice, bob).await.expect("follow");
    h.feed.on_follow(bob, carol).await.expect("follow");
    h.feed
        .on_profile_tags_updated(bob, &["rust".to_string()])
        .await;
    h.feed.get_feed(bob, 1, None).await.expect("warm");

    let report = h.feed.purge_user(bob).await.expect("purge");
    assert_eq!(report.edges, 2);
    assert!(report.interest_entries >= 1);

    assert_eq!(
        h.feed.cache().status(bob).await.expect("status"),
        CacheStatus::Empty
    );
    assert!(h.feed.interests().profile(bob).await.expect("profile").is_empty());
    let following = h
        .feed
        .social()
        .following(alice, PageRequest::new(10, None))
        .await
        .expect("following");
    assert!(following.items.is_empty());

    let again = h.feed.purge_user(bob).await.expect("purge again");
    assert_eq!(again.edges, 0);
}

#[tokio::test]
async fn purge_waits_for_an_in_flight_rebuild() {
    let h = Arc::new(Harness::with_delay(std::time::Duration::from_millis(50)));
    let (reader, author) = (h.user(), h.user());
    h.feed.on_follow(reader, author).await.expect("follow");
    h.post(author, &["rust"], Duration::hours(1)).await;
    h.feed.cache().invalidate(reader).await.expect("invalidate");

    let rebuild = {
        let h = h.clone();
        tokio::spawn(async move { h.feed.cache().rebuild(reader).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    h.feed.purge_user(reader).await.expect("purge");
    let outcome = rebuild.await.expect("join").expect("rebuild");
    assert!(matches!(outcome, RebuildOutcome::Installed { .. }));

    assert_eq!(
        h.feed.cache().status(reader).await.expect("status"),
        CacheStatus::Empty
    );

    // The version kept moving forward, so the next build installs and is current.
    h.feed.cache().rebuild(reader).await.expect("rebuild");
    assert_eq!(
        h.feed.cache().status(reader).await.expect("status"),
        CacheStatus::Warm
    );
}

#[tokio::test]
async fn write_during_rebuild_leaves_the_result_stale_until_next_read() {
    let h = Arc::new(Harness::with_delay(std::time::Duration::from_millis(50)));
    let (reader, author) = (h.user(), h.user());
    h.feed.on_follow(reader, author).await.expect("follow");
    let early = h.post(author, &["rust"], Duration::hours(2)).await;

    let rebuild = {
        let h = h.clone();
        tokio::spawn(async move { h.feed.cache().rebuild(reader).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let late = h.post(author, &["rust"], Duration::hours(1)).await;

    let outcome = rebuild.await.expect("join").expect("rebuild");
    assert!(matches!(outcome, RebuildOutcome::Installed { .. }));
    assert_eq!(
        h.feed.cache().status(reader).await.expect("status"),
        CacheStatus::Stale
    );

    let stale = h.feed.get_feed(reader, 1, None).await.expect("stale read");
    assert!(stale.stale);
    let ids: Vec<Uuid> = stale.entries.iter().map(|e| e.post_id).collect();
    assert_eq!(ids, vec![early]);

    h.feed.cache().settle(reader).await;
    let fresh = h.feed.get_feed(reader, 1, None).await.expect("fresh read");
    assert!(!fresh.stale);
    let ids: Vec<Uuid> = fresh.entries.iter().map(|e| e.post_id).collect();
    assert_eq!(ids, vec![late, early]);
}

#[tokio::test]
async fn older_unseen_interest_posts_survive_a_long_read_history() {
    let h = Harness::new();
    let (reader, busy, stranger) = (h.user(), h.user(), h.user());
    h.feed
        .on_profile_tags_updated(reader, &["ai".to_string()])
        .await;

    let mut read = Vec::new();
    for minutes in 0..200 {
        read.push(h.post(busy, &["ai"], Duration::minutes(minutes)).await);
    }
    h.feed.mark_seen(reader, &read).await.expect("seen");
    let unseen = h.post(stranger, &["ai"], Duration::hours(20)).await;

    let page = h.feed.get_feed(reader, 1, None).await.expect("feed");
    assert_eq!(page.total, 1);
    assert_eq!(page.entries[0].post_id, unseen);
    assert_eq!(page.entries[0].reason, FeedReason::Interest);
}
