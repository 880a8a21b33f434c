use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use reverie::application::engine::{self, EngineConfig, Stores};
use reverie::infra::memory::InMemoryPlatform;
use reverie::util::clock::ManualClock;

#[tokio::test]
async fn feed_cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let now = OffsetDateTime::from_unix_timestamp(1_760_000_000).expect("valid timestamp");
    let clock = ManualClock::new(now);
    let platform = Arc::new(InMemoryPlatform::new());
    let feed = engine::assemble(
        Stores::in_memory(platform.clone()),
        EngineConfig::default(),
        Arc::new(clock.clone()),
    );

    let reader = Uuid::new_v4();
    let author = Uuid::new_v4();
    platform.add_user(reader);
    platform.add_user(author);
    feed.on_follow(reader, author).await.expect("follow");
    let post = platform.add_post(author, &["metrics"], now - Duration::hours(2));
    feed.on_post_created(&post).await;

    // Cold read, then a warm hit.
    feed.get_feed(reader, 1, None).await.expect("cold read");
    feed.get_feed(reader, 1, None).await.expect("warm read");

    // Invalidate and read the stale list; the refresh runs in the background.
    feed.on_like(reader, post.id).await;
    feed.get_feed(reader, 1, None).await.expect("stale read");
    feed.cache().settle(reader).await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "reverie_feed_cache_cold_total",
        "reverie_feed_cache_hit_total",
        "reverie_feed_cache_stale_total",
        "reverie_feed_rebuild_total",
        "reverie_feed_rebuild_ms",
        "reverie_feed_invalidate_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
