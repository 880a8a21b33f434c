//! Feed-engine tables over a real Postgres. Requires `DATABASE_URL`; run with
//! `cargo test -- --ignored`.

use reverie::application::pagination::PageRequest;
use reverie::application::repos::{
    BlockOutcome, CandidateExclusions, FeedCacheRepo, FollowOutcome, InstallOutcome,
    InterestRepo, PostCatalog, SocialGraphRepo,
};
use reverie::domain::entities::FeedEntryRecord;
use reverie::domain::interest::DecayPolicy;
use reverie::domain::types::{EdgeKind, FeedReason, SignalSource};
use reverie::infra::db::PostgresRepositories;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

fn now() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_760_000_000).expect("valid timestamp")
}

fn entry(user_id: Uuid, score: f64, at: OffsetDateTime) -> FeedEntryRecord {
    FeedEntryRecord {
        user_id,
        post_id: Uuid::new_v4(),
        score,
        reason: FeedReason::Trending,
        post_created_at: at,
        added_at: at,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn follow_is_rejected_once_a_block_exists(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let outcome = repos.insert_follow(alice, bob, now()).await.expect("follow");
    assert!(matches!(outcome, FollowOutcome::Created(_)));
    let again = repos.insert_follow(alice, bob, now()).await.expect("refollow");
    assert!(matches!(again, FollowOutcome::AlreadyFollowing(rel) if rel.following));

    let blocked = repos.insert_block(bob, alice, now()).await.expect("block");
    assert!(matches!(
        blocked,
        BlockOutcome::Created {
            removed_follows: 1,
            ..
        }
    ));

    let rel = repos.relationship(alice, bob).await.expect("relationship");
    assert!(!rel.following);
    assert!(rel.blocked_by);

    let retry = repos.insert_follow(alice, bob, now()).await.expect("follow");
    assert!(matches!(retry, FollowOutcome::Blocked(_)));
    assert!(
        repos
            .excluded_authors(alice)
            .await
            .expect("excluded")
            .contains(&bob)
    );

    assert!(repos.remove_edge(bob, alice, EdgeKind::Blocks).await.expect("unblock"));
    assert!(!repos.remove_edge(bob, alice, EdgeKind::Blocks).await.expect("unblock"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn followers_page_by_cursor(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let star = Uuid::new_v4();
    for offset in 0..5 {
        repos
            .insert_follow(Uuid::new_v4(), star, now() + Duration::seconds(offset))
            .await
            .expect("follow");
    }

    let first = repos
        .list_followers(star, PageRequest::new(3, None))
        .await
        .expect("first page");
    assert_eq!(first.items.len(), 3);
    assert!(first.items[0].since > first.items[2].since);

    let cursor = first
        .next_cursor
        .as_deref()
        .map(reverie::application::pagination::ConnectionCursor::decode)
        .expect("cursor present")
        .expect("cursor decodes");
    let second = repos
        .list_followers(star, PageRequest::new(3, Some(cursor)))
        .await
        .expect("second page");
    assert_eq!(second.items.len(), 2);
    assert!(second.next_cursor.is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn interest_merge_decays_then_adds(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let user = Uuid::new_v4();
    let half_life = Some(Duration::days(10));

    repos
        .merge_signal(user, "rust", SignalSource::Like, 1.0, half_life, now())
        .await
        .expect("first merge");
    let merged = repos
        .merge_signal(
            user,
            "rust",
            SignalSource::Like,
            1.0,
            half_life,
            now() + Duration::days(10),
        )
        .await
        .expect("second merge");
    assert!((merged.score - 1.5).abs() < 1e-9);

    let entries = repos.list_entries(user).await.expect("entries");
    assert_eq!(entries.len(), 1);

    let policy = DecayPolicy::default();
    let removed = repos
        .delete_decayed(&policy, now() + Duration::days(400))
        .await
        .expect("compact");
    assert_eq!(removed, 1);
    assert!(repos.list_entries(user).await.expect("entries").is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn install_never_regresses_version(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let user = Uuid::new_v4();

    repos.bump_version(user).await.expect("bump");
    let version = repos.bump_version(user).await.expect("bump");
    assert_eq!(version, 2);

    let newer = repos
        .install(user, vec![entry(user, 2.0, now())], 2, now())
        .await
        .expect("install");
    assert_eq!(newer, InstallOutcome::Installed);

    let older = repos
        .install(user, vec![entry(user, 9.0, now()), entry(user, 8.0, now())], 1, now())
        .await
        .expect("install");
    assert_eq!(
        older,
        InstallOutcome::Superseded {
            installed_version: 2
        }
    );

    let entries = repos.load_entries(user).await.expect("entries");
    assert_eq!(entries.len(), 1);
    let state = repos.load_state(user).await.expect("state").expect("row");
    assert_eq!(state.built_version, Some(2));

    let evicted = repos
        .evict(user, &[entries[0].post_id])
        .await
        .expect("evict");
    assert_eq!(evicted, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn purge_removes_every_trace(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let (user, other) = (Uuid::new_v4(), Uuid::new_v4());

    repos.insert_follow(user, other, now()).await.expect("follow");
    repos.insert_mute(other, user, now()).await.expect("mute");
    repos
        .merge_signal(user, "rust", SignalSource::Profile, 1.0, None, now())
        .await
        .expect("interest");
    repos.bump_version(user).await.expect("bump");
    repos
        .install(user, vec![entry(user, 1.0, now())], 1, now())
        .await
        .expect("install");
    repos
        .record_seen(user, &[Uuid::new_v4()], now())
        .await
        .expect("seen");

    assert_eq!(SocialGraphRepo::purge_user(&repos, user).await.expect("edges"), 2);
    assert_eq!(InterestRepo::purge_user(&repos, user).await.expect("interests"), 1);
    FeedCacheRepo::purge_user(&repos, user).await.expect("cache");

    assert!(repos.edges_touching(user).await.expect("edges").is_empty());
    let state = repos.load_state(user).await.expect("state").expect("row");
    assert_eq!(state.built_version, None);
    assert_eq!(state.version, 2, "purge keeps the counter moving forward");
    assert!(repos.load_entries(user).await.expect("entries").is_empty());
    assert!(repos.seen_posts(user).await.expect("seen").is_empty());

    // Repeating is harmless.
    assert_eq!(SocialGraphRepo::purge_user(&repos, user).await.expect("edges"), 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn install_lifts_version_to_the_build(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let user = Uuid::new_v4();

    repos
        .install(user, vec![entry(user, 1.0, now())], 4, now())
        .await
        .expect("install");
    let state = repos.load_state(user).await.expect("state").expect("row");
    assert_eq!(state.version, 4);
    assert_eq!(repos.bump_version(user).await.expect("bump"), 5);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn concurrent_merges_keep_every_signal(pool: PgPool) {
    let repos = std::sync::Arc::new(PostgresRepositories::new(pool));
    let user = Uuid::new_v4();

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let repos = repos.clone();
        tasks.push(tokio::spawn(async move {
            repos
                .merge_signal(user, "rust", SignalSource::Like, 1.0, None, now())
                .await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("merge");
    }

    let entries = repos.list_entries(user).await.expect("entries");
    assert_eq!(entries.len(), 1);
    assert!((entries[0].score - 50.0).abs() < 1e-9);
}

async fn create_platform_tables(pool: &PgPool) {
    for sql in [
        "CREATE TABLE posts (id UUID PRIMARY KEY, author_id UUID NOT NULL, created_at TIMESTAMPTZ NOT NULL)",
        "CREATE TABLE post_tags (post_id UUID NOT NULL, tag TEXT NOT NULL)",
        "CREATE TABLE post_reactions (post_id UUID NOT NULL, user_id UUID NOT NULL, created_at TIMESTAMPTZ NOT NULL)",
    ] {
        sqlx::query(sql).execute(pool).await.expect("platform table");
    }
}

async fn insert_post(pool: &PgPool, author: Uuid, tags: &[&str], at: OffsetDateTime) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO posts (id, author_id, created_at) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(author)
        .bind(at)
        .execute(pool)
        .await
        .expect("post");
    for tag in tags {
        sqlx::query("INSERT INTO post_tags (post_id, tag) VALUES ($1, $2)")
            .bind(id)
            .bind(*tag)
            .execute(pool)
            .await
            .expect("tag");
    }
    id
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn tag_overlap_query_normalises_ranks_and_excludes_before_limit(pool: PgPool) {
    create_platform_tables(&pool).await;
    let repos = PostgresRepositories::new(pool.clone());
    let (author, muted) = (Uuid::new_v4(), Uuid::new_v4());
    let since = now() - Duration::days(3);

    let mut exclusions = CandidateExclusions::default();
    exclusions.authors.insert(muted);
    for minutes in 0..5 {
        let read = insert_post(&pool, author, &["ai"], now() - Duration::minutes(minutes)).await;
        exclusions.posts.insert(read);
        insert_post(&pool, muted, &["ai", "rust"], now() - Duration::minutes(minutes)).await;
    }
    let single = insert_post(&pool, author, &[" #AI "], now() - Duration::hours(3)).await;
    let double = insert_post(&pool, author, &["#Rust", "ai"], now() - Duration::hours(10)).await;

    let tags = vec!["ai".to_string(), "rust".to_string()];
    let found = repos
        .posts_by_tag_overlap(&tags, &exclusions, since, 2)
        .await
        .expect("overlap");
    let ids: Vec<Uuid> = found.iter().map(|post| post.id).collect();
    assert_eq!(ids, vec![double, single]);
    assert_eq!(found[1].tags, vec!["ai".to_string()]);
}
