use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::{
        pagination::{ConnectionCursor, CursorPage, PageRequest},
        repos::{BlockOutcome, FollowOutcome, RepoError, SocialGraphRepo},
    },
    domain::{
        entities::{Connection, Relationship, SocialEdgeRecord},
        types::EdgeKind,
    },
};

/// Unordered user pair. Every edge between two users lives under one key, so
/// a single map entry lock covers the follow/block check for the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PairKey(Uuid, Uuid);

impl PairKey {
    fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }
}

#[derive(Debug, Default)]
struct PairEdges {
    edges: BTreeMap<(Uuid, EdgeKind), OffsetDateTime>,
}

impl PairEdges {
    fn has(&self, source: Uuid, kind: EdgeKind) -> bool {
        self.edges.contains_key(&(source, kind))
    }

    fn relationship(&self, user_id: Uuid, target_id: Uuid) -> Relationship {
        Relationship {
            user_id,
            target_id,
            following: self.has(user_id, EdgeKind::Follows),
            followed_by: self.has(target_id, EdgeKind::Follows),
            blocking: self.has(user_id, EdgeKind::Blocks),
            blocked_by: self.has(target_id, EdgeKind::Blocks),
            muting: self.has(user_id, EdgeKind::Mutes),
        }
    }

    fn records(&self, a: Uuid, b: Uuid) -> impl Iterator<Item = SocialEdgeRecord> + '_ {
        self.edges.iter().map(move |(&(source, kind), &created_at)| {
            let target = if source == a { b } else { a };
            SocialEdgeRecord {
                source_id: source,
                target_id: target,
                kind,
                created_at,
            }
        })
    }
}

/// DashMap-backed social graph used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemorySocialGraph {
    pairs: DashMap<PairKey, PairEdges>,
    neighbors: DashMap<Uuid, HashSet<Uuid>>,
}

impl InMemorySocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn link(&self, a: Uuid, b: Uuid) {
        self.neighbors.entry(a).or_default().insert(b);
        self.neighbors.entry(b).or_default().insert(a);
    }

    fn neighbors_of(&self, user_id: Uuid) -> Vec<Uuid> {
        self.neighbors
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Incoming (`inbound = true`) or outgoing follow edges of `user_id`.
    fn connections(&self, user_id: Uuid, inbound: bool) -> Vec<Connection> {
        let mut rows: Vec<Connection> = self
            .neighbors_of(user_id)
            .into_iter()
            .filter_map(|other| {
                let pair = self.pairs.get(&PairKey::new(user_id, other))?;
                let source = if inbound { other } else { user_id };
                pair.edges
                    .get(&(source, EdgeKind::Follows))
                    .map(|&since| Connection {
                        user_id: other,
                        since,
                    })
            })
            .collect();
        rows.sort_by(|a, b| b.since.cmp(&a.since).then_with(|| a.user_id.cmp(&b.user_id)));
        rows
    }

    fn page(rows: Vec<Connection>, page: PageRequest<ConnectionCursor>) -> CursorPage<Connection> {
        let take = page.limit as usize + 1;
        let rows: Vec<Connection> = rows
            .into_iter()
            .filter(|row| page.cursor.is_none_or(|cursor| cursor.admits(row)))
            .take(take)
            .collect();
        CursorPage::from_overfetch(rows, page.limit)
    }
}

#[async_trait]
impl SocialGraphRepo for InMemorySocialGraph {
    async fn relationship(
        &self,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<Relationship, RepoError> {
        Ok(self
            .pairs
            .get(&PairKey::new(user_id, target_id))
            .map(|pair| pair.relationship(user_id, target_id))
            .unwrap_or_else(|| Relationship::empty(user_id, target_id)))
    }

    async fn insert_follow(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<FollowOutcome, RepoError> {
        let outcome = {
            let mut pair = self.pairs.entry(PairKey::new(source_id, target_id)).or_default();
            let existing = pair.relationship(source_id, target_id);
            if existing.is_blocked_either_way() {
                FollowOutcome::Blocked(existing)
            } else if existing.following {
                FollowOutcome::AlreadyFollowing(existing)
            } else {
                pair.edges.insert((source_id, EdgeKind::Follows), at);
                FollowOutcome::Created(SocialEdgeRecord {
                    source_id,
                    target_id,
                    kind: EdgeKind::Follows,
                    created_at: at,
                })
            }
        };
        if matches!(outcome, FollowOutcome::Created(_)) {
            self.link(source_id, target_id);
        }
        Ok(outcome)
    }

    async fn insert_block(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<BlockOutcome, RepoError> {
        let outcome = {
            let mut pair = self.pairs.entry(PairKey::new(source_id, target_id)).or_default();
            if pair.has(source_id, EdgeKind::Blocks) {
                BlockOutcome::AlreadyBlocked
            } else {
                let mut removed_follows = 0;
                for source in [source_id, target_id] {
                    if pair.edges.remove(&(source, EdgeKind::Follows)).is_some() {
                        removed_follows += 1;
                    }
                }
                pair.edges.insert((source_id, EdgeKind::Blocks), at);
                BlockOutcome::Created {
                    edge: SocialEdgeRecord {
                        source_id,
                        target_id,
                        kind: EdgeKind::Blocks,
                        created_at: at,
                    },
                    removed_follows,
                }
            }
        };
        self.link(source_id, target_id);
        Ok(outcome)
    }

    async fn insert_mute(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let inserted = {
            let mut pair = self.pairs.entry(PairKey::new(source_id, target_id)).or_default();
            if pair.has(source_id, EdgeKind::Mutes) {
                false
            } else {
                pair.edges.insert((source_id, EdgeKind::Mutes), at);
                true
            }
        };
        self.link(source_id, target_id);
        Ok(inserted)
    }

    async fn remove_edge(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        kind: EdgeKind,
    ) -> Result<bool, RepoError> {
        Ok(self
            .pairs
            .get_mut(&PairKey::new(source_id, target_id))
            .is_some_and(|mut pair| pair.edges.remove(&(source_id, kind)).is_some()))
    }

    async fn list_followers(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
    ) -> Result<CursorPage<Connection>, RepoError> {
        Ok(Self::page(self.connections(user_id, true), page))
    }

    async fn list_following(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
    ) -> Result<CursorPage<Connection>, RepoError> {
        Ok(Self::page(self.connections(user_id, false), page))
    }

    async fn following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        Ok(self
            .connections(user_id, false)
            .into_iter()
            .map(|connection| connection.user_id)
            .collect())
    }

    async fn excluded_authors(&self, user_id: Uuid) -> Result<HashSet<Uuid>, RepoError> {
        let mut excluded = HashSet::new();
        for other in self.neighbors_of(user_id) {
            let Some(pair) = self.pairs.get(&PairKey::new(user_id, other)) else {
                continue;
            };
            let rel = pair.relationship(user_id, other);
            if rel.is_blocked_either_way() || rel.muting {
                excluded.insert(other);
            }
        }
        Ok(excluded)
    }

    async fn edges_touching(&self, user_id: Uuid) -> Result<Vec<SocialEdgeRecord>, RepoError> {
        let mut edges = Vec::new();
        for other in self.neighbors_of(user_id) {
            if let Some(pair) = self.pairs.get(&PairKey::new(user_id, other)) {
                edges.extend(pair.records(user_id, other));
            }
        }
        Ok(edges)
    }

    async fn purge_user(&self, user_id: Uuid) -> Result<u64, RepoError> {
        let mut removed = 0u64;
        for other in self.neighbors_of(user_id) {
            if let Some((_, pair)) = self.pairs.remove(&PairKey::new(user_id, other)) {
                removed += pair.edges.len() as u64;
            }
            if let Some(mut set) = self.neighbors.get_mut(&other) {
                set.remove(&user_id);
            }
        }
        self.neighbors.remove(&user_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid timestamp")
    }

    #[tokio::test]
    async fn block_removes_follows_in_both_directions() {
        let graph = InMemorySocialGraph::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        graph.insert_follow(a, b, now()).await.expect("follow a->b");
        graph.insert_follow(b, a, now()).await.expect("follow b->a");

        let outcome = graph.insert_block(a, b, now()).await.expect("block");
        assert!(matches!(
            outcome,
            BlockOutcome::Created {
                removed_follows: 2,
                ..
            }
        ));

        let edges = graph.edges_touching(a).await.expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeKind::Blocks);
        assert_eq!(edges[0].source_id, a);
    }

    #[tokio::test]
    async fn follow_is_refused_while_blocked_either_way() {
        let graph = InMemorySocialGraph::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        graph.insert_block(b, a, now()).await.expect("block");

        let outcome = graph.insert_follow(a, b, now()).await.expect("follow");
        match outcome {
            FollowOutcome::Blocked(rel) => assert!(rel.blocked_by),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn followers_page_through_cursor() {
        let graph = InMemorySocialGraph::new();
        let star = Uuid::new_v4();
        let fans: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for (offset, fan) in fans.iter().enumerate() {
            graph
                .insert_follow(*fan, star, now() + Duration::minutes(offset as i64))
                .await
                .expect("follow");
        }

        let first = graph
            .list_followers(star, PageRequest::new(2, None))
            .await
            .expect("first page");
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].user_id, fans[4]);
        let cursor = ConnectionCursor::decode(first.next_cursor.as_deref().expect("cursor"))
            .expect("decoded");

        let rest = graph
            .list_followers(star, PageRequest::new(10, Some(cursor)))
            .await
            .expect("rest");
        let ids: Vec<Uuid> = rest.items.iter().map(|c| c.user_id).collect();
        assert_eq!(ids, vec![fans[2], fans[1], fans[0]]);
        assert!(rest.next_cursor.is_none());
    }

    #[tokio::test]
    async fn purge_is_idempotent() {
        let graph = InMemorySocialGraph::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        graph.insert_follow(a, b, now()).await.expect("follow");
        graph.insert_mute(c, a, now()).await.expect("mute");

        assert_eq!(graph.purge_user(a).await.expect("purge"), 2);
        assert_eq!(graph.purge_user(a).await.expect("purge again"), 0);
        assert!(graph.edges_touching(b).await.expect("edges").is_empty());
        assert!(graph.excluded_authors(c).await.expect("excluded").is_empty());
    }
}
