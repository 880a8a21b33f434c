use reverie_api_types::{
    FeedItem, FeedPageResponse, FeedReason as WireReason, IdentityEntry, IdentityPage,
    RelationshipResponse,
};
use serde::Deserialize;

use crate::application::pagination::CursorPage;
use crate::cache::FeedPage;
use crate::domain::entities::{Connection, FeedEntryRecord, Relationship};
use crate::domain::types::FeedReason;

pub const DEFAULT_IDENTITY_LIMIT: u32 = 50;
pub const MAX_IDENTITY_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct IdentityListQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

pub fn relationship_response(rel: &Relationship) -> RelationshipResponse {
    RelationshipResponse {
        user_id: rel.user_id,
        target_id: rel.target_id,
        following: rel.following,
        followed_by: rel.followed_by,
        blocking: rel.blocking,
        blocked_by: rel.blocked_by,
        muting: rel.muting,
    }
}

pub fn identity_page(page: CursorPage<Connection>) -> IdentityPage {
    IdentityPage {
        items: page
            .items
            .into_iter()
            .map(|c| IdentityEntry {
                user_id: c.user_id,
                since: c.since,
            })
            .collect(),
        next_cursor: page.next_cursor,
    }
}

pub fn feed_page_response(page: FeedPage) -> FeedPageResponse {
    FeedPageResponse {
        items: page.entries.iter().map(feed_item).collect(),
        page: page.page,
        page_size: page.page_size,
        total: page.total as u64,
        version: page.version,
        stale: page.stale,
    }
}

fn feed_item(entry: &FeedEntryRecord) -> FeedItem {
    FeedItem {
        post_id: entry.post_id,
        score: entry.score,
        reason: wire_reason(entry.reason),
    }
}

fn wire_reason(reason: FeedReason) -> WireReason {
    match reason {
        FeedReason::Following => WireReason::Following,
        FeedReason::Interest => WireReason::Interest,
        FeedReason::Trending => WireReason::Trending,
    }
}
