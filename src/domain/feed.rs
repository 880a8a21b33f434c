//! Feed ordering rules shared by the scorer and the cache.

use std::cmp::Ordering;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::FeedEntryRecord;

/// Total order over ranked posts: higher score first, then newer post, then
/// smaller post id. Identical inputs always produce identical order.
pub fn compare_ranked(
    (a_score, a_created, a_id): (f64, OffsetDateTime, Uuid),
    (b_score, b_created, b_id): (f64, OffsetDateTime, Uuid),
) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| b_created.cmp(&a_created))
        .then_with(|| a_id.cmp(&b_id))
}

pub fn compare_entries(a: &FeedEntryRecord, b: &FeedEntryRecord) -> Ordering {
    compare_ranked(
        (a.score, a.post_created_at, a.post_id),
        (b.score, b.post_created_at, b.post_id),
    )
}

/// Zero-based bounds of a 1-based page inside a list of `len` items.
pub fn page_bounds(len: usize, page: u32, page_size: u32) -> (usize, usize) {
    let page = page.max(1) as usize;
    let size = page_size.max(1) as usize;
    let start = (page - 1).saturating_mul(size).min(len);
    let end = start.saturating_add(size).min(len);
    (start, end)
}
