//! Shared cursor pagination helpers.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ConnectionCursorPayload {
    since: OffsetDateTime,
    user_id: Uuid,
}

/// Keyset cursor for follower/following listings.
///
/// Listings are ordered newest edge first, ties broken by ascending user id;
/// the cursor marks the last item of the previous page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCursor {
    since: OffsetDateTime,
    user_id: Uuid,
}

impl ConnectionCursor {
    pub fn new(since: OffsetDateTime, user_id: Uuid) -> Self {
        Self { since, user_id }
    }

    pub fn since(&self) -> OffsetDateTime {
        self.since
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Returns true when `item` sorts strictly after this cursor.
    pub fn admits(&self, item: &Connection) -> bool {
        item.since < self.since || (item.since == self.since && item.user_id > self.user_id)
    }

    pub fn encode(&self) -> String {
        let payload = ConnectionCursorPayload {
            since: self.since,
            user_id: self.user_id,
        };
        let serialized = serde_json::to_vec(&payload)
            .expect("serializing connection cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: ConnectionCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self {
            since: payload.since,
            user_id: payload.user_id,
        })
    }
}

impl From<&Connection> for ConnectionCursor {
    fn from(item: &Connection) -> Self {
        Self::new(item.since, item.user_id)
    }
}

/// Request for a cursor-based page.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self { limit, cursor }
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

impl CursorPage<Connection> {
    /// Build a page from `limit + 1` fetched rows, emitting a cursor when
    /// more rows remain.
    pub fn from_overfetch(mut rows: Vec<Connection>, limit: u32) -> Self {
        let limit = limit as usize;
        let next_cursor = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|last| ConnectionCursor::from(last).encode())
        } else {
            None
        };
        Self::new(rows, next_cursor)
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn connection_cursor_round_trip() {
        let cursor = ConnectionCursor::new(OffsetDateTime::now_utc(), Uuid::new_v4());
        let decoded = ConnectionCursor::decode(&cursor.encode()).expect("decoded cursor");
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn garbage_cursor_is_rejected() {
        assert!(matches!(
            ConnectionCursor::decode("not-a-cursor!"),
            Err(PaginationError::InvalidCursor(_))
        ));
    }

    #[test]
    fn cursor_admits_only_later_items() {
        let now = OffsetDateTime::now_utc();
        let cursor = ConnectionCursor::new(now, Uuid::from_u128(5));
        let older = Connection {
            user_id: Uuid::from_u128(1),
            since: now - Duration::seconds(1),
        };
        let same_time_larger_id = Connection {
            user_id: Uuid::from_u128(6),
            since: now,
        };
        let same_time_smaller_id = Connection {
            user_id: Uuid::from_u128(4),
            since: now,
        };
        assert!(cursor.admits(&older));
        assert!(cursor.admits(&same_time_larger_id));
        assert!(!cursor.admits(&same_time_smaller_id));
    }

    #[test]
    fn overfetch_emits_cursor_for_remaining_rows() {
        let now = OffsetDateTime::now_utc();
        let rows: Vec<Connection> = (0..3)
            .map(|i| Connection {
                user_id: Uuid::from_u128(i),
                since: now,
            })
            .collect();

        let page = CursorPage::from_overfetch(rows.clone(), 2);
        assert_eq!(page.items.len(), 2);
        assert!(page.next_cursor.is_some());

        let page = CursorPage::from_overfetch(rows, 3);
        assert_eq!(page.items.len(), 3);
        assert!(page.next_cursor.is_none());
    }
}
