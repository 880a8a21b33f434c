//! Shared domain enumerations aligned with persisted column values.

use serde::{Deserialize, Serialize};

/// Kind of a directed social edge `(source, target, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Follows,
    Blocks,
    Mutes,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Follows => "follows",
            EdgeKind::Blocks => "blocks",
            EdgeKind::Mutes => "mutes",
        }
    }
}

impl TryFrom<&str> for EdgeKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "follows" => Ok(EdgeKind::Follows),
            "blocks" => Ok(EdgeKind::Blocks),
            "mutes" => Ok(EdgeKind::Mutes),
            _ => Err(()),
        }
    }
}

/// Behavioral origin of an interest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Like,
    Post,
    Follow,
    Profile,
}

impl SignalSource {
    pub const ALL: [SignalSource; 4] = [
        SignalSource::Like,
        SignalSource::Post,
        SignalSource::Follow,
        SignalSource::Profile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalSource::Like => "like",
            SignalSource::Post => "post",
            SignalSource::Follow => "follow",
            SignalSource::Profile => "profile",
        }
    }
}

impl TryFrom<&str> for SignalSource {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "like" => Ok(SignalSource::Like),
            "post" => Ok(SignalSource::Post),
            "follow" => Ok(SignalSource::Follow),
            "profile" => Ok(SignalSource::Profile),
            _ => Err(()),
        }
    }
}

/// Why a candidate entered a feed. Declaration order is merge priority:
/// `Following` wins over `Interest`, which wins over `Trending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedReason {
    Following,
    Interest,
    Trending,
}

impl FeedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedReason::Following => "following",
            FeedReason::Interest => "interest",
            FeedReason::Trending => "trending",
        }
    }

    /// Returns true when `self` should replace `other` for the same post.
    pub fn outranks(self, other: FeedReason) -> bool {
        self < other
    }
}

impl TryFrom<&str> for FeedReason {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "following" => Ok(FeedReason::Following),
            "interest" => Ok(FeedReason::Interest),
            "trending" => Ok(FeedReason::Trending),
            _ => Err(()),
        }
    }
}

impl From<FeedReason> for reverie_api_types::FeedReason {
    fn from(reason: FeedReason) -> Self {
        match reason {
            FeedReason::Following => reverie_api_types::FeedReason::Following,
            FeedReason::Interest => reverie_api_types::FeedReason::Interest,
            FeedReason::Trending => reverie_api_types::FeedReason::Trending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_priority_prefers_following() {
        assert!(FeedReason::Following.outranks(FeedReason::Interest));
        assert!(FeedReason::Interest.outranks(FeedReason::Trending));
        assert!(!FeedReason::Trending.outranks(FeedReason::Following));
        assert!(!FeedReason::Interest.outranks(FeedReason::Interest));
    }

    #[test]
    fn column_values_round_trip() {
        for kind in [EdgeKind::Follows, EdgeKind::Blocks, EdgeKind::Mutes] {
            assert_eq!(EdgeKind::try_from(kind.as_str()), Ok(kind));
        }
        for source in SignalSource::ALL {
            assert_eq!(SignalSource::try_from(source.as_str()), Ok(source));
        }
        assert!(FeedReason::try_from("pinned").is_err());
    }
}
