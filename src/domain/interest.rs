//! Exponential interest decay and tag aggregation.

use std::collections::HashMap;

use time::{Duration, OffsetDateTime};

use crate::domain::entities::InterestEntryRecord;
use crate::domain::types::SignalSource;

/// Entries whose decayed score falls below this are logically deleted.
pub const MIN_SCORE: f64 = 0.01;

/// Per-source half-lives. `None` means the source never decays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPolicy {
    pub like: Option<Duration>,
    pub post: Option<Duration>,
    pub follow: Option<Duration>,
    pub profile: Option<Duration>,
    /// Decayed scores below this are treated as deleted.
    pub epsilon: f64,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            like: Some(Duration::days(14)),
            post: Some(Duration::days(30)),
            follow: Some(Duration::days(21)),
            profile: None,
            epsilon: MIN_SCORE,
        }
    }
}

impl DecayPolicy {
    pub fn half_life(&self, source: SignalSource) -> Option<Duration> {
        match source {
            SignalSource::Like => self.like,
            SignalSource::Post => self.post,
            SignalSource::Follow => self.follow,
            SignalSource::Profile => self.profile,
        }
    }

    /// Current value of `entry`, or `None` once it has decayed below epsilon.
    pub fn live_score(&self, entry: &InterestEntryRecord, now: OffsetDateTime) -> Option<f64> {
        let current = decayed_score(
            entry.score,
            entry.updated_at,
            self.half_life(entry.source),
            now,
        );
        (current >= self.epsilon).then_some(current)
    }
}

/// `0.5 ^ (elapsed / half_life)`; negative elapsed time counts as zero.
pub fn decay_factor(elapsed: Duration, half_life: Option<Duration>) -> f64 {
    let Some(half_life) = half_life else {
        return 1.0;
    };
    let half_life_secs = half_life.as_seconds_f64();
    if half_life_secs <= 0.0 {
        return 1.0;
    }
    let elapsed_secs = elapsed.as_seconds_f64().max(0.0);
    0.5_f64.powf(elapsed_secs / half_life_secs)
}

/// Current value of a stored score last written at `updated_at`.
pub fn decayed_score(
    score: f64,
    updated_at: OffsetDateTime,
    half_life: Option<Duration>,
    now: OffsetDateTime,
) -> f64 {
    score * decay_factor(now - updated_at, half_life)
}

/// `old * decay(Δt) + weight`, the additive merge for one `(user, tag, source)` row.
pub fn merged_score(
    old: Option<(f64, OffsetDateTime)>,
    weight: f64,
    half_life: Option<Duration>,
    now: OffsetDateTime,
) -> f64 {
    let carried = old
        .map(|(score, updated_at)| decayed_score(score, updated_at, half_life, now))
        .unwrap_or(0.0);
    carried + weight
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagScore {
    pub tag: String,
    pub score: f64,
}

/// Decay every entry to `now`, drop those under the policy's epsilon, and sum per tag.
///
/// The result is ordered by score descending, then tag ascending.
pub fn aggregate_tags(
    entries: &[InterestEntryRecord],
    policy: &DecayPolicy,
    now: OffsetDateTime,
) -> Vec<TagScore> {
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for entry in entries {
        let Some(current) = policy.live_score(entry, now) else {
            continue;
        };
        *totals.entry(entry.tag.as_str()).or_insert(0.0) += current;
    }

    let mut tags: Vec<TagScore> = totals
        .into_iter()
        .map(|(tag, score)| TagScore {
            tag: tag.to_string(),
            score,
        })
        .collect();
    tags.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.tag.cmp(&b.tag)));
    tags
}

/// Normalise a free-form tag: trimmed, lowercased, no leading `#`.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('#').trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(tag: &str, score: f64, source: SignalSource, at: OffsetDateTime) -> InterestEntryRecord {
        InterestEntryRecord {
            user_id: Uuid::nil(),
            tag: tag.to_string(),
            score,
            source,
            updated_at: at,
        }
    }

    #[test]
    fn one_half_life_halves_the_score() {
        let factor = decay_factor(Duration::days(14), Some(Duration::days(14)));
        assert!((factor - 0.5).abs() < 1e-12);
    }

    #[test]
    fn missing_half_life_never_decays() {
        assert_eq!(decay_factor(Duration::days(3650), None), 1.0);
    }

    #[test]
    fn clock_skew_does_not_inflate_scores() {
        assert_eq!(decay_factor(Duration::hours(-5), Some(Duration::days(1))), 1.0);
    }

    #[test]
    fn merge_adds_weight_to_decayed_score() {
        let now = OffsetDateTime::now_utc();
        let merged = merged_score(
            Some((2.0, now - Duration::days(14))),
            1.0,
            Some(Duration::days(14)),
            now,
        );
        assert!((merged - 2.0).abs() < 1e-9);
        assert_eq!(merged_score(None, 3.0, None, now), 3.0);
    }

    #[test]
    fn aggregation_sums_sources_and_orders_deterministically() {
        let now = OffsetDateTime::now_utc();
        let policy = DecayPolicy::default();
        let entries = vec![
            entry("travel", 1.0, SignalSource::Like, now),
            entry("travel", 3.0, SignalSource::Profile, now),
            entry("ai", 4.0, SignalSource::Post, now),
            entry("zen", 4.0, SignalSource::Profile, now),
        ];

        let tags = aggregate_tags(&entries, &policy, now);
        let names: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["ai", "travel", "zen"]);
        assert!((tags[1].score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn aggregation_drops_entries_below_epsilon() {
        let now = OffsetDateTime::now_utc();
        let policy = DecayPolicy::default();
        let old = now - Duration::days(14 * 10);
        let entries = vec![entry("stale", 1.0, SignalSource::Like, old)];
        assert!(aggregate_tags(&entries, &policy, now).is_empty());
    }

    #[test]
    fn decay_is_strictly_monotonic_until_epsilon() {
        let start = OffsetDateTime::now_utc();
        let policy = DecayPolicy::default();
        let entries = vec![entry("travel", 5.0, SignalSource::Like, start)];

        let mut previous = f64::INFINITY;
        for day in 0..400 {
            let tags = aggregate_tags(&entries, &policy, start + Duration::days(day));
            match tags.first() {
                Some(tag) => {
                    assert!(tag.score < previous, "day {day} did not decay");
                    previous = tag.score;
                }
                None => {
                    assert!(previous * 0.5_f64.powf(1.0 / 14.0) < MIN_SCORE + 1e-9);
                    return;
                }
            }
        }
        panic!("score never dropped below epsilon");
    }

    #[test]
    fn tags_are_normalized() {
        assert_eq!(normalize_tag("  #Travel "), Some("travel".to_string()));
        assert_eq!(normalize_tag("#"), None);
    }
}
