//! Three-resolution timestamp horizon kept at every trie node.
//!
//! Grounded on `original_source/stages/typing/typing.py`'s
//! `aggregate_timestamps` (short/medium/long lists, "age exceeds" bucket
//! promotion), spec.md §4.4.5. Implemented as a two-pass drain-from-head
//! scan rather than mutate-while-iterating, per spec.md §9's explicit
//! redesign flag.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimestampHorizon {
    short: Vec<DateTime<Utc>>,
    medium: Vec<(DateTime<Utc>, u64)>,
    long: Vec<(DateTime<Utc>, u64)>,
}

impl TimestampHorizon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, ts: DateTime<Utc>) {
        self.short.push(ts);
    }

    pub fn short_len(&self) -> u64 {
        self.short.len() as u64
    }

    pub fn medium_total(&self) -> u64 {
        self.medium.iter().map(|(_, c)| c).sum()
    }

    pub fn long_total(&self) -> u64 {
        self.long.iter().map(|(_, c)| c).sum()
    }

    pub fn total(&self) -> u64 {
        self.short_len() + self.medium_total() + self.long_total()
    }

    /// Runs short→medium→long aggregation with reference time `now`.
    /// Idempotent: calling this twice with the same `now` is a no-op the
    /// second time.
    pub fn aggregate(
        &mut self,
        now: DateTime<Utc>,
        short_horizon: Duration,
        medium_horizon: Duration,
        long_horizon: Duration,
    ) {
        let short_horizon = to_chrono(short_horizon);
        let medium_horizon = to_chrono(medium_horizon);
        let long_horizon = to_chrono(long_horizon);

        promote_short_to_medium(&mut self.short, &mut self.medium, now, short_horizon);
        promote_medium_to_long(&mut self.medium, &mut self.long, now, medium_horizon);
        self.long.retain(|(t, _)| now - *t <= long_horizon);
    }
}

fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::zero())
}

/// Short-term entries are append-ordered oldest-first. Scan from the head:
/// anything within the horizon, and everything after it, stays.
fn promote_short_to_medium(
    short: &mut Vec<DateTime<Utc>>,
    medium: &mut Vec<(DateTime<Utc>, u64)>,
    now: DateTime<Utc>,
    short_horizon: ChronoDuration,
) {
    let split_at = short
        .iter()
        .position(|t| now - *t <= short_horizon)
        .unwrap_or(short.len());
    let evicted: Vec<DateTime<Utc>> = short.drain(..split_at).collect();
    for t in evicted {
        bucket_into(medium, t, short_horizon);
    }
}

fn promote_medium_to_long(
    medium: &mut Vec<(DateTime<Utc>, u64)>,
    long: &mut Vec<(DateTime<Utc>, u64)>,
    now: DateTime<Utc>,
    medium_horizon: ChronoDuration,
) {
    let split_at = medium
        .iter()
        .position(|(t, _)| now - *t <= medium_horizon)
        .unwrap_or(medium.len());
    let evicted: Vec<(DateTime<Utc>, u64)> = medium.drain(..split_at).collect();
    for (t, count) in evicted {
        bucket_into_counted(long, t, count, medium_horizon);
    }
}

fn bucket_into(buckets: &mut Vec<(DateTime<Utc>, u64)>, t: DateTime<Utc>, width: ChronoDuration) {
    bucket_into_counted(buckets, t, 1, width)
}

fn bucket_into_counted(
    buckets: &mut Vec<(DateTime<Utc>, u64)>,
    t: DateTime<Utc>,
    count: u64,
    width: ChronoDuration,
) {
    match buckets.last_mut() {
        Some((last_t, last_count)) if (t - *last_t).abs() <= width => {
            *last_count += count;
        }
        _ => buckets.push((t, count)),
    }
}
