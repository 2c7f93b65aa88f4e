//! Daily totals and the live aggregation used for every budget decision.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket::Bucket;
use crate::timer::TimerMap;

/// Milliseconds folded in per bucket for one calendar day.
///
/// Only ever mutated by folding a terminated or rolled-over timer's
/// accumulated time; records for past days are immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayTotals(BTreeMap<Bucket, i64>);

impl DayTotals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folded milliseconds for `bucket`; zero when the bucket has no
    /// activity.
    #[must_use]
    pub fn get(&self, bucket: Bucket) -> i64 {
        self.0.get(&bucket).copied().unwrap_or(0)
    }

    /// Folds `ms` into the bucket's total.
    pub fn add(&mut self, bucket: Bucket, ms: i64) {
        if ms > 0 {
            *self.0.entry(bucket).or_insert(0) += ms;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates recorded buckets and their totals.
    pub fn iter(&self) -> impl Iterator<Item = (Bucket, i64)> + '_ {
        self.0.iter().map(|(b, ms)| (*b, *ms))
    }
}

/// Computes today's per-bucket totals: folded day totals plus the live
/// contribution of every tracked timer (running timers include the
/// interval since their anchor).
///
/// This is the single source of truth consulted before any block or
/// unblock decision. It is recomputed on every call; running timers
/// advance continuously with the wall clock, so the result must never be
/// cached.
#[must_use]
pub fn live_totals(day: &DayTotals, timers: &TimerMap, now: DateTime<Utc>) -> BTreeMap<Bucket, i64> {
    let mut totals: BTreeMap<Bucket, i64> = Bucket::ALL.iter().map(|b| (*b, 0)).collect();
    for (bucket, ms) in day.iter() {
        *totals.entry(bucket).or_insert(0) += ms;
    }
    for timer in timers.values() {
        *totals.entry(timer.bucket).or_insert(0) += timer.live_ms(now);
    }
    totals
}
