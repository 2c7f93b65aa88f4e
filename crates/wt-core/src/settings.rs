//! User-configured budgets and classifier keyword lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bucket::Bucket;

const MS_PER_MINUTE: i64 = 60_000;

/// User settings mirrored from the durable store.
///
/// Owned by the external settings editor; the engine only reads a cached
/// copy. Limits are configured in minutes and compared in milliseconds.
/// A bucket absent from `limit_minutes` has no budget and never blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Daily budget per bucket, in minutes.
    #[serde(default)]
    pub limit_minutes: BTreeMap<Bucket, i64>,

    /// Keyword lists consumed by the external title classifier. Stored
    /// here so the editor and classifier share one record; the engine
    /// never interprets them.
    #[serde(default)]
    pub keywords: BTreeMap<Bucket, Vec<String>>,
}

impl Default for Settings {
    /// Budgets applied when no settings have ever been saved.
    fn default() -> Self {
        let mut limit_minutes = BTreeMap::new();
        limit_minutes.insert(Bucket::Trash, 30);
        limit_minutes.insert(Bucket::Interesting, 90);
        Self {
            limit_minutes,
            keywords: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// The bucket's budget in milliseconds, or `None` when unenforced.
    #[must_use]
    pub fn limit_ms(&self, bucket: Bucket) -> Option<i64> {
        self.limit_minutes
            .get(&bucket)
            .map(|minutes| minutes.saturating_mul(MS_PER_MINUTE))
    }

    /// Whether `spent_ms` is at or over the bucket's budget.
    #[must_use]
    pub fn is_over(&self, bucket: Bucket, spent_ms: i64) -> bool {
        self.limit_ms(bucket).is_some_and(|limit| spent_ms >= limit)
    }

    /// Sets the bucket's budget in minutes.
    pub fn set_limit_minutes(&mut self, bucket: Bucket, minutes: i64) {
        self.limit_minutes.insert(bucket, minutes);
    }

    /// Removes the bucket's budget, leaving it unenforced.
    pub fn clear_limit(&mut self, bucket: Bucket) {
        self.limit_minutes.remove(&bucket);
    }
}
