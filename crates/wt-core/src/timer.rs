//! Per-tab timer state, the central mutable record of the engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket::Bucket;

/// Opaque handle for one open viewing tab.
///
/// Assigned externally (by the browser side); stable only while the tab
/// exists. The engine never interprets the value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable timer record for one tab.
///
/// `running_since` is the accrual anchor: `Some` means the clock is
/// running, `None` means paused. A paused record with zero accumulated
/// time marks a tab whose bucket was already over budget when it was
/// categorized; no clock ever started for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    /// Bucket this tab's time is attributed to.
    pub bucket: Bucket,

    /// Milliseconds already counted toward today, not yet folded into
    /// the daily totals.
    #[serde(default)]
    pub accumulated_ms: i64,

    /// When the current running interval started; `None` while paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_since: Option<DateTime<Utc>>,
}

impl TimerState {
    /// A timer accruing time from `now`.
    #[must_use]
    pub const fn running(bucket: Bucket, now: DateTime<Utc>) -> Self {
        Self {
            bucket,
            accumulated_ms: 0,
            running_since: Some(now),
        }
    }

    /// A non-running marker for a tab categorized into an over-budget
    /// bucket. Exists so the status handshake can later confirm the
    /// block.
    #[must_use]
    pub const fn tainted(bucket: Bucket) -> Self {
        Self {
            bucket,
            accumulated_ms: 0,
            running_since: None,
        }
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Accumulated time plus the live contribution of the current
    /// running interval, if any. Clock skew never produces negative
    /// contributions.
    #[must_use]
    pub fn live_ms(&self, now: DateTime<Utc>) -> i64 {
        let running = self
            .running_since
            .map_or(0, |since| (now - since).num_milliseconds().max(0));
        self.accumulated_ms + running
    }

    /// Folds the current running interval into `accumulated_ms` and
    /// pauses. No-op when already paused.
    pub fn pause(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.running_since.take() {
            self.accumulated_ms += (now - since).num_milliseconds().max(0);
        }
    }

    /// Restarts the clock at `now`. No-op when already running.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }
}

/// The full timer store value: every tracked tab and its timer.
///
/// Mutating operations always rewrite the whole map, so concurrent
/// writers resolve to last-writer-wins on a consistent object.
pub type TimerMap = BTreeMap<TabId, TimerState>;

/// Pauses every timer except `keep`, folding their running intervals.
///
/// Returns the ids that were actually running. Safe to re-run.
pub fn pause_all_except(timers: &mut TimerMap, keep: Option<TabId>, now: DateTime<Utc>) -> Vec<TabId> {
    let mut paused = Vec::new();
    for (tab, timer) in timers.iter_mut() {
        if Some(*tab) == keep {
            continue;
        }
        if timer.is_running() {
            timer.pause(now);
            paused.push(*tab);
        }
    }
    paused
}

/// Number of timers currently running. The engine maintains this at most
/// one; the helper exists so tests can assert the invariant.
#[must_use]
pub fn running_count(timers: &TimerMap) -> usize {
    timers.values().filter(|t| t.is_running()).count()
}
