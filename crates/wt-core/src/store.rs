//! Durable store port.
//!
//! All engine state lives behind this trait; the hosting process keeps no
//! authoritative copy in memory. Implementations must make each method a
//! single whole-value read or write so that racing operations resolve to
//! last-writer-wins on a consistent object, and must make the two
//! `commit_*` methods atomic (all keys or none).

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::settings::Settings;
use crate::stats::DayTotals;
use crate::timer::TimerMap;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error from the underlying backend.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A persisted record failed to deserialize.
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Wraps a backend error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Crash-safe asynchronous persistence for the engine's records.
///
/// Persisted keys: the user settings, the live timer map, per-day bucket
/// totals keyed by calendar date, and the last calendar date the engine
/// observed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Loads settings; `None` when never saved.
    async fn load_settings(&self) -> Result<Option<Settings>, StoreError>;

    /// Overwrites the settings record. Only the settings editor calls
    /// this; the engine merely mirrors the record.
    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError>;

    /// Loads the full timer map; empty when nothing is tracked.
    async fn load_timers(&self) -> Result<TimerMap, StoreError>;

    /// Overwrites the full timer map.
    async fn save_timers(&self, timers: &TimerMap) -> Result<(), StoreError>;

    /// Loads one day's folded totals; empty when the day has none.
    async fn load_day(&self, date: NaiveDate) -> Result<DayTotals, StoreError>;

    /// The last calendar date the engine observed, if any.
    async fn last_seen_date(&self) -> Result<Option<NaiveDate>, StoreError>;

    /// Atomically writes one day's totals together with the timer map.
    /// Used when a stopped timer folds its time into the daily record,
    /// so a crash cannot double-count or drop the folded interval.
    async fn commit_fold(
        &self,
        date: NaiveDate,
        totals: &DayTotals,
        timers: &TimerMap,
    ) -> Result<(), StoreError>;

    /// Atomically writes the day-boundary migration: the previous day's
    /// folded totals (when a previous date was known), the reset timer
    /// map, and the new date marker.
    async fn commit_rollover(
        &self,
        folded: Option<(NaiveDate, &DayTotals)>,
        timers: &TimerMap,
        today: NaiveDate,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for &S {
    async fn load_settings(&self) -> Result<Option<Settings>, StoreError> {
        (**self).load_settings().await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        (**self).save_settings(settings).await
    }

    async fn load_timers(&self) -> Result<TimerMap, StoreError> {
        (**self).load_timers().await
    }

    async fn save_timers(&self, timers: &TimerMap) -> Result<(), StoreError> {
        (**self).save_timers(timers).await
    }

    async fn load_day(&self, date: NaiveDate) -> Result<DayTotals, StoreError> {
        (**self).load_day(date).await
    }

    async fn last_seen_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        (**self).last_seen_date().await
    }

    async fn commit_fold(
        &self,
        date: NaiveDate,
        totals: &DayTotals,
        timers: &TimerMap,
    ) -> Result<(), StoreError> {
        (**self).commit_fold(date, totals, timers).await
    }

    async fn commit_rollover(
        &self,
        folded: Option<(NaiveDate, &DayTotals)>,
        timers: &TimerMap,
        today: NaiveDate,
    ) -> Result<(), StoreError> {
        (**self).commit_rollover(folded, timers, today).await
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn load_settings(&self) -> Result<Option<Settings>, StoreError> {
        (**self).load_settings().await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        (**self).save_settings(settings).await
    }

    async fn load_timers(&self) -> Result<TimerMap, StoreError> {
        (**self).load_timers().await
    }

    async fn save_timers(&self, timers: &TimerMap) -> Result<(), StoreError> {
        (**self).save_timers(timers).await
    }

    async fn load_day(&self, date: NaiveDate) -> Result<DayTotals, StoreError> {
        (**self).load_day(date).await
    }

    async fn last_seen_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        (**self).last_seen_date().await
    }

    async fn commit_fold(
        &self,
        date: NaiveDate,
        totals: &DayTotals,
        timers: &TimerMap,
    ) -> Result<(), StoreError> {
        (**self).commit_fold(date, totals, timers).await
    }

    async fn commit_rollover(
        &self,
        folded: Option<(NaiveDate, &DayTotals)>,
        timers: &TimerMap,
        today: NaiveDate,
    ) -> Result<(), StoreError> {
        (**self).commit_rollover(folded, timers, today).await
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: tokio::sync::Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    settings: Option<Settings>,
    timers: TimerMap,
    days: std::collections::BTreeMap<NaiveDate, DayTotals>,
    last_date: Option<NaiveDate>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read of a day record, for assertions in tests.
    pub async fn day(&self, date: NaiveDate) -> DayTotals {
        self.inner.lock().await.days.get(&date).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_settings(&self) -> Result<Option<Settings>, StoreError> {
        Ok(self.inner.lock().await.settings.clone())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.inner.lock().await.settings = Some(settings.clone());
        Ok(())
    }

    async fn load_timers(&self) -> Result<TimerMap, StoreError> {
        Ok(self.inner.lock().await.timers.clone())
    }

    async fn save_timers(&self, timers: &TimerMap) -> Result<(), StoreError> {
        self.inner.lock().await.timers = timers.clone();
        Ok(())
    }

    async fn load_day(&self, date: NaiveDate) -> Result<DayTotals, StoreError> {
        Ok(self.inner.lock().await.days.get(&date).cloned().unwrap_or_default())
    }

    async fn last_seen_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.inner.lock().await.last_date)
    }

    async fn commit_fold(
        &self,
        date: NaiveDate,
        totals: &DayTotals,
        timers: &TimerMap,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.days.insert(date, totals.clone());
        inner.timers = timers.clone();
        Ok(())
    }

    async fn commit_rollover(
        &self,
        folded: Option<(NaiveDate, &DayTotals)>,
        timers: &TimerMap,
        today: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some((date, totals)) = folded {
            inner.days.insert(date, totals.clone());
        }
        inner.timers = timers.clone();
        inner.last_date = Some(today);
        Ok(())
    }
}
