//! The session timer and limit enforcement engine.
//!
//! One engine instance owns the durable timer store, the daily totals,
//! and the settings mirror. Every operation is a whole-value
//! read-modify-write against the store; nothing authoritative is kept in
//! process memory between operations except the settings cache, which is
//! re-validated at the start of every operation that reads budgets.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::agent::{AgentCommand, AgentTransport, EnforcementAction};
use crate::bucket::Bucket;
use crate::clock::Clock;
use crate::request::{Request, Response, StartOutcome};
use crate::settings::Settings;
use crate::stats::live_totals;
use crate::store::{Store, StoreError};
use crate::timer::{self, TabId, TimerMap, TimerState};

/// Engine errors. Inbound request handling never surfaces these to the
/// caller; they are logged and answered with a degraded response.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a resume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The timer is running (it may already have been).
    Resumed,
    /// The bucket crossed its budget while the timer was paused; the
    /// timer stays paused and a block was pushed.
    Refused,
    /// No timer exists for the tab.
    Untracked,
}

/// Settings mirror with an explicit load contract.
///
/// The hosting process can be torn down between any two operations,
/// resetting this cache to empty; `ensure_loaded` must therefore run at
/// the start of every operation that reads budgets. A missing or
/// malformed settings record falls back to defaults and is never fatal.
#[derive(Debug, Default)]
pub struct SettingsCache {
    cached: Option<Settings>,
}

impl SettingsCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from the store if the cache is empty.
    pub async fn ensure_loaded<S: Store>(&mut self, store: &S) {
        if self.cached.is_none() {
            self.reload(store).await;
        }
    }

    /// Unconditionally re-reads settings from the store.
    pub async fn reload<S: Store>(&mut self, store: &S) {
        match store.load_settings().await {
            Ok(Some(settings)) => self.cached = Some(settings),
            Ok(None) => {
                tracing::debug!("no settings saved, using defaults");
                self.cached = Some(Settings::default());
            }
            Err(err) => {
                tracing::warn!(%err, "failed to load settings, using defaults");
                self.cached = Some(Settings::default());
            }
        }
    }

    /// The cached settings, defaulting when nothing was ever loaded.
    pub fn get(&mut self) -> &Settings {
        self.cached.get_or_insert_with(Settings::default)
    }
}

/// The timer lifecycle controller, day-rollover manager, proactive sweep,
/// and enforcement protocol, over a durable store and an outbound agent
/// transport.
pub struct Engine<S, T, C> {
    store: S,
    transport: T,
    clock: C,
    settings: SettingsCache,
}

impl<S: Store, T: AgentTransport, C: Clock> Engine<S, T, C> {
    pub fn new(store: S, transport: T, clock: C) -> Self {
        Self {
            store,
            transport,
            clock,
            settings: SettingsCache::new(),
        }
    }

    /// The underlying store, for read-only callers sharing the engine's
    /// handle.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Re-reads the settings mirror. Call when the store reports the
    /// settings record changed.
    pub async fn reload_settings(&mut self) {
        self.settings.reload(&self.store).await;
    }

    /// Begins tracking `tab` in `bucket`.
    ///
    /// Soft-fails when the tab is already tracked. When the bucket is
    /// already at or over budget, writes a tainted non-running timer
    /// (so the status handshake can later confirm the block), pushes a
    /// block command best-effort, and never starts the clock. Otherwise
    /// pauses every other timer and starts a fresh running one.
    pub async fn start_timer(
        &mut self,
        tab: TabId,
        bucket: Bucket,
    ) -> Result<StartOutcome, EngineError> {
        self.settings.ensure_loaded(&self.store).await;
        let now = self.clock.now();

        let mut timers = self.store.load_timers().await?;
        if timers.contains_key(&tab) {
            tracing::debug!(%tab, "timer already exists, ignoring start");
            return Ok(StartOutcome::AlreadyTracked);
        }

        let spent = self.spent_today(&timers, bucket).await?;
        if self.settings.get().is_over(bucket, spent) {
            timers.insert(tab, TimerState::tainted(bucket));
            self.store.save_timers(&timers).await?;
            tracing::info!(%tab, %bucket, spent_ms = spent, "bucket over budget, blocking");
            self.push(tab, AgentCommand::BlockVideo).await;
            return Ok(StartOutcome::Blocked);
        }

        timer::pause_all_except(&mut timers, None, now);
        timers.insert(tab, TimerState::running(bucket, now));
        self.store.save_timers(&timers).await?;
        tracing::debug!(%tab, %bucket, "timer started");
        Ok(StartOutcome::Started)
    }

    /// Pauses the tab's timer, folding the running interval. Idempotent;
    /// a no-op for paused or untracked tabs.
    pub async fn pause(&mut self, tab: TabId) -> Result<(), EngineError> {
        let now = self.clock.now();
        let mut timers = self.store.load_timers().await?;
        if let Some(timer) = timers.get_mut(&tab) {
            if timer.is_running() {
                timer.pause(now);
                self.store.save_timers(&timers).await?;
                tracing::debug!(%tab, "timer paused");
            }
        }
        Ok(())
    }

    /// Resumes the tab's paused timer, unless its bucket crossed the
    /// budget in the meantime; in that case the timer stays paused and a
    /// block is pushed.
    pub async fn resume(&mut self, tab: TabId) -> Result<ResumeOutcome, EngineError> {
        self.settings.ensure_loaded(&self.store).await;
        let now = self.clock.now();

        let mut timers = self.store.load_timers().await?;
        let Some(timer) = timers.get(&tab) else {
            return Ok(ResumeOutcome::Untracked);
        };
        if timer.is_running() {
            return Ok(ResumeOutcome::Resumed);
        }
        let bucket = timer.bucket;

        let spent = self.spent_today(&timers, bucket).await?;
        if self.settings.get().is_over(bucket, spent) {
            tracing::info!(%tab, %bucket, spent_ms = spent, "refusing resume, bucket over budget");
            self.push(tab, AgentCommand::BlockVideo).await;
            return Ok(ResumeOutcome::Refused);
        }

        if let Some(timer) = timers.get_mut(&tab) {
            timer.resume(now);
        }
        self.store.save_timers(&timers).await?;
        tracing::debug!(%tab, "timer resumed");
        Ok(ResumeOutcome::Resumed)
    }

    /// Handles a surface-activation event: pauses every other timer,
    /// then resumes the newly active tab (subject to its budget check).
    pub async fn activate(&mut self, tab: TabId) -> Result<ResumeOutcome, EngineError> {
        let now = self.clock.now();
        let mut timers = self.store.load_timers().await?;
        let paused = timer::pause_all_except(&mut timers, Some(tab), now);
        if !paused.is_empty() {
            self.store.save_timers(&timers).await?;
        }
        self.resume(tab).await
    }

    /// Stops tracking the tab: folds any running interval, folds nonzero
    /// accumulated time into today's totals, and deletes the timer.
    /// Idempotent; a second stop is a no-op.
    pub async fn stop(&mut self, tab: TabId) -> Result<(), EngineError> {
        let now = self.clock.now();
        let today = self.clock.today();

        let mut timers = self.store.load_timers().await?;
        let Some(mut timer) = timers.remove(&tab) else {
            return Ok(());
        };
        timer.pause(now);

        if timer.accumulated_ms > 0 {
            let mut day = self.store.load_day(today).await?;
            day.add(timer.bucket, timer.accumulated_ms);
            self.store.commit_fold(today, &day, &timers).await?;
            tracing::debug!(%tab, bucket = %timer.bucket, folded_ms = timer.accumulated_ms, "timer stopped");
        } else {
            self.store.save_timers(&timers).await?;
            tracing::debug!(%tab, "zero-duration timer discarded");
        }
        Ok(())
    }

    /// Pauses every timer except the named one.
    pub async fn pause_all_except(&mut self, keep: Option<TabId>) -> Result<(), EngineError> {
        let now = self.clock.now();
        let mut timers = self.store.load_timers().await?;
        let paused = timer::pause_all_except(&mut timers, keep, now);
        if !paused.is_empty() {
            self.store.save_timers(&timers).await?;
        }
        Ok(())
    }

    /// Answers a tab's polling handshake using the same budget decision
    /// as the push path. Unknown or unidentifiable senders are answered
    /// with unblock: a false block with no recourse is worse than a
    /// brief unblock.
    pub async fn check_status(
        &mut self,
        tab: Option<TabId>,
    ) -> Result<EnforcementAction, EngineError> {
        self.settings.ensure_loaded(&self.store).await;
        let Some(tab) = tab else {
            tracing::debug!("status query without a sender tab, answering unblock");
            return Ok(EnforcementAction::Unblock);
        };
        let now = self.clock.now();

        let mut timers = self.store.load_timers().await?;
        let Some(timer) = timers.get(&tab) else {
            return Ok(EnforcementAction::Unblock);
        };
        let bucket = timer.bucket;

        let spent = self.spent_today(&timers, bucket).await?;
        if self.settings.get().is_over(bucket, spent) {
            // Answering block stops further accrual.
            if let Some(timer) = timers.get_mut(&tab) {
                if timer.is_running() {
                    timer.pause(now);
                    self.store.save_timers(&timers).await?;
                }
            }
            tracing::debug!(%tab, %bucket, spent_ms = spent, "handshake answered block");
            return Ok(EnforcementAction::Block);
        }
        Ok(EnforcementAction::Unblock)
    }

    /// Today's totals in milliseconds and the configured limits in
    /// minutes.
    pub async fn live_stats(
        &mut self,
    ) -> Result<(BTreeMap<Bucket, i64>, BTreeMap<Bucket, i64>), EngineError> {
        self.settings.ensure_loaded(&self.store).await;
        let now = self.clock.now();
        let today = self.clock.today();

        let timers = self.store.load_timers().await?;
        let day = self.store.load_day(today).await?;
        let stats = live_totals(&day, &timers, now);
        let limits = self.settings.get().limit_minutes.clone();
        Ok((stats, limits))
    }

    /// The bucket a tab is tracked under, if any.
    pub async fn tab_status(&mut self, tab: TabId) -> Result<Option<Bucket>, EngineError> {
        let timers = self.store.load_timers().await?;
        Ok(timers.get(&tab).map(|t| t.bucket))
    }

    /// Periodic tick: settings hot-reload, then day rollover, then the
    /// proactive sweep, in that order.
    pub async fn tick(&mut self) -> Result<(), EngineError> {
        // The store has no change feed, so the mirror is refreshed once
        // per tick.
        self.settings.reload(&self.store).await;
        let crossed_boundary = self.rollover().await?;
        self.sweep(crossed_boundary).await
    }

    /// Dispatches one inbound request. Always answers: store failures
    /// are logged and mapped to a degraded response rather than raised.
    pub async fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::StartTimer { tab_id, bucket } => {
                match self.start_timer(tab_id, bucket).await {
                    Ok(outcome) => Response::from_start(outcome),
                    Err(err) => {
                        tracing::error!(%err, tab = %tab_id, "startTimer failed");
                        Response::Start {
                            success: false,
                            blocked: false,
                        }
                    }
                }
            }
            Request::GetLiveStats => match self.live_stats().await {
                Ok((stats, limits)) => Response::LiveStats { stats, limits },
                Err(err) => {
                    tracing::error!(%err, "getLiveStats failed");
                    Response::LiveStats {
                        stats: BTreeMap::new(),
                        limits: BTreeMap::new(),
                    }
                }
            },
            Request::CheckMyStatus { tab_id } => {
                let action = match self.check_status(tab_id).await {
                    Ok(action) => action,
                    Err(err) => {
                        tracing::error!(%err, "checkMyStatus failed, answering unblock");
                        EnforcementAction::Unblock
                    }
                };
                Response::Status { action }
            }
            Request::GetTabStatus { tab_id } => {
                let bucket = match self.tab_status(tab_id).await {
                    Ok(bucket) => bucket,
                    Err(err) => {
                        tracing::error!(%err, tab = %tab_id, "getTabStatus failed");
                        None
                    }
                };
                Response::TabStatus { bucket }
            }
        }
    }

    /// Detects a day boundary and migrates in-flight timer state across
    /// it. Returns whether a boundary was crossed.
    ///
    /// Time accrued before midnight is folded into the *previous*
    /// observed date's totals; accumulators reset to zero and running
    /// clocks restart at `now` so post-midnight time accrues under the
    /// new date. The whole migration is one atomic store commit, so a
    /// process death in the middle re-runs it without double-counting.
    async fn rollover(&mut self) -> Result<bool, EngineError> {
        let today = self.clock.today();
        let last = self.store.last_seen_date().await?;
        if last == Some(today) {
            return Ok(false);
        }
        let now = self.clock.now();
        let mut timers = self.store.load_timers().await?;

        match last {
            None => {
                // First run ever: no previous day to attribute to.
                reset_timers(&mut timers, now);
                self.store.commit_rollover(None, &timers, today).await?;
                tracing::info!(%today, "first run, date marker initialized");
            }
            Some(prev) => {
                let mut day = self.store.load_day(prev).await?;
                for timer in timers.values_mut() {
                    if timer.accumulated_ms > 0 {
                        day.add(timer.bucket, timer.accumulated_ms);
                    }
                }
                reset_timers(&mut timers, now);
                self.store
                    .commit_rollover(Some((prev, &day)), &timers, today)
                    .await?;
                tracing::info!(%prev, %today, "day rollover complete");
            }
        }
        Ok(true)
    }

    /// Pauses and blocks every timer whose bucket is at or over budget.
    /// When `unblock_under` is set (right after a day rollover), tabs in
    /// under-budget buckets are pushed an unblock so agents converge
    /// without waiting for their next poll.
    async fn sweep(&mut self, unblock_under: bool) -> Result<(), EngineError> {
        self.settings.ensure_loaded(&self.store).await;
        let now = self.clock.now();
        let today = self.clock.today();

        let mut timers = self.store.load_timers().await?;
        if timers.is_empty() {
            return Ok(());
        }
        let day = self.store.load_day(today).await?;
        let totals = live_totals(&day, &timers, now);
        let settings = self.settings.get().clone();

        let mut blocked = Vec::new();
        let mut unblocked = Vec::new();
        let mut dirty = false;
        for (tab, timer) in &mut timers {
            let spent = totals.get(&timer.bucket).copied().unwrap_or(0);
            if settings.is_over(timer.bucket, spent) {
                if timer.is_running() {
                    timer.pause(now);
                    dirty = true;
                }
                blocked.push(*tab);
            } else if unblock_under {
                unblocked.push(*tab);
            }
        }
        if dirty {
            self.store.save_timers(&timers).await?;
        }
        for tab in blocked {
            tracing::debug!(%tab, "sweep blocking over-budget tab");
            self.push(tab, AgentCommand::BlockVideo).await;
        }
        for tab in unblocked {
            self.push(tab, AgentCommand::UnblockVideo).await;
        }
        Ok(())
    }

    /// Today's total for one bucket, given an already-loaded timer map.
    async fn spent_today(&self, timers: &TimerMap, bucket: Bucket) -> Result<i64, EngineError> {
        let day = self.store.load_day(self.clock.today()).await?;
        let totals = live_totals(&day, timers, self.clock.now());
        Ok(totals.get(&bucket).copied().unwrap_or(0))
    }

    /// Fire-and-forget push. Failures are logged, never retried; the
    /// polling handshake supersedes lost messages.
    async fn push(&self, tab: TabId, command: AgentCommand) {
        if let Err(err) = self.transport.send(tab, command).await {
            tracing::warn!(%tab, ?command, %err, "agent push failed");
        }
    }
}

/// Zeroes accumulators and restarts running clocks at `now` without
/// disturbing which tab is active.
fn reset_timers(timers: &mut TimerMap, now: chrono::DateTime<chrono::Utc>) {
    for timer in timers.values_mut() {
        timer.accumulated_ms = 0;
        if timer.is_running() {
            timer.running_since = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentPush, DeliveryError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    /// Transport that records every push.
    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: std::sync::Mutex<Vec<AgentPush>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn failing() -> Self {
            Self {
                sent: std::sync::Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn sent(&self) -> Vec<AgentPush> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentTransport for RecordingTransport {
        async fn send(&self, tab: TabId, command: AgentCommand) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(AgentPush {
                tab_id: tab,
                command,
            });
            if self.fail {
                return Err(DeliveryError {
                    tab,
                    reason: "no receiver".to_string(),
                });
            }
            Ok(())
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 24, 12, 0, 0).unwrap()
    }

    fn engine<'a>(
        store: &'a MemoryStore,
        transport: &'a RecordingTransport,
        clock: &'a crate::clock::FixedClock,
    ) -> Engine<&'a MemoryStore, &'a RecordingTransport, &'a crate::clock::FixedClock> {
        Engine::new(store, transport, clock)
    }

    /// One-minute trash budget, everything else per defaults.
    async fn minute_budget(store: &MemoryStore) {
        let mut settings = Settings::default();
        settings.set_limit_minutes(Bucket::Trash, 1);
        store.save_settings(&settings).await.unwrap();
    }

    #[tokio::test]
    async fn start_under_budget_starts_the_clock() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        let outcome = engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);

        let timers = store.load_timers().await.unwrap();
        assert!(timers[&TabId(1)].is_running());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn duplicate_start_soft_fails() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        let outcome = engine.start_timer(TabId(1), Bucket::Phd).await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyTracked);

        // The original bucket assignment is untouched.
        let timers = store.load_timers().await.unwrap();
        assert_eq!(timers[&TabId(1)].bucket, Bucket::Trash);
    }

    #[tokio::test]
    async fn start_over_budget_writes_tainted_timer_and_blocks() {
        let store = MemoryStore::new();
        minute_budget(&store).await;
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        clock.advance(Duration::seconds(61));

        let outcome = engine.start_timer(TabId(2), Bucket::Trash).await.unwrap();
        assert_eq!(outcome, StartOutcome::Blocked);

        let timers = store.load_timers().await.unwrap();
        let tainted = &timers[&TabId(2)];
        assert!(!tainted.is_running());
        assert_eq!(tainted.accumulated_ms, 0);
        assert_eq!(
            transport.sent(),
            vec![AgentPush {
                tab_id: TabId(2),
                command: AgentCommand::BlockVideo
            }]
        );
    }

    #[tokio::test]
    async fn at_most_one_timer_runs_across_many_starts() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        for (tab, bucket) in [
            (1, Bucket::Trash),
            (2, Bucket::Interesting),
            (3, Bucket::Curriculum),
            (4, Bucket::Phd),
        ] {
            clock.advance(Duration::seconds(5));
            engine.start_timer(TabId(tab), bucket).await.unwrap();
        }

        let timers = store.load_timers().await.unwrap();
        assert_eq!(timer::running_count(&timers), 1);
        assert!(timers[&TabId(4)].is_running());
    }

    #[tokio::test]
    async fn activate_switches_the_running_tab() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Interesting).await.unwrap();
        clock.advance(Duration::seconds(10));
        engine.start_timer(TabId(2), Bucket::Phd).await.unwrap();
        clock.advance(Duration::seconds(10));

        let outcome = engine.activate(TabId(1)).await.unwrap();
        assert_eq!(outcome, ResumeOutcome::Resumed);

        let timers = store.load_timers().await.unwrap();
        assert_eq!(timer::running_count(&timers), 1);
        assert!(timers[&TabId(1)].is_running());
        assert_eq!(timers[&TabId(1)].accumulated_ms, 10_000);
        assert_eq!(timers[&TabId(2)].accumulated_ms, 10_000);
    }

    #[tokio::test]
    async fn activating_an_untracked_tab_still_pauses_others() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Phd).await.unwrap();
        clock.advance(Duration::seconds(5));

        let outcome = engine.activate(TabId(99)).await.unwrap();
        assert_eq!(outcome, ResumeOutcome::Untracked);

        let timers = store.load_timers().await.unwrap();
        assert_eq!(timer::running_count(&timers), 0);
    }

    #[tokio::test]
    async fn resume_refused_once_budget_crossed_while_paused() {
        let store = MemoryStore::new();
        minute_budget(&store).await;
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        clock.advance(Duration::seconds(61));
        engine.pause(TabId(1)).await.unwrap();

        let outcome = engine.resume(TabId(1)).await.unwrap();
        assert_eq!(outcome, ResumeOutcome::Refused);

        let timers = store.load_timers().await.unwrap();
        assert!(!timers[&TabId(1)].is_running());
        assert_eq!(
            transport.sent(),
            vec![AgentPush {
                tab_id: TabId(1),
                command: AgentCommand::BlockVideo
            }]
        );
    }

    #[tokio::test]
    async fn stop_folds_time_into_today_and_deletes() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Curriculum).await.unwrap();
        clock.advance(Duration::seconds(42));
        engine.stop(TabId(1)).await.unwrap();

        assert!(store.load_timers().await.unwrap().is_empty());
        let day = store.day(clock.today()).await;
        assert_eq!(day.get(Bucket::Curriculum), 42_000);

        // Second stop is a no-op; nothing double-folds.
        engine.stop(TabId(1)).await.unwrap();
        let day = store.day(clock.today()).await;
        assert_eq!(day.get(Bucket::Curriculum), 42_000);
    }

    #[tokio::test]
    async fn zero_duration_stop_writes_no_daily_stats() {
        let store = MemoryStore::new();
        minute_budget(&store).await;
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        // Tainted timer never ran.
        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        clock.advance(Duration::seconds(61));
        engine.start_timer(TabId(2), Bucket::Trash).await.unwrap();
        engine.stop(TabId(2)).await.unwrap();

        assert!(!store.load_timers().await.unwrap().contains_key(&TabId(2)));
        let day = store.day(clock.today()).await;
        assert!(day.is_empty());
    }

    #[tokio::test]
    async fn conservation_across_pause_resume_cycles() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Phd).await.unwrap();
        let mut expected = 0;
        for run_secs in [7, 11, 3] {
            clock.advance(Duration::seconds(run_secs));
            expected += run_secs * 1000;
            engine.pause(TabId(1)).await.unwrap();
            // Paused gaps contribute nothing.
            clock.advance(Duration::seconds(100));
            engine.resume(TabId(1)).await.unwrap();
        }
        engine.stop(TabId(1)).await.unwrap();

        let day = store.day(clock.today()).await;
        assert_eq!(day.get(Bucket::Phd), expected);
    }

    #[tokio::test]
    async fn handshake_fails_open_for_unknown_senders() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        assert_eq!(
            engine.check_status(None).await.unwrap(),
            EnforcementAction::Unblock
        );
        assert_eq!(
            engine.check_status(Some(TabId(5))).await.unwrap(),
            EnforcementAction::Unblock
        );
    }

    #[tokio::test]
    async fn handshake_blocks_and_pauses_over_budget_tab() {
        let store = MemoryStore::new();
        minute_budget(&store).await;
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        clock.advance(Duration::seconds(61));

        let action = engine.check_status(Some(TabId(1))).await.unwrap();
        assert_eq!(action, EnforcementAction::Block);

        let timers = store.load_timers().await.unwrap();
        assert!(!timers[&TabId(1)].is_running());
        assert_eq!(timers[&TabId(1)].accumulated_ms, 61_000);
    }

    /// The full scenario: A starts trash, crosses the budget, a status
    /// query blocks it, then B's start in the same bucket is refused
    /// with a tainted timer while A stays paused.
    #[tokio::test]
    async fn over_budget_scenario_end_to_end() {
        let store = MemoryStore::new();
        minute_budget(&store).await;
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        let outcome = engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);

        clock.advance(Duration::seconds(61));
        assert_eq!(
            engine.check_status(Some(TabId(1))).await.unwrap(),
            EnforcementAction::Block
        );

        let outcome = engine.start_timer(TabId(2), Bucket::Trash).await.unwrap();
        assert_eq!(outcome, StartOutcome::Blocked);

        let timers = store.load_timers().await.unwrap();
        assert!(!timers[&TabId(1)].is_running());
        assert_eq!(timers[&TabId(1)].accumulated_ms, 61_000);
        assert!(!timers[&TabId(2)].is_running());
        assert_eq!(timers[&TabId(2)].accumulated_ms, 0);
    }

    #[tokio::test]
    async fn first_tick_initializes_date_without_migration() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        clock.advance(Duration::seconds(30));
        engine.tick().await.unwrap();

        assert_eq!(
            store.last_seen_date().await.unwrap(),
            Some(clock.today())
        );
        // No day record was written; the timer restarted fresh.
        assert!(store.day(clock.today()).await.is_empty());
        let timers = store.load_timers().await.unwrap();
        assert_eq!(timers[&TabId(1)].accumulated_ms, 0);
        assert!(timers[&TabId(1)].is_running());
    }

    #[tokio::test]
    async fn rollover_attributes_time_to_yesterday_and_keeps_running() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.tick().await.unwrap(); // pin today's date
        let yesterday = clock.today();

        engine.start_timer(TabId(1), Bucket::Interesting).await.unwrap();
        clock.advance(Duration::seconds(20));
        engine.pause(TabId(1)).await.unwrap();
        engine.resume(TabId(1)).await.unwrap();

        // Cross midnight with 20s folded and the clock running.
        clock.advance(Duration::hours(13));
        engine.tick().await.unwrap();
        let today = clock.today();
        assert_ne!(yesterday, today);

        let day = store.day(yesterday).await;
        assert_eq!(day.get(Bucket::Interesting), 20_000);

        let timers = store.load_timers().await.unwrap();
        assert_eq!(timers[&TabId(1)].accumulated_ms, 0);
        assert_eq!(timers[&TabId(1)].running_since, Some(clock.now()));
        assert_eq!(store.last_seen_date().await.unwrap(), Some(today));
    }

    #[tokio::test]
    async fn rollover_is_idempotent_within_a_day() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.tick().await.unwrap();
        let yesterday = clock.today();
        engine.start_timer(TabId(1), Bucket::Phd).await.unwrap();
        clock.advance(Duration::hours(2));
        engine.pause(TabId(1)).await.unwrap();
        clock.advance(Duration::hours(11));

        engine.tick().await.unwrap();
        engine.tick().await.unwrap();

        // Second tick on the same day must not fold again.
        let day = store.day(yesterday).await;
        assert_eq!(day.get(Bucket::Phd), 2 * 3600 * 1000);
    }

    #[tokio::test]
    async fn sweep_pauses_and_blocks_over_budget_tabs() {
        let store = MemoryStore::new();
        minute_budget(&store).await;
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.tick().await.unwrap();
        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        clock.advance(Duration::seconds(90));

        engine.tick().await.unwrap();

        let timers = store.load_timers().await.unwrap();
        assert!(!timers[&TabId(1)].is_running());
        assert_eq!(timers[&TabId(1)].accumulated_ms, 90_000);
        assert_eq!(
            transport.sent(),
            vec![AgentPush {
                tab_id: TabId(1),
                command: AgentCommand::BlockVideo
            }]
        );
    }

    #[tokio::test]
    async fn rollover_unblocks_tabs_in_fresh_buckets() {
        let store = MemoryStore::new();
        minute_budget(&store).await;
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.tick().await.unwrap();
        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        clock.advance(Duration::seconds(90));
        engine.tick().await.unwrap(); // sweep blocks tab 1

        clock.advance(Duration::hours(13));
        engine.tick().await.unwrap(); // rollover: fresh day, under budget

        let pushes = transport.sent();
        assert_eq!(
            pushes.last(),
            Some(&AgentPush {
                tab_id: TabId(1),
                command: AgentCommand::UnblockVideo
            })
        );
    }

    #[tokio::test]
    async fn delivery_failure_does_not_roll_back_state() {
        let store = MemoryStore::new();
        minute_budget(&store).await;
        let transport = RecordingTransport::failing();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.start_timer(TabId(1), Bucket::Trash).await.unwrap();
        clock.advance(Duration::seconds(61));
        let outcome = engine.start_timer(TabId(2), Bucket::Trash).await.unwrap();

        // Push failed, but the tainted timer is durably recorded.
        assert_eq!(outcome, StartOutcome::Blocked);
        assert!(store.load_timers().await.unwrap().contains_key(&TabId(2)));
    }

    #[tokio::test]
    async fn settings_changes_apply_on_next_tick() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        engine.tick().await.unwrap();
        engine.start_timer(TabId(1), Bucket::Curriculum).await.unwrap();
        clock.advance(Duration::seconds(120));

        // Unenforced bucket: nothing happens.
        engine.tick().await.unwrap();
        assert!(transport.sent().is_empty());

        // Editor writes a 1-minute curriculum budget.
        let mut settings = Settings::default();
        settings.set_limit_minutes(Bucket::Curriculum, 1);
        store.save_settings(&settings).await.unwrap();

        engine.tick().await.unwrap();
        let timers = store.load_timers().await.unwrap();
        assert!(!timers[&TabId(1)].is_running());
        assert_eq!(
            transport.sent(),
            vec![AgentPush {
                tab_id: TabId(1),
                command: AgentCommand::BlockVideo
            }]
        );
    }

    #[tokio::test]
    async fn handle_request_dispatch_matches_direct_calls() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::default();
        let clock = crate::clock::FixedClock::new(noon());
        let mut engine = engine(&store, &transport, &clock);

        let response = engine
            .handle_request(Request::StartTimer {
                tab_id: TabId(1),
                bucket: Bucket::Interesting,
            })
            .await;
        assert_eq!(
            response,
            Response::Start {
                success: true,
                blocked: false
            }
        );

        let response = engine
            .handle_request(Request::GetTabStatus { tab_id: TabId(1) })
            .await;
        assert_eq!(
            response,
            Response::TabStatus {
                bucket: Some(Bucket::Interesting)
            }
        );

        let response = engine
            .handle_request(Request::CheckMyStatus { tab_id: None })
            .await;
        assert_eq!(
            response,
            Response::Status {
                action: EnforcementAction::Unblock
            }
        );

        clock.advance(Duration::seconds(3));
        let response = engine.handle_request(Request::GetLiveStats).await;
        let Response::LiveStats { stats, limits } = response else {
            panic!("expected live stats");
        };
        assert_eq!(stats[&Bucket::Interesting], 3_000);
        assert_eq!(limits[&Bucket::Interesting], 90);
    }
}
