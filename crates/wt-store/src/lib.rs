//! SQLite-backed implementation of the engine's durable store.
//!
//! Records are stored as JSON blobs in a single `kv(key, value)` table:
//! one key each for the settings, the live timer map, and the last-seen
//! date marker, plus one key per calendar day of folded totals
//! (`day/2026-08-25`). Whole-value writes give racing operations
//! last-writer-wins semantics on a consistent object, and the multi-key
//! commits run in one transaction.
//!
//! # Thread safety
//!
//! The wrapped `rusqlite::Connection` is `Send` but not `Sync`, so it
//! sits behind a `tokio::sync::Mutex`; each store call holds the lock
//! for the duration of one short statement or transaction.

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use wt_core::settings::Settings;
use wt_core::stats::DayTotals;
use wt_core::store::{Store, StoreError};
use wt_core::timer::TimerMap;

const KEY_SETTINGS: &str = "settings";
const KEY_TIMERS: &str = "timers";
const KEY_LAST_SEEN_DATE: &str = "last_seen_date";

fn day_key(date: NaiveDate) -> String {
    format!("day/{date}")
}

/// Durable store on a local SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens a store at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store. Useful for testing; the data is
    /// destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let conn = self.conn.lock().await;
        let value: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StoreError::backend)?;
        match value {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        put(&conn, key, value)
    }
}

/// Initializes the schema. Idempotent.
fn init(conn: &Connection) -> Result<(), StoreError> {
    // WAL keeps readers (the status command) from blocking the daemon.
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(StoreError::backend)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )
    .map_err(StoreError::backend)
}

fn put<T: Serialize + ?Sized>(conn: &Connection, key: &str, value: &T) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })?;
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, raw],
    )
    .map_err(StoreError::backend)?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_settings(&self) -> Result<Option<Settings>, StoreError> {
        self.get_json(KEY_SETTINGS).await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.put_json(KEY_SETTINGS, settings).await
    }

    async fn load_timers(&self) -> Result<TimerMap, StoreError> {
        Ok(self.get_json(KEY_TIMERS).await?.unwrap_or_default())
    }

    async fn save_timers(&self, timers: &TimerMap) -> Result<(), StoreError> {
        self.put_json(KEY_TIMERS, timers).await
    }

    async fn load_day(&self, date: NaiveDate) -> Result<DayTotals, StoreError> {
        Ok(self.get_json(&day_key(date)).await?.unwrap_or_default())
    }

    async fn last_seen_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        self.get_json(KEY_LAST_SEEN_DATE).await
    }

    async fn commit_fold(
        &self,
        date: NaiveDate,
        totals: &DayTotals,
        timers: &TimerMap,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(StoreError::backend)?;
        put(&tx, &day_key(date), totals)?;
        put(&tx, KEY_TIMERS, timers)?;
        tx.commit().map_err(StoreError::backend)?;
        tracing::trace!(%date, "fold committed");
        Ok(())
    }

    async fn commit_rollover(
        &self,
        folded: Option<(NaiveDate, &DayTotals)>,
        timers: &TimerMap,
        today: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(StoreError::backend)?;
        if let Some((date, totals)) = folded {
            put(&tx, &day_key(date), totals)?;
        }
        put(&tx, KEY_TIMERS, timers)?;
        put(&tx, KEY_LAST_SEEN_DATE, &today)?;
        tx.commit().map_err(StoreError::backend)?;
        tracing::debug!(%today, "rollover committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rusqlite::params;
    use wt_core::bucket::Bucket;
    use wt_core::timer::{TabId, TimerState};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn fresh_store_is_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_settings().await.unwrap().is_none());
        assert!(store.load_timers().await.unwrap().is_empty());
        assert!(store.last_seen_date().await.unwrap().is_none());
        assert!(store.load_day(date("2026-08-25")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timers_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 8, 25, 9, 0, 0).unwrap();

        let mut timers = TimerMap::new();
        timers.insert(TabId(3), TimerState::running(Bucket::Interesting, now));
        timers.insert(TabId(8), TimerState::tainted(Bucket::Trash));
        store.save_timers(&timers).await.unwrap();

        assert_eq!(store.load_timers().await.unwrap(), timers);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("wt.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let mut settings = Settings::default();
            settings.set_limit_minutes(Bucket::Phd, 45);
            store.save_settings(&settings).await.unwrap();

            let mut totals = DayTotals::new();
            totals.add(Bucket::Trash, 12_000);
            store
                .commit_rollover(
                    Some((date("2026-08-24"), &totals)),
                    &TimerMap::new(),
                    date("2026-08-25"),
                )
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let settings = store.load_settings().await.unwrap().unwrap();
        assert_eq!(settings.limit_ms(Bucket::Phd), Some(45 * 60_000));
        assert_eq!(
            store.load_day(date("2026-08-24")).await.unwrap().get(Bucket::Trash),
            12_000
        );
        assert_eq!(
            store.last_seen_date().await.unwrap(),
            Some(date("2026-08-25"))
        );
    }

    #[tokio::test]
    async fn days_are_stored_under_separate_keys() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut monday = DayTotals::new();
        monday.add(Bucket::Curriculum, 1_000);
        let mut tuesday = DayTotals::new();
        tuesday.add(Bucket::Curriculum, 2_000);

        store
            .commit_fold(date("2026-08-24"), &monday, &TimerMap::new())
            .await
            .unwrap();
        store
            .commit_fold(date("2026-08-25"), &tuesday, &TimerMap::new())
            .await
            .unwrap();

        assert_eq!(
            store.load_day(date("2026-08-24")).await.unwrap().get(Bucket::Curriculum),
            1_000
        );
        assert_eq!(
            store.load_day(date("2026-08-25")).await.unwrap().get(Bucket::Curriculum),
            2_000
        );
    }

    #[tokio::test]
    async fn corrupt_record_reports_its_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?, ?)",
                params!["timers", "not json"],
            )
            .unwrap();
        }

        let err = store.load_timers().await.unwrap_err();
        match err {
            StoreError::Corrupt { key, .. } => assert_eq!(key, "timers"),
            other => panic!("expected corrupt record error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_overwrites_whole_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 8, 25, 9, 0, 0).unwrap();

        let mut timers = TimerMap::new();
        timers.insert(TabId(1), TimerState::running(Bucket::Trash, now));
        timers.insert(TabId(2), TimerState::tainted(Bucket::Phd));
        store.save_timers(&timers).await.unwrap();

        timers.remove(&TabId(1));
        store.save_timers(&timers).await.unwrap();

        let loaded = store.load_timers().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key(&TabId(2)));
    }
}
