//! Append-only log of recognized plate events.
//!
//! There is deliberately no update or delete path: a record, once
//! appended, keeps its id and contents for the life of the database.

use crate::error::StorageError;
use crate::types::{HistoryAction, HistoryRecord};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;

/// Default and maximum number of rows returned by the history query
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Record one plate event stamped with the current local time.
    ///
    /// Id assignment and the insert happen atomically.
    async fn append(
        &self,
        plate: &str,
        confidence: f64,
        action: HistoryAction,
    ) -> Result<HistoryRecord, StorageError>;

    /// Up to `limit` most recent records, highest id first
    async fn recent(&self, limit: u32) -> Result<Vec<HistoryRecord>, StorageError>;

    /// Cheap reachability check for the readiness endpoint
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Pool sizing for `url`.
///
/// An in-memory database lives exactly as long as its one connection, so
/// that connection is never reaped.
fn pool_options(url: &str) -> SqlitePoolOptions {
    if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(4)
    }
}

/// SQLite-backed history log
#[derive(Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (creating if needed) the database at `url` and make sure the
    /// `history` table exists.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = pool_options(url).connect_with(options).await?;

        let store = Self { pool };
        store.init_schema().await?;
        tracing::info!(url = %url, "history store ready");
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plate TEXT,
                confidence REAL,
                timestamp TEXT,
                action TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(
        &self,
        plate: &str,
        confidence: f64,
        action: HistoryAction,
    ) -> Result<HistoryRecord, StorageError> {
        let timestamp = format_timestamp(Local::now());

        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            "INSERT INTO history (plate, confidence, timestamp, action) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(plate)
        .bind(confidence)
        .bind(timestamp.as_str())
        .bind(action.as_str())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        Ok(HistoryRecord {
            id,
            plate: plate.to_string(),
            confidence,
            timestamp,
            action: action.to_string(),
        })
    }

    async fn recent(&self, limit: u32) -> Result<Vec<HistoryRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, plate, confidence, timestamp, action FROM history ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<HistoryRecord, StorageError> {
                Ok(HistoryRecord {
                    id: row.try_get("id")?,
                    plate: row.try_get::<Option<String>, _>("plate")?.unwrap_or_default(),
                    confidence: row.try_get::<Option<f64>, _>("confidence")?.unwrap_or_default(),
                    timestamp: row.try_get::<Option<String>, _>("timestamp")?.unwrap_or_default(),
                    action: row.try_get::<Option<String>, _>("action")?.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-process history log, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(
        &self,
        plate: &str,
        confidence: f64,
        action: HistoryAction,
    ) -> Result<HistoryRecord, StorageError> {
        let mut records = self.records.write().await;
        let record = HistoryRecord {
            id: records.last().map(|r| r.id + 1).unwrap_or(1),
            plate: plate.to_string(),
            confidence,
            timestamp: format_timestamp(Local::now()),
            action: action.to_string(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn recent(&self, limit: u32) -> Result<Vec<HistoryRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn sqlite_memory() -> SqliteHistoryStore {
        SqliteHistoryStore::connect("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn test_format_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
        assert_eq!(format_timestamp(at), "2024-03-09 07:05:02");
    }

    #[tokio::test]
    async fn test_sqlite_append_assigns_increasing_ids() {
        let store = sqlite_memory().await;

        let first = store.append("XYZ999", 0.9, HistoryAction::Entry).await.unwrap();
        let second = store.append("", 0.4, HistoryAction::Entry).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.action, "entry");
        assert_eq!(second.plate, "");
        assert_eq!(first.timestamp.len(), "YYYY-MM-DD HH:MM:SS".len());
    }

    #[tokio::test]
    async fn test_sqlite_recent_is_newest_first_and_limited() {
        let store = sqlite_memory().await;
        for i in 0..5 {
            store
                .append(&format!("P{}", i), 0.5, HistoryAction::Entry)
                .await
                .unwrap();
        }

        let recent = store.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        let plates: Vec<&str> = recent.iter().map(|r| r.plate.as_str()).collect();
        assert_eq!(plates, vec!["P4", "P3", "P2"]);
        assert!(recent.windows(2).all(|w| w[0].id > w[1].id));

        assert!(store.recent(0).await.unwrap().is_empty());
        assert_eq!(store.recent(50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_sqlite_keeps_future_action_kinds() {
        let store = sqlite_memory().await;
        store.append("EXIT01", 0.77, HistoryAction::Exit).await.unwrap();

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent[0].action, "exit");
        assert_eq!(recent[0].confidence, 0.77);
    }

    #[tokio::test]
    async fn test_in_memory_connection_is_never_reaped() {
        let store = sqlite_memory().await;

        let options = store.pool.options();
        assert_eq!(options.get_max_connections(), 1);
        assert_eq!(options.get_min_connections(), 1);
        assert_eq!(options.get_idle_timeout(), None);
        assert_eq!(options.get_max_lifetime(), None);

        store.append("KEEP01", 0.8, HistoryAction::Entry).await.unwrap();
        assert_eq!(store.recent(50).await.unwrap()[0].plate, "KEEP01");
    }

    #[test]
    fn test_file_database_pool_options() {
        let options = pool_options("sqlite://history.db");
        assert_eq!(options.get_max_connections(), 4);
        assert!(options.get_idle_timeout().is_some());
    }

    #[tokio::test]
    async fn test_sqlite_closed_pool_reports_storage_error() {
        let store = sqlite_memory().await;
        store.close().await;

        let result = store.append("ABC123", 0.5, HistoryAction::Entry).await;
        assert!(matches!(result, Err(StorageError::Database(_))));
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_concurrent_appends() {
        let store = Arc::new(MemoryHistoryStore::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append(&format!("P{}", i), 0.5, HistoryAction::Entry)
                        .await
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let recent = store.recent(100).await.unwrap();
        let ids: Vec<i64> = recent.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=32).rev().collect::<Vec<i64>>());
        assert_eq!(store.len().await, 32);
    }
}
