//! harvest-store: SQLite persistence for schedule records.
//!
//! Scalar fields live in columns; nested recurrence configuration, tags and
//! error details are JSON text columns. Instants are stored RFC3339.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use harvest_types::{
    ExecutionError, FrequencyType, ScheduleLock, ScheduleRecord, TimeSlotConfig, ValidityWindow,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "PRAGMA journal_mode=WAL;

    CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY,
        target_id TEXT NOT NULL,
        frequency TEXT NOT NULL,
        configurations TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        next_run TEXT,
        last_run TEXT,
        failed_attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        locked INTEGER NOT NULL DEFAULT 0,
        lock_reason TEXT,
        locked_at TEXT,
        tags TEXT,
        priority INTEGER NOT NULL,
        validity_from TEXT,
        validity_to TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_schedules_target ON schedules(target_id);";

const SELECT_COLUMNS: &str = "id, target_id, frequency, configurations, active, next_run, \
     last_run, failed_attempts, last_error, locked, lock_reason, locked_at, tags, priority, \
     validity_from, validity_to, created_at";

/// SQLite-based storage for schedule records.
pub struct ScheduleStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!("Schedule store opened: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a schedule record.
    pub async fn upsert(&self, record: &ScheduleRecord) -> Result<()> {
        let conn = self.conn.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let configurations = serde_json::to_string(&record.configurations)?;
            let tags = serde_json::to_string(&record.tags)?;
            let last_error = record
                .last_error
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO schedules
                    (id, target_id, frequency, configurations, active, next_run, last_run,
                     failed_attempts, last_error, locked, lock_reason, locked_at, tags,
                     priority, validity_from, validity_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    record.id,
                    record.target_id,
                    record.frequency.as_str(),
                    configurations,
                    record.active as i64,
                    record.next_run.map(|t| t.to_rfc3339()),
                    record.last_run.map(|t| t.to_rfc3339()),
                    record.failed_attempts as i64,
                    last_error,
                    record.lock.locked as i64,
                    record.lock.reason,
                    record.lock.locked_at.map(|t| t.to_rfc3339()),
                    tags,
                    record.priority as i64,
                    record.validity_window.map(|w| w.from.to_rfc3339()),
                    record.validity_window.map(|w| w.to.to_rfc3339()),
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Get a schedule record by ID.
    pub async fn get(&self, id: &str) -> Result<Option<ScheduleRecord>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<ScheduleRecord>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM schedules WHERE id = ?1"
            ))?;
            match stmt.query_row(rusqlite::params![id], row_to_record) {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    /// Delete a schedule record. Returns whether a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = conn.blocking_lock();
            let count = conn.execute("DELETE FROM schedules WHERE id = ?1", rusqlite::params![id])?;
            Ok(count > 0)
        })
        .await?
    }

    /// List every schedule record.
    pub async fn list_all(&self) -> Result<Vec<ScheduleRecord>> {
        self.list_where("1 = 1", vec![]).await
    }

    /// List the schedule records of one target.
    pub async fn list_for_target(&self, target_id: &str) -> Result<Vec<ScheduleRecord>> {
        self.list_where("target_id = ?1", vec![target_id.to_string()])
            .await
    }

    async fn list_where(
        &self,
        predicate: &'static str,
        params: Vec<String>,
    ) -> Result<Vec<ScheduleRecord>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ScheduleRecord>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM schedules WHERE {predicate} ORDER BY created_at"
            ))?;
            let records = stmt
                .query_map(rusqlite::params_from_iter(params), row_to_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await?
    }

    /// The schedule that most recently completed successfully, read by the
    /// stats/reporting view.
    pub async fn most_recent_success(&self) -> Result<Option<(String, DateTime<Utc>)>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<(String, DateTime<Utc>)>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, last_run FROM schedules
                 WHERE last_run IS NOT NULL ORDER BY last_run DESC LIMIT 1",
            )?;
            let row = stmt.query_row([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            });
            match row {
                Ok((id, last_run)) => Ok(last_run.parse().ok().map(|t| (id, t))),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleRecord> {
    let frequency_raw: String = row.get(2)?;
    let frequency = FrequencyType::from_name(&frequency_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown frequency {frequency_raw:?}").into(),
        )
    })?;
    let configurations: Vec<TimeSlotConfig> = {
        let raw: String = row.get(3)?;
        serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?
    };
    let last_error: Option<ExecutionError> = row
        .get::<_, Option<String>>(8)?
        .and_then(|s| serde_json::from_str(&s).ok());
    let validity_window = match (
        row.get::<_, Option<String>>(14)?,
        row.get::<_, Option<String>>(15)?,
    ) {
        (Some(from), Some(to)) => match (from.parse(), to.parse()) {
            (Ok(from), Ok(to)) => Some(ValidityWindow { from, to }),
            _ => None,
        },
        _ => None,
    };

    Ok(ScheduleRecord {
        id: row.get(0)?,
        target_id: row.get(1)?,
        frequency,
        configurations,
        active: row.get::<_, i64>(4)? != 0,
        next_run: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| s.parse().ok()),
        last_run: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| s.parse().ok()),
        failed_attempts: row.get::<_, i64>(7)? as u32,
        last_error,
        lock: ScheduleLock {
            locked: row.get::<_, i64>(9)? != 0,
            reason: row.get(10)?,
            locked_at: row
                .get::<_, Option<String>>(11)?
                .and_then(|s| s.parse().ok()),
        },
        tags: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        priority: row.get::<_, i64>(13)? as u8,
        validity_window,
        created_at: row
            .get::<_, String>(16)?
            .parse()
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_types::TimeSlotConfig;

    fn record(id: &str, target_id: &str) -> ScheduleRecord {
        ScheduleRecord {
            id: id.into(),
            target_id: target_id.into(),
            frequency: FrequencyType::Weekly,
            configurations: vec![TimeSlotConfig::at("09:00").on_weekdays([0, 2, 4])],
            active: true,
            next_run: Some("2026-01-12T09:00:00Z".parse().unwrap()),
            last_run: None,
            failed_attempts: 0,
            last_error: None,
            lock: ScheduleLock::default(),
            tags: ["nightly".to_string()].into_iter().collect(),
            priority: 7,
            validity_window: None,
            created_at: "2026-01-10T00:00:00Z".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_upsert_get_roundtrip() {
        let store = ScheduleStore::open_in_memory().unwrap();
        let mut rec = record("s1", "t1");
        rec.last_error = Some(ExecutionError {
            message: "fetch failed".into(),
            occurred_at: "2026-01-11T09:00:10Z".parse().unwrap(),
            attempt_count: 1,
        });
        rec.validity_window = Some(ValidityWindow {
            from: "2026-01-01T00:00:00Z".parse().unwrap(),
            to: "2026-06-01T00:00:00Z".parse().unwrap(),
        });
        store.upsert(&rec).await.unwrap();

        let loaded = store.get("s1").await.unwrap().expect("record exists");
        assert_eq!(loaded.target_id, "t1");
        assert_eq!(loaded.frequency, FrequencyType::Weekly);
        assert_eq!(loaded.configurations.len(), 1);
        assert_eq!(
            loaded.configurations[0].days_of_week,
            Some([0, 2, 4].into_iter().collect())
        );
        assert_eq!(loaded.next_run, rec.next_run);
        assert_eq!(loaded.last_error, rec.last_error);
        assert!(loaded.tags.contains("nightly"));
        assert_eq!(loaded.priority, 7);
        let window = loaded.validity_window.expect("window survives");
        assert_eq!(window.to, "2026-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = ScheduleStore::open_in_memory().unwrap();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = ScheduleStore::open_in_memory().unwrap();
        let mut rec = record("s1", "t1");
        store.upsert(&rec).await.unwrap();
        rec.active = false;
        rec.failed_attempts = 3;
        rec.lock = ScheduleLock {
            locked: true,
            reason: Some("too many failures".into()),
            locked_at: Some("2026-01-12T10:00:00Z".parse().unwrap()),
        };
        store.upsert(&rec).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert!(!loaded.active);
        assert_eq!(loaded.failed_attempts, 3);
        assert!(loaded.lock.locked);
        assert_eq!(loaded.lock.reason.as_deref(), Some("too many failures"));
    }

    #[tokio::test]
    async fn test_list_for_target() {
        let store = ScheduleStore::open_in_memory().unwrap();
        store.upsert(&record("s1", "t1")).await.unwrap();
        store.upsert(&record("s2", "t1")).await.unwrap();
        store.upsert(&record("s3", "t2")).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 3);
        let t1 = store.list_for_target("t1").await.unwrap();
        assert_eq!(t1.len(), 2);
        assert!(t1.iter().all(|r| r.target_id == "t1"));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = ScheduleStore::open_in_memory().unwrap();
        store.upsert(&record("s1", "t1")).await.unwrap();
        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert!(store.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_most_recent_success() {
        let store = ScheduleStore::open_in_memory().unwrap();
        assert!(store.most_recent_success().await.unwrap().is_none());

        let mut a = record("s1", "t1");
        a.last_run = Some("2026-01-11T09:00:00Z".parse().unwrap());
        let mut b = record("s2", "t1");
        b.last_run = Some("2026-01-12T09:00:00Z".parse().unwrap());
        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();

        let (id, at) = store.most_recent_success().await.unwrap().unwrap();
        assert_eq!(id, "s2");
        assert_eq!(at, "2026-01-12T09:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }
}
