/// SQLite persistence for instrument values and the instrument directory
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::{InstrumentStore, ValueStore};
use crate::error::{Result, SyncError};
use crate::types::{Category, InstrumentInfo, ValueRecord};

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS instruments (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        category TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS instrument_values (
        instrument_id TEXT NOT NULL,
        time DATETIME NOT NULL,
        value REAL NOT NULL,
        PRIMARY KEY (instrument_id, time)
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file and make sure the schema exists
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening SQLite store at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = SqliteStore { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Private in-memory database on a single connection
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = SqliteStore { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub async fn initialize_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ValueStore for SqliteStore {
    async fn read_values(&self, instrument_id: &str) -> Result<Vec<ValueRecord>> {
        let rows = sqlx::query(
            "SELECT time, value FROM instrument_values WHERE instrument_id = ?1 ORDER BY time ASC",
        )
        .bind(instrument_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ValueRecord> {
                let time: DateTime<Utc> = row.try_get("time")?;
                let value: f64 = row.try_get("value")?;
                Ok(ValueRecord::new(time, value))
            })
            .collect()
    }

    async fn upsert_values(&self, instrument_id: &str, values: &[ValueRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for record in values {
            affected += sqlx::query(
                r#"
                INSERT INTO instrument_values (instrument_id, time, value)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (instrument_id, time) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(instrument_id)
            .bind(record.time)
            .bind(record.value)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        debug!("Upserted {} values for {}", affected, instrument_id);
        Ok(affected)
    }
}

#[async_trait]
impl InstrumentStore for SqliteStore {
    async fn find_instrument(&self, instrument_id: &str) -> Result<Option<InstrumentInfo>> {
        let rows = sqlx::query("SELECT id, name, category FROM instruments WHERE id = ?1")
            .bind(instrument_id)
            .fetch_all(&self.pool)
            .await?;

        if rows.len() > 1 {
            return Err(SyncError::Persistence(format!(
                "Found {} instruments with id {}",
                rows.len(),
                instrument_id
            )));
        }

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let code: String = row.try_get("category")?;
        let category = Category::from_code(&code).ok_or_else(|| {
            SyncError::Persistence(format!("Unknown category '{}' stored for {}", code, instrument_id))
        })?;

        Ok(Some(InstrumentInfo {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            category,
        }))
    }

    async fn upsert_instruments(&self, instruments: &[InstrumentInfo]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for info in instruments {
            affected += sqlx::query(
                r#"
                INSERT INTO instruments (id, name, category)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (id) DO UPDATE SET name = excluded.name, category = excluded.category
                "#,
            )
            .bind(&info.id)
            .bind(&info.name)
            .bind(info.category.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        info!("Upserted {} instruments", affected);
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::trading_close_instant;
    use chrono::NaiveDate;

    fn record(y: i32, m: u32, d: u32, value: f64) -> ValueRecord {
        let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        ValueRecord::new(trading_close_instant(date), value)
    }

    fn fund(id: &str, name: &str, category: Category) -> InstrumentInfo {
        InstrumentInfo {
            id: id.to_string(),
            name: name.to_string(),
            category,
        }
    }

    #[tokio::test]
    async fn test_values_roundtrip_ascending() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store
            .upsert_values(
                "000001",
                &[record(2001, 2, 1, 2.34), record(1999, 2, 1, 2.34), record(2000, 9, 12, 1.23)],
            )
            .await
            .unwrap();

        let values = store.read_values("000001").await.unwrap();
        assert_eq!(
            values,
            vec![record(1999, 2, 1, 2.34), record(2000, 9, 12, 1.23), record(2001, 2, 1, 2.34)]
        );
        assert!(store.read_values("000002").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_value_upsert_is_idempotent() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let batch = [record(1999, 2, 1, 2.34), record(2000, 9, 12, 1.23)];

        store.upsert_values("000001", &batch).await.unwrap();
        store.upsert_values("000001", &batch).await.unwrap();
        store.upsert_values("000001", &[record(2000, 9, 12, 1.25)]).await.unwrap();

        let values = store.read_values("000001").await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].value, 1.25);
    }

    #[tokio::test]
    async fn test_instrument_upsert_and_find() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store
            .upsert_instruments(&[fund("000001", "Growth", Category::Mixed), fund("000003", "Bond A", Category::Bond)])
            .await
            .unwrap();
        store
            .upsert_instruments(&[fund("000001", "Growth Plus", Category::Equity)])
            .await
            .unwrap();

        assert_eq!(
            store.find_instrument("000001").await.unwrap(),
            Some(fund("000001", "Growth Plus", Category::Equity))
        );
        assert!(store.find_instrument("999999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_stored_category_is_persistence_error() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO instruments (id, name, category) VALUES ('000001', 'Growth', 'crypto')")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.find_instrument("000001").await.unwrap_err();
        assert_eq!(err.error_code(), "STORE_001");
    }

    #[tokio::test]
    async fn test_connect_creates_file_and_schema() {
        let dir = std::env::temp_dir().join(format!("fundsync-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("values.db");

        let store = SqliteStore::connect(&path).await.unwrap();
        store.upsert_values("000001", &[record(1999, 2, 1, 2.34)]).await.unwrap();
        store.close().await;

        let reopened = SqliteStore::connect(&path).await.unwrap();
        assert_eq!(reopened.read_values("000001").await.unwrap().len(), 1);
        reopened.close().await;

        let _ = std::fs::remove_dir_all(dir);
    }
}
