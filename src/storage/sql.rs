// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage backend.
//!
//! Every partition shares two tables:
//! ```sql
//! CREATE TABLE records (
//!   part TEXT NOT NULL,          -- partition name
//!   key TEXT NOT NULL,           -- primary key extracted from the record
//!   value TEXT NOT NULL,         -- record as JSON text
//!   size_bytes INTEGER NOT NULL, -- length of `value`
//!   PRIMARY KEY (part, key)
//! );
//!
//! CREATE TABLE record_indexes (
//!   part TEXT NOT NULL,
//!   index_name TEXT NOT NULL,
//!   key TEXT NOT NULL,
//!   num_value INTEGER,           -- set for integer index values
//!   text_value TEXT,             -- set for text index values
//!   PRIMARY KEY (part, index_name, key)
//! );
//! ```
//!
//! A record and its index rows are written in one transaction, so a put is
//! either fully visible or not at all.

use std::ops::Bound;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

use super::traits::{
    check_index, IndexKey, IndexRange, Partition, PartitionSize, StorageBackend, StorageError,
};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn unavailable(e: sqlx::Error) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct SqliteBackend {
    pool: AnyPool,
}

impl SqliteBackend {
    /// Open (or create) the database with startup-mode retry.
    ///
    /// `connection_string` is a sqlx SQLite URL such as
    /// `sqlite://offline.db?mode=rwc` or `sqlite::memory:`.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        // Each in-memory connection is its own database
        let max_connections = if connection_string.contains(":memory:") { 1 } else { 4 };

        info!(url = %connection_string, "Opening SQLite storage backend");

        let pool = retry("sqlite_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(connection_string)
                .await
                .map_err(unavailable)
        })
        .await?;

        let store = Self { pool };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        Ok(store)
    }

    /// Open a database file, creating it if needed.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        Self::new(&url).await
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        const STATEMENTS: [&str; 4] = [
            r#"
            CREATE TABLE IF NOT EXISTS records (
                part TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (part, key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS record_indexes (
                part TEXT NOT NULL,
                index_name TEXT NOT NULL,
                key TEXT NOT NULL,
                num_value INTEGER,
                text_value TEXT,
                PRIMARY KEY (part, index_name, key)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_record_indexes_num ON record_indexes (part, index_name, num_value)",
            "CREATE INDEX IF NOT EXISTS idx_record_indexes_text ON record_indexes (part, index_name, text_value)",
        ];

        for sql in STATEMENTS {
            retry("sqlite_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(unavailable)
            })
            .await?;
        }

        Ok(())
    }

    /// sqlx Any may hand TEXT back as bytes; accept both.
    fn read_text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
        if let Ok(s) = row.try_get::<String, _>(column) {
            return Ok(s);
        }
        let bytes: Vec<u8> = row.try_get(column).map_err(backend)?;
        String::from_utf8(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn decode_rows(rows: Vec<AnyRow>) -> Result<Vec<Value>, StorageError> {
        rows.iter()
            .map(|row| {
                let text = Self::read_text(row, "value")?;
                serde_json::from_str(&text).map_err(StorageError::from)
            })
            .collect()
    }

    /// SQL condition for one side of a range. `Int` values sort before
    /// `Text` values, matching `IndexKey`'s ordering.
    fn bound_condition(bound: &Bound<IndexKey>, is_lower: bool) -> Option<(String, IndexKey)> {
        let (key, inclusive) = match bound {
            Bound::Included(k) => (k, true),
            Bound::Excluded(k) => (k, false),
            Bound::Unbounded => return None,
        };
        let op = match (is_lower, inclusive) {
            (true, true) => ">=",
            (true, false) => ">",
            (false, true) => "<=",
            (false, false) => "<",
        };
        let sql = match (key, is_lower) {
            (IndexKey::Int(_), true) => format!("(i.num_value {} ? OR i.text_value IS NOT NULL)", op),
            (IndexKey::Int(_), false) => format!("i.num_value {} ?", op),
            (IndexKey::Text(_), true) => format!("i.text_value {} ?", op),
            (IndexKey::Text(_), false) => format!("(i.num_value IS NOT NULL OR i.text_value {} ?)", op),
        };
        Some((sql, key.clone()))
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn put(&self, partition: Partition, record: Value) -> Result<(), StorageError> {
        let key = partition.key_of(&record)?;
        let text = serde_json::to_string(&record)?;
        let indexes: Vec<(&str, IndexKey)> = partition
            .indexes()
            .iter()
            .filter_map(|name| partition.index_key_of(name, &record).map(|k| (*name, k)))
            .collect();

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query(
            r#"
            INSERT INTO records (part, key, value, size_bytes)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(part, key) DO UPDATE SET
                value = excluded.value,
                size_bytes = excluded.size_bytes
            "#,
        )
        .bind(partition.name())
        .bind(&key)
        .bind(&text)
        .bind(text.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        sqlx::query("DELETE FROM record_indexes WHERE part = ? AND key = ?")
            .bind(partition.name())
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        for (name, index_key) in &indexes {
            let (num, text): (Option<i64>, Option<String>) = match index_key {
                IndexKey::Int(n) => (Some(*n), None),
                IndexKey::Text(s) => (None, Some(s.clone())),
            };
            sqlx::query(
                "INSERT INTO record_indexes (part, index_name, key, num_value, text_value) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(partition.name())
            .bind(*name)
            .bind(&key)
            .bind(num)
            .bind(text)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;

        debug!(partition = %partition, key = %key, bytes = text.len(), "Record written");
        Ok(())
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StorageError> {
        let row = retry("sqlite_get", &RetryConfig::query(), || async {
            sqlx::query("SELECT value FROM records WHERE part = ? AND key = ?")
                .bind(partition.name())
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        match row {
            Some(row) => {
                let text = Self::read_text(&row, "value")?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn get_all(&self, partition: Partition) -> Result<Vec<Value>, StorageError> {
        let rows = sqlx::query("SELECT value FROM records WHERE part = ? ORDER BY key ASC")
            .bind(partition.name())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Self::decode_rows(rows)
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query("DELETE FROM record_indexes WHERE part = ? AND key = ?")
            .bind(partition.name())
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        sqlx::query("DELETE FROM records WHERE part = ? AND key = ?")
            .bind(partition.name())
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)
    }

    async fn clear(&self, partition: Partition) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query("DELETE FROM record_indexes WHERE part = ?")
            .bind(partition.name())
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        let result = sqlx::query("DELETE FROM records WHERE part = ?")
            .bind(partition.name())
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        info!(partition = %partition, removed = result.rows_affected(), "Partition cleared");
        Ok(())
    }

    async fn get_by_index(
        &self,
        partition: Partition,
        index: &str,
        value: &IndexKey,
    ) -> Result<Vec<Value>, StorageError> {
        check_index(partition, index)?;

        let column = match value {
            IndexKey::Int(_) => "num_value",
            IndexKey::Text(_) => "text_value",
        };
        let sql = format!(
            "SELECT r.value FROM records r \
             JOIN record_indexes i ON i.part = r.part AND i.key = r.key \
             WHERE i.part = ? AND i.index_name = ? AND i.{} = ? \
             ORDER BY r.key ASC",
            column
        );

        let query = sqlx::query(&sql).bind(partition.name()).bind(index);
        let query = match value {
            IndexKey::Int(n) => query.bind(*n),
            IndexKey::Text(s) => query.bind(s.clone()),
        };

        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        Self::decode_rows(rows)
    }

    async fn get_by_index_range(
        &self,
        partition: Partition,
        index: &str,
        range: &IndexRange,
    ) -> Result<Vec<Value>, StorageError> {
        check_index(partition, index)?;

        let conditions: Vec<(String, IndexKey)> = [
            Self::bound_condition(&range.lower, true),
            Self::bound_condition(&range.upper, false),
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut sql = String::from(
            "SELECT r.value FROM records r \
             JOIN record_indexes i ON i.part = r.part AND i.key = r.key \
             WHERE i.part = ? AND i.index_name = ?",
        );
        for (condition, _) in &conditions {
            sql.push_str(" AND ");
            sql.push_str(condition);
        }
        sql.push_str(" ORDER BY r.key ASC");

        let mut query = sqlx::query(&sql).bind(partition.name()).bind(index);
        for (_, key) in &conditions {
            query = match key {
                IndexKey::Int(n) => query.bind(*n),
                IndexKey::Text(s) => query.bind(s.clone()),
            };
        }

        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        Self::decode_rows(rows)
    }

    async fn partition_size(&self, partition: Partition) -> Result<PartitionSize, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt, COALESCE(SUM(size_bytes), 0) AS total FROM records WHERE part = ?",
        )
        .bind(partition.name())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let count: i64 = row.try_get("cnt").map_err(backend)?;
        let total: i64 = row.try_get("total").map_err(backend)?;

        Ok(PartitionSize {
            partition,
            count: count as u64,
            size_bytes: total as u64,
        })
    }
}
