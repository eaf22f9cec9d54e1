//! SQLite implementation of the RecordStore trait
//!
//! This module provides a SQLite-based implementation of the RecordStore trait
//! using rusqlite and tokio-rusqlite for async operations. Provider snapshots
//! live in a JSON column and are replaced per provider with `json_set`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use std::collections::BTreeMap;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::RecordStore;
use crate::error::DbError;
use crate::models::{
    MetricSnapshot, NewRecord, Partition, ProgressKey, ProgressStatus, Record, ScoreUpdate,
    SyncProgress,
};

const RECORD_COLUMNS: &str =
    "id, record_type, locale, public_url, popularity_metrics, popularity_score";

/// SQLite record store
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Create a new SQLite store
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory store (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

/// Prepared form of a ScoreUpdate, serialized outside the connection thread
struct EncodedUpdate {
    record_id: String,
    path: String,
    snapshot: String,
    delta: f64,
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    // =========================================================================
    // Record operations
    // =========================================================================

    async fn insert_record(&self, record: &NewRecord) -> Result<(), DbError> {
        let id = record.id.clone();
        let record_type = record.record_type.clone();
        let locale = record.locale.clone();
        let public_url = record.public_url.clone();
        let published = record.published;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO records
                    (id, record_type, locale, published, public_url, popularity_metrics, popularity_score)
                    VALUES (?1, ?2, ?3, ?4, ?5, '{}', 0)
                    "#,
                    rusqlite::params![id, record_type, locale, published, public_url],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<Record>, DbError> {
        let id = id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM records WHERE id = ?1",
                    RECORD_COLUMNS
                ))?;

                let result = stmt.query_row([&id], row_to_record).optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn fetch_after(
        &self,
        partition: &Partition,
        after: &str,
        limit: usize,
    ) -> Result<Vec<Record>, DbError> {
        let record_type = partition.record_type.clone();
        let locale = partition.locale.clone();
        let after = after.to_string();
        let limit = limit as i64;

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"
                    SELECT {}
                    FROM records
                    WHERE record_type = ?1 AND locale = ?2 AND published = 1 AND id > ?3
                    ORDER BY id ASC
                    LIMIT ?4
                    "#,
                    RECORD_COLUMNS
                ))?;

                let records = stmt
                    .query_map(
                        rusqlite::params![record_type, locale, after, limit],
                        row_to_record,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(records)
            })
            .await
            .map_err(Into::into)
    }

    async fn apply_updates(&self, updates: &[ScoreUpdate]) -> Result<(), DbError> {
        if updates.is_empty() {
            return Ok(());
        }

        let encoded = updates
            .iter()
            .map(|update| {
                let snapshot = serde_json::to_string(&update.snapshot)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(EncodedUpdate {
                    record_id: update.record_id.clone(),
                    path: format!("$.\"{}\"", update.provider),
                    snapshot,
                    delta: update.delta,
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        UPDATE records
                        SET popularity_metrics = json_set(popularity_metrics, ?1, json(?2)),
                            popularity_score = popularity_score + ?3
                        WHERE id = ?4
                        "#,
                    )?;

                    for update in &encoded {
                        stmt.execute(rusqlite::params![
                            update.path,
                            update.snapshot,
                            update.delta,
                            update.record_id
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    // =========================================================================
    // Resume state operations
    // =========================================================================

    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<SyncProgress>, DbError> {
        let record_type = key.record_type.clone();
        let locale = key.locale.clone();
        let provider = key.provider.clone();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT record_type, locale, provider, cursor, status, error_message, updated_at
                    FROM sync_progress
                    WHERE record_type = ?1 AND locale = ?2 AND provider = ?3
                    "#,
                )?;

                let result = stmt
                    .query_row(
                        rusqlite::params![record_type, locale, provider],
                        row_to_progress,
                    )
                    .optional()?;

                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn save_progress(&self, progress: &SyncProgress) -> Result<(), DbError> {
        let record_type = progress.key.record_type.clone();
        let locale = progress.key.locale.clone();
        let provider = progress.key.provider.clone();
        let cursor = progress.cursor.clone();
        let status = progress.status.to_string();
        let error_message = progress.error_message.clone();
        let updated_at = progress.updated_at.unwrap_or_else(Utc::now).to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO sync_progress
                    (record_type, locale, provider, cursor, status, error_message, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    rusqlite::params![
                        record_type,
                        locale,
                        provider,
                        cursor,
                        status,
                        error_message,
                        updated_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn list_progress(&self) -> Result<Vec<SyncProgress>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT record_type, locale, provider, cursor, status, error_message, updated_at
                    FROM sync_progress
                    ORDER BY record_type, locale, provider
                    "#,
                )?;

                let rows = stmt
                    .query_map([], row_to_progress)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(rows)
            })
            .await
            .map_err(Into::into)
    }
}

/// Map a `records` row selected with RECORD_COLUMNS
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let metrics: String = row.get(4)?;
    let popularity_metrics: BTreeMap<String, MetricSnapshot> = serde_json::from_str(&metrics)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Record {
        id: row.get(0)?,
        record_type: row.get(1)?,
        locale: row.get(2)?,
        public_url: row.get(3)?,
        popularity_metrics,
        popularity_score: row.get(5)?,
    })
}

/// Map a `sync_progress` row
fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncProgress> {
    let status: String = row.get(4)?;
    let status = status.parse::<ProgressStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into())
    })?;

    Ok(SyncProgress {
        key: ProgressKey {
            record_type: row.get(0)?,
            locale: row.get(1)?,
            provider: row.get(2)?,
        },
        cursor: row.get(3)?,
        status,
        error_message: row.get(5)?,
        updated_at: parse_datetime(row.get::<_, Option<String>>(6)?),
    })
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // SQLite's CURRENT_TIMESTAMP format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
