//! src/services/record_store.rs
//!
//! Persistence for scan records. Two interchangeable backends sit behind
//! `RecordStore`:
//!
//! - `SqliteRecordStore` keeps one row per object key in `scan_records` and
//!   supports staleness-ordered selection.
//! - `TagRecordStore` keeps only the last scan time, as a tag on the object
//!   itself. It cannot select by staleness, so it is only used when discovery
//!   scans inline.

use crate::{
    models::scan_record::{ScanRecord, ScanResult},
    services::object_store::{ObjectStore, ObjectStoreError},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the object tag holding the last scan time.
pub const TIMESTAMP_TAG: &str = "last_scan_timestamp";

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error("{0} is not supported by this record store")]
    Unsupported(&'static str),
}

pub type RecordStoreResult<T> = Result<T, RecordStoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the record for `key`, if one exists.
    async fn get(&self, key: &str) -> RecordStoreResult<Option<ScanRecord>>;

    /// Create an unscanned record for `key` unless one already exists.
    ///
    /// Returns `true` if a record was created. Existing records are never
    /// modified.
    async fn insert_if_absent(&self, key: &str) -> RecordStoreResult<bool>;

    /// Create or replace the record, overwriting timestamp and result together.
    async fn upsert_overwrite(&self, record: &ScanRecord) -> RecordStoreResult<()>;

    /// The least recently scanned record whose key is not in `skip`;
    /// never-scanned records come first and ties are broken by key.
    async fn select_stalest(&self, skip: &[String]) -> RecordStoreResult<Option<ScanRecord>>;
}

/// Scan records in the `scan_records` SQLite table.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Safe to run on every startup.
    pub async fn migrate(&self) -> RecordStoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, key: &str) -> RecordStoreResult<Option<ScanRecord>> {
        let record = sqlx::query_as::<_, ScanRecord>(
            "SELECT object_key, last_scan_timestamp, last_scan_result
             FROM scan_records WHERE object_key = ?",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn insert_if_absent(&self, key: &str) -> RecordStoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO scan_records (object_key, last_scan_timestamp, last_scan_result)
             VALUES (?, NULL, ?)
             ON CONFLICT(object_key) DO NOTHING",
        )
        .bind(key)
        .bind(ScanResult::Unknown)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_overwrite(&self, record: &ScanRecord) -> RecordStoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_records (object_key, last_scan_timestamp, last_scan_result)
            VALUES (?, ?, ?)
            ON CONFLICT(object_key) DO UPDATE SET
                last_scan_timestamp = excluded.last_scan_timestamp,
                last_scan_result = excluded.last_scan_result
            "#,
        )
        .bind(&record.object_key)
        .bind(record.last_scan_timestamp)
        .bind(record.last_scan_result)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn select_stalest(&self, skip: &[String]) -> RecordStoreResult<Option<ScanRecord>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT object_key, last_scan_timestamp, last_scan_result FROM scan_records",
        );
        if !skip.is_empty() {
            query.push(" WHERE object_key NOT IN (");
            let mut keys = query.separated(", ");
            for key in skip {
                keys.push_bind(key.as_str());
            }
            query.push(")");
        }
        query.push(" ORDER BY last_scan_timestamp ASC NULLS FIRST, object_key ASC LIMIT 1");

        let record = query
            .build_query_as::<ScanRecord>()
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }
}

/// Scan timestamps stored as a tag on each object.
///
/// Only the timestamp survives; results are reported through logs, so
/// records read back from tags always carry `ScanResult::Unknown`.
#[derive(Clone)]
pub struct TagRecordStore {
    objects: Arc<dyn ObjectStore>,
}

impl TagRecordStore {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl RecordStore for TagRecordStore {
    async fn get(&self, key: &str) -> RecordStoreResult<Option<ScanRecord>> {
        let tag = self.objects.get_tag(key, TIMESTAMP_TAG).await?;
        let last_scan_timestamp = tag.as_deref().and_then(|value| {
            let parsed = parse_tag_timestamp(value);
            if parsed.is_none() {
                warn!(key = %key, value = %value, "unparseable scan timestamp tag; treating as never scanned");
            }
            parsed
        });

        Ok(Some(ScanRecord {
            object_key: key.to_string(),
            last_scan_timestamp,
            last_scan_result: ScanResult::Unknown,
        }))
    }

    async fn insert_if_absent(&self, _key: &str) -> RecordStoreResult<bool> {
        // The object itself is the record.
        Ok(false)
    }

    async fn upsert_overwrite(&self, record: &ScanRecord) -> RecordStoreResult<()> {
        let Some(at) = record.last_scan_timestamp else {
            return Err(RecordStoreError::Unsupported("clearing the scan timestamp"));
        };
        self.objects
            .put_tag(&record.object_key, TIMESTAMP_TAG, &format_tag_timestamp(at))
            .await?;
        Ok(())
    }

    async fn select_stalest(&self, _skip: &[String]) -> RecordStoreResult<Option<ScanRecord>> {
        Err(RecordStoreError::Unsupported("staleness selection"))
    }
}

fn format_tag_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339 values as well as naive ISO-8601 values, which are taken
/// to be UTC.
fn parse_tag_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
