//! src/services/scanner.rs
//!
//! ScannerService ties the bucket, the scan endpoint and the record store
//! together. It answers two questions for the background loops:
//!
//! - is an object due for scanning (`needs_scan`)?
//! - scan it now and record the outcome (`scan`).

use crate::{
    models::scan_record::{ScanRecord, ScanResult},
    services::{
        clock::Clock,
        object_store::{ObjectStore, ObjectStoreError},
        record_store::{RecordStore, RecordStoreError},
        scan_client::{ScanClientError, ScanEndpoint},
    },
};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Download(ObjectStoreError),
    #[error(transparent)]
    Submit(#[from] ScanClientError),
    #[error("recording scan of `{key}` failed: {source}")]
    Record {
        key: String,
        #[source]
        source: RecordStoreError,
    },
}

/// True when the last scan is older than `interval`.
///
/// A missing timestamp counts as the Unix epoch, so unscanned objects are
/// always due.
pub fn is_due(last_scan: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: TimeDelta) -> bool {
    now - last_scan.unwrap_or(DateTime::UNIX_EPOCH) > interval
}

#[derive(Clone)]
pub struct ScannerService {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    endpoint: Arc<dyn ScanEndpoint>,
    clock: Arc<dyn Clock>,
    rescan_interval: TimeDelta,
}

impl ScannerService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        endpoint: Arc<dyn ScanEndpoint>,
        clock: Arc<dyn Clock>,
        rescan_interval: TimeDelta,
    ) -> Self {
        Self {
            objects,
            records,
            endpoint,
            clock,
            rescan_interval,
        }
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Whether `record` is due under the rescan interval as of now.
    pub fn is_record_due(&self, record: &ScanRecord) -> bool {
        is_due(
            record.last_scan_timestamp,
            self.clock.now(),
            self.rescan_interval,
        )
    }

    /// Whether the object at `key` should be scanned now.
    ///
    /// Read-only. A missing record means "never scanned". If the record
    /// cannot be read the object is skipped for this round.
    pub async fn needs_scan(&self, key: &str) -> bool {
        match self.records.get(key).await {
            Ok(Some(record)) => self.is_record_due(&record),
            Ok(None) => true,
            Err(err) => {
                warn!(key = %key, error = %err, "could not read scan record; skipping");
                false
            }
        }
    }

    /// Download, submit, classify and record one object.
    ///
    /// The record is only written once a classification exists. A failed
    /// download or a request that never got a response leaves it untouched.
    pub async fn scan(&self, key: &str) -> Result<ScanResult, ScanError> {
        let payload = self
            .objects
            .get_object(key)
            .await
            .map_err(ScanError::Download)?;

        let status = match self.endpoint.submit(key, payload).await {
            Ok(status) => status,
            Err(err) => {
                warn!(key = %key, result = %ScanResult::Unknown, "scan endpoint did not respond; record left unchanged");
                return Err(err.into());
            }
        };
        let result = ScanResult::from_http_status(status);

        let record = ScanRecord::scanned(key, self.clock.now(), result);
        self.records
            .upsert_overwrite(&record)
            .await
            .map_err(|source| ScanError::Record {
                key: key.to_string(),
                source,
            })?;

        info!(key = %key, result = %result, status, "{} scan result: {}", key, result);
        Ok(result)
    }
}
