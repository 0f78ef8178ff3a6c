//! Selection loop: repeatedly pick the least recently scanned record and
//! scan it.
//!
//! Every iteration re-queries the record store, so records registered by a
//! concurrent discovery pass are visible to the very next selection.
//!
//! A record whose scan fails stays unchanged, so it would keep sorting first.
//! Failed keys are passed over for `retry_after` before being offered again.

use crate::{models::scan_record::ScanResult, services::scanner::ScannerService};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a single selection iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// No record is eligible: the store is empty or every record is cooling
    /// down after a failed scan.
    Empty,
    /// The stalest record was scanned recently enough, so every record is.
    UpToDate { key: String },
    Scanned { key: String, result: ScanResult },
    /// Selecting or scanning failed; the record is unchanged.
    Failed { key: Option<String>, error: String },
}

pub struct SelectionTask {
    scanner: ScannerService,
    interval: Duration,
    retry_after: Duration,
    /// Keys whose last scan failed, with the instant they become eligible again.
    cooling_down: Mutex<HashMap<String, Instant>>,
}

impl SelectionTask {
    pub fn new(scanner: ScannerService, interval: Duration, retry_after: Duration) -> Self {
        Self {
            scanner,
            interval,
            retry_after,
            cooling_down: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retry_after_secs = self.retry_after.as_secs(),
            "selection loop started"
        );

        while !cancel.is_cancelled() {
            match self.select_once().await {
                Selection::Scanned { key, result } => {
                    debug!(key = %key, result = %result, "selected and scanned")
                }
                Selection::UpToDate { key } => {
                    debug!(key = %key, "stalest record is not due yet")
                }
                Selection::Empty => debug!("no eligible scan records"),
                Selection::Failed { key, error } => {
                    warn!(key = ?key, error = %error, "selection failed; record left unchanged")
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("selection loop stopped");
    }

    /// Select the stalest record that is not cooling down and scan it if it
    /// is due.
    pub async fn select_once(&self) -> Selection {
        let skip = self.cooling_down_keys();
        let record = match self.scanner.records().select_stalest(&skip).await {
            Ok(Some(record)) => record,
            Ok(None) => return Selection::Empty,
            Err(err) => {
                return Selection::Failed {
                    key: None,
                    error: err.to_string(),
                };
            }
        };

        if !self.scanner.is_record_due(&record) {
            return Selection::UpToDate {
                key: record.object_key,
            };
        }

        match self.scanner.scan(&record.object_key).await {
            Ok(result) => Selection::Scanned {
                key: record.object_key,
                result,
            },
            Err(err) => {
                self.cool_down(&record.object_key);
                Selection::Failed {
                    key: Some(record.object_key),
                    error: err.to_string(),
                }
            }
        }
    }

    /// Keys still cooling down; expired entries are dropped.
    fn cooling_down_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut cooling_down = self
            .cooling_down
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cooling_down.retain(|_, until| *until > now);
        cooling_down.keys().cloned().collect()
    }

    fn cool_down(&self, key: &str) {
        self.cooling_down
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Instant::now() + self.retry_after);
    }
}
