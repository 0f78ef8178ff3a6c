//! Represents the persisted scan state of a single object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Classification of a single scan attempt.
///
/// `Unknown` doubles as the initial state of a freshly discovered record and
/// as the fallback for any response that is neither clean nor infected.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ScanResult {
    Clean,
    Infected,
    #[default]
    Unknown,
}

impl ScanResult {
    /// Map the scan endpoint's HTTP status to a classification.
    ///
    /// - `200` → `Clean`
    /// - `406` → `Infected`
    /// - anything else → `Unknown`
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200 => ScanResult::Clean,
            406 => ScanResult::Infected,
            _ => ScanResult::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanResult::Clean => "clean",
            ScanResult::Infected => "infected",
            ScanResult::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per object key.
///
/// Created the first time discovery observes the object and only ever
/// rewritten by the scan executor, which sets timestamp and result together.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ScanRecord {
    /// Object key in the bucket. Unique and stable across rescans.
    pub object_key: String,

    /// When the last completed scan finished. `None` means never scanned.
    pub last_scan_timestamp: Option<DateTime<Utc>>,

    /// Outcome of the last completed scan.
    pub last_scan_result: ScanResult,
}

impl ScanRecord {
    /// A record for an object that has been observed but never scanned.
    pub fn unscanned(object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            last_scan_timestamp: None,
            last_scan_result: ScanResult::Unknown,
        }
    }

    /// A record describing a scan that completed at `at`.
    pub fn scanned(object_key: impl Into<String>, at: DateTime<Utc>, result: ScanResult) -> Self {
        Self {
            object_key: object_key.into(),
            last_scan_timestamp: Some(at),
            last_scan_result: result,
        }
    }
}
