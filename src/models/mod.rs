//! Core data models for the scan scheduler.
//!
//! A `ScanRecord` tracks when an object was last scanned and what the scan
//! endpoint said about it. Records map to the `scan_records` table via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod scan_record;
