//! In-memory stand-ins for the bucket, the scan endpoint, the record table
//! and the wall clock.

use crate::{
    models::scan_record::ScanRecord,
    services::{
        clock::Clock,
        object_store::{ObjectPage, ObjectStore, ObjectStoreError, ObjectStoreResult},
        record_store::{RecordStore, RecordStoreResult},
        scan_client::{ScanClientError, ScanEndpoint},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Bucket contents held in a sorted map, listed `page_size` keys at a time.
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    tags: Mutex<HashMap<String, BTreeMap<String, String>>>,
    page_size: usize,
    unreadable: HashSet<String>,
    untaggable: HashSet<String>,
    fail_listing_on_page: Option<usize>,
    list_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            tags: Mutex::new(HashMap::new()),
            page_size: 1000,
            unreadable: HashSet::new(),
            untaggable: HashSet::new(),
            fail_listing_on_page: None,
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_object(self, key: &str, data: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(data));
        self
    }

    pub fn with_tag(self, key: &str, name: &str, value: &str) -> Self {
        self.tags
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Downloads of `key` fail.
    pub fn with_unreadable(mut self, key: &str) -> Self {
        self.unreadable.insert(key.to_string());
        self
    }

    /// Tag reads and writes on `key` fail.
    pub fn with_untaggable(mut self, key: &str) -> Self {
        self.untaggable.insert(key.to_string());
        self
    }

    /// Listing fails when page number `page` (1-based) is requested.
    pub fn with_listing_failure_on_page(mut self, page: usize) -> Self {
        self.fail_listing_on_page = Some(page);
        self
    }

    pub fn add_object(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(data));
    }

    pub fn tag(&self, key: &str, name: &str) -> Option<String> {
        self.tags
            .lock()
            .unwrap()
            .get(key)
            .and_then(|tags| tags.get(name).cloned())
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn ensure_exists(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> ObjectStoreResult<ObjectPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let page_number = continuation_token
            .as_deref()
            .map(|token| token.split(':').next().unwrap().parse::<usize>().unwrap())
            .unwrap_or(1);
        if self.fail_listing_on_page == Some(page_number) {
            return Err(ObjectStoreError::List {
                prefix: prefix.to_string(),
                message: "connection reset by peer".into(),
            });
        }

        let after = continuation_token
            .as_deref()
            .and_then(|token| token.split_once(':'))
            .map(|(_, key)| key.to_string());
        let objects = self.objects.lock().unwrap();
        let mut matching = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| after.as_ref().is_none_or(|after| *key > after))
            .cloned();

        let keys: Vec<String> = matching.by_ref().take(self.page_size).collect();
        let next_token = match (matching.next(), keys.last()) {
            (Some(_), Some(last)) => Some(format!("{}:{}", page_number + 1, last)),
            _ => None,
        };
        Ok(ObjectPage { keys, next_token })
    }

    async fn get_object(&self, key: &str) -> ObjectStoreResult<Bytes> {
        if self.unreadable.contains(key) {
            return Err(ObjectStoreError::Download {
                key: key.to_string(),
                message: "access denied".into(),
            });
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::Download {
                key: key.to_string(),
                message: "no such key".into(),
            })
    }

    async fn get_tag(&self, key: &str, name: &str) -> ObjectStoreResult<Option<String>> {
        if self.untaggable.contains(key) || !self.ensure_exists(key) {
            return Err(ObjectStoreError::ReadTags {
                key: key.to_string(),
                message: "access denied".into(),
            });
        }
        Ok(self.tag(key, name))
    }

    async fn put_tag(&self, key: &str, name: &str, value: &str) -> ObjectStoreResult<()> {
        if self.untaggable.contains(key) || !self.ensure_exists(key) {
            return Err(ObjectStoreError::WriteTags {
                key: key.to_string(),
                message: "access denied".into(),
            });
        }
        self.tags
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Scan records in a sorted map.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, ScanRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: ScanRecord) -> Self {
        self.records
            .lock()
            .unwrap()
            .insert(record.object_key.clone(), record);
        self
    }

    pub fn record(&self, key: &str) -> Option<ScanRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &str) -> RecordStoreResult<Option<ScanRecord>> {
        Ok(self.record(key))
    }

    async fn insert_if_absent(&self, key: &str) -> RecordStoreResult<bool> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(key.to_string(), ScanRecord::unscanned(key));
        Ok(true)
    }

    async fn upsert_overwrite(&self, record: &ScanRecord) -> RecordStoreResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.object_key.clone(), record.clone());
        Ok(())
    }

    async fn select_stalest(&self, skip: &[String]) -> RecordStoreResult<Option<ScanRecord>> {
        // BTreeMap iterates by key, so `min_by_key` breaks ties by key.
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|record| !skip.contains(&record.object_key))
            .min_by_key(|record| record.last_scan_timestamp)
            .cloned())
    }
}

/// Scan endpoint answering with a fixed status per key.
pub struct StubScanEndpoint {
    default_status: u16,
    statuses: HashMap<String, u16>,
    unreachable: HashSet<String>,
    submitted: Mutex<Vec<String>>,
}

impl StubScanEndpoint {
    /// Every submission comes back clean.
    pub fn clean() -> Self {
        Self {
            default_status: 200,
            statuses: HashMap::new(),
            unreachable: HashSet::new(),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_status(mut self, key: &str, status: u16) -> Self {
        self.statuses.insert(key.to_string(), status);
        self
    }

    /// Submissions of `key` get no response at all.
    pub fn with_unreachable(mut self, key: &str) -> Self {
        self.unreachable.insert(key.to_string());
        self
    }

    /// Keys submitted so far, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScanEndpoint for StubScanEndpoint {
    async fn submit(&self, key: &str, _payload: Bytes) -> Result<u16, ScanClientError> {
        self.submitted.lock().unwrap().push(key.to_string());
        if self.unreachable.contains(key) {
            return Err(ScanClientError::Timeout {
                key: key.to_string(),
                timeout: Duration::from_secs(30),
            });
        }
        Ok(self
            .statuses
            .get(key)
            .copied()
            .unwrap_or(self.default_status))
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
