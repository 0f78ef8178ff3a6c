//! Discovery loop: walk every object under the configured prefix, then
//! sleep, then walk again.
//!
//! Depending on where scan records live, each discovered key is either
//! registered in the record table for the selection loop to pick up, or
//! checked and scanned on the spot.

use crate::services::{object_store::ObjectStoreError, scanner::ScannerService};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a pass does with each key it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Ensure a record exists; never touches existing records.
    Register,
    /// Scan the object right away if it is due.
    ScanInline,
}

/// Counters for a single pass over the bucket.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub pages: usize,
    pub objects: usize,
    pub registered: usize,
    pub scanned: usize,
    pub failed: usize,
}

pub struct DiscoveryTask {
    scanner: ScannerService,
    prefix: String,
    mode: DiscoveryMode,
    interval: Duration,
}

impl DiscoveryTask {
    pub fn new(
        scanner: ScannerService,
        prefix: impl Into<String>,
        mode: DiscoveryMode,
        interval: Duration,
    ) -> Self {
        Self {
            scanner,
            prefix: prefix.into(),
            mode,
            interval,
        }
    }

    /// Run passes until `cancel` fires. Passes never overlap: the pause
    /// starts when the previous pass ends.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            prefix = %self.prefix,
            mode = ?self.mode,
            interval_secs = self.interval.as_secs(),
            "discovery loop started"
        );

        while !cancel.is_cancelled() {
            match self.run_pass(&cancel).await {
                Ok(summary) => info!(
                    pages = summary.pages,
                    registered = summary.registered,
                    scanned = summary.scanned,
                    failed = summary.failed,
                    "checked {} files, waiting {}s before restarting",
                    summary.objects,
                    self.interval.as_secs()
                ),
                Err(err) => error!(
                    error = %err,
                    "discovery pass aborted, waiting {}s before restarting",
                    self.interval.as_secs()
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("discovery loop stopped");
    }

    /// List every page under the prefix and handle each key.
    ///
    /// A failure on a single object is logged and counted; a listing failure
    /// ends the pass. Cancellation is honored between pages.
    pub async fn run_pass(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PassSummary, ObjectStoreError> {
        let mut summary = PassSummary::default();
        let mut continuation_token = None;

        loop {
            let page = self
                .scanner
                .objects()
                .list_page(&self.prefix, continuation_token.take())
                .await?;
            summary.pages += 1;

            for key in &page.keys {
                summary.objects += 1;
                self.handle_key(key, &mut summary).await;
            }
            debug!(
                "finished checking page {} ({} objects)",
                summary.pages,
                page.keys.len()
            );

            match page.next_token {
                Some(token) if !cancel.is_cancelled() => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(summary)
    }

    async fn handle_key(&self, key: &str, summary: &mut PassSummary) {
        match self.mode {
            DiscoveryMode::Register => {
                match self.scanner.records().insert_if_absent(key).await {
                    Ok(true) => {
                        summary.registered += 1;
                        debug!(key = %key, "registered new object");
                    }
                    Ok(false) => {}
                    Err(err) => {
                        summary.failed += 1;
                        warn!(key = %key, error = %err, "error while registering object");
                    }
                }
            }
            DiscoveryMode::ScanInline => {
                if !self.scanner.needs_scan(key).await {
                    return;
                }
                match self.scanner.scan(key).await {
                    Ok(_) => summary.scanned += 1,
                    Err(err) => {
                        summary.failed += 1;
                        warn!(key = %key, error = %err, "error while scanning object");
                    }
                }
            }
        }
    }
}
