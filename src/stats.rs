use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every pipeline stage. All updates are relaxed; the
/// values are only read for reporting.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub pages_scanned: AtomicU64,
    pub pages_submitted: AtomicU64,
    pub pages_processed: AtomicU64,
    pub pages_failed: AtomicU64,
    pub terms_queued: AtomicU64,
    pub terms_inserted: AtomicU64,
    pub terms_failed: AtomicU64,
    pub terms_discarded: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub pages_scanned: u64,
    pub pages_submitted: u64,
    pub pages_processed: u64,
    pub pages_failed: u64,
    pub terms_queued: u64,
    pub terms_inserted: u64,
    pub terms_failed: u64,
    pub terms_discarded: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_scanned(&self) {
        self.pages_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_submitted(&self) {
        self.pages_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_processed(&self) {
        self.pages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed_pages(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_queued(&self, count: u64) {
        self.terms_queued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_inserted(&self) {
        self.terms_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed_terms(&self) {
        self.terms_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_discarded(&self, count: u64) {
        self.terms_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pages_scanned: self.pages_scanned.load(Ordering::Relaxed),
            pages_submitted: self.pages_submitted.load(Ordering::Relaxed),
            pages_processed: self.pages_processed.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            terms_queued: self.terms_queued.load(Ordering::Relaxed),
            terms_inserted: self.terms_inserted.load(Ordering::Relaxed),
            terms_failed: self.terms_failed.load(Ordering::Relaxed),
            terms_discarded: self.terms_discarded.load(Ordering::Relaxed),
        }
    }
}
