//! Crawl Metrics
//!
//! Cache-line aligned atomic counters shared by every crawl of a process.
//! The binary exports them as prometheus gauges.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment
pub const CACHE_LINE_SIZE: usize = 64;

/// Discovery counters, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct CrawlMetrics {
    /// Plugin calls answered with any HTTP status
    pub documents_fetched: AtomicU64,
    /// Calls that ended in an error
    pub fetch_failures: AtomicU64,
    /// Calls retried after a healthy status probe
    pub probe_retries: AtomicU64,
    /// Links dropped by the visited set, parent check or denylists
    pub links_skipped: AtomicU64,
    /// Documents written to the store
    pub documents_persisted: AtomicU64,
    /// Telemetry fetches skipped because another fetch held the lock
    pub metric_fetches_locked: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<CrawlMetrics>() <= CACHE_LINE_SIZE);

impl Default for CrawlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self {
            documents_fetched: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            probe_retries: AtomicU64::new(0),
            links_skipped: AtomicU64::new(0),
            documents_persisted: AtomicU64::new(0),
            metric_fetches_locked: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 8],
        }
    }

    #[inline]
    pub fn record_fetch(&self) {
        self.documents_fetched.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_probe_retry(&self) {
        self.probe_retries.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_links_skipped(&self, count: u64) {
        if count > 0 {
            self.links_skipped.fetch_add(count, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_persisted(&self, count: u64) {
        self.documents_persisted.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_lock_skip(&self) {
        self.metric_fetches_locked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> CrawlMetricsSnapshot {
        CrawlMetricsSnapshot {
            documents_fetched: self.documents_fetched.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            probe_retries: self.probe_retries.load(Ordering::Relaxed),
            links_skipped: self.links_skipped.load(Ordering::Relaxed),
            documents_persisted: self.documents_persisted.load(Ordering::Relaxed),
            metric_fetches_locked: self.metric_fetches_locked.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of crawl metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlMetricsSnapshot {
    pub documents_fetched: u64,
    pub fetch_failures: u64,
    pub probe_retries: u64,
    pub links_skipped: u64,
    pub documents_persisted: u64,
    pub metric_fetches_locked: u64,
}

impl CrawlMetricsSnapshot {
    /// Fraction of plugin calls that failed (0.0 to 1.0)
    pub fn failure_ratio(&self) -> f64 {
        let total = self.documents_fetched + self.fetch_failures;
        if total == 0 {
            0.0
        } else {
            self.fetch_failures as f64 / total as f64
        }
    }
}
