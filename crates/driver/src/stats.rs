//! Read loop counters
//!
//! Written by the reader thread, read by anyone holding the controller.
//! Counters are independent relaxed atomics; a snapshot is not a consistent
//! cut across them, only a recent value of each.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Live counters shared with the reader thread
#[derive(Debug)]
pub struct ReadStats {
    reads: AtomicU64,
    bytes: AtomicU64,
    reports: AtomicU64,
    malformed: AtomicU64,
    transport_errors: AtomicU64,
    dropped_reports: AtomicU64,
    started_at: RwLock<Option<Instant>>,
}

impl Default for ReadStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadStats {
    pub fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            reports: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            dropped_reports: AtomicU64::new(0),
            started_at: RwLock::new(None),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Mark the reader as started
    pub fn mark_started(&self) {
        let mut started_at = self
            .started_at
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *started_at = Some(Instant::now());
    }

    /// Time since the reader started
    pub fn uptime(&self) -> Option<Duration> {
        let started_at = self
            .started_at
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        started_at.map(|t| t.elapsed())
    }

    /// Record a completed read of `bytes` bytes
    pub fn record_read(&self, bytes: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_report(&self) {
        self.reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_report(&self) {
        self.dropped_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            reports: self.reports.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            dropped_reports: self.dropped_reports.load(Ordering::Relaxed),
            uptime: self.uptime(),
        }
    }
}

/// Point-in-time copy of [`ReadStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Completed reads
    pub reads: u64,
    /// Bytes returned by completed reads
    pub bytes: u64,
    /// Reads that decoded into a report
    pub reports: u64,
    /// Reads that failed to decode
    pub malformed: u64,
    /// Failed reads, timeouts excluded
    pub transport_errors: u64,
    /// Reports dropped because the report channel was full
    pub dropped_reports: u64,
    pub uptime: Option<Duration>,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reads ({} bytes), {} reports, {} malformed, {} transport errors, {} dropped",
            self.reads,
            self.bytes,
            self.reports,
            self.malformed,
            self.transport_errors,
            self.dropped_reports
        )
    }
}
