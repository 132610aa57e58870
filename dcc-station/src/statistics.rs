//! Command station statistics collection

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by a driver and its heartbeat task concurrently
///
/// Counters are informational only; no protocol decision reads them.
#[derive(Debug, Default)]
pub struct StationStatistics {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    checksum_errors: AtomicU64,
    timeouts: AtomicU64,
    heartbeats: AtomicU64,
    commits: AtomicU64,
    cv_reads: AtomicU64,
    cv_writes: AtomicU64,
}

/// Point-in-time copy of [`StationStatistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub checksum_errors: u64,
    pub timeouts: u64,
    pub heartbeats: u64,
    pub commits: u64,
    pub cv_reads: u64,
    pub cv_writes: u64,
}

impl StationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_frames_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checksum_errors(&self) {
        self.checksum_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_heartbeats(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cv_reads(&self) {
        self.cv_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cv_writes(&self) {
        self.cv_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            cv_reads: self.cv_reads.load(Ordering::Relaxed),
            cv_writes: self.cv_writes.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn clear(&self) {
        for counter in [
            &self.frames_sent,
            &self.frames_received,
            &self.checksum_errors,
            &self.timeouts,
            &self.heartbeats,
            &self.commits,
            &self.cv_reads,
            &self.cv_writes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl StatisticsSnapshot {
    /// Percentage of received frames that failed their checksum or timed out
    ///
    /// Returns 0.0 if nothing has been received.
    pub fn error_rate(&self) -> f64 {
        let errors = self.checksum_errors + self.timeouts;
        let total = self.frames_received + self.timeouts;
        if total == 0 {
            0.0
        } else {
            (errors as f64 / total as f64) * 100.0
        }
    }
}
