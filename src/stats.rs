//! Run-wide statistics.
//!
//! Every counter is an independent `AtomicU64` bumped by whichever job
//! finishes the corresponding event.  Counters only ever grow.  No attempt
//! is made to keep related counters (say, objects copied and bytes copied)
//! consistent with each other in a single snapshot.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

use crate::job::TransferOutcome;

const BANNER: &str = "\n--------------------------------------------------------------------\n";

pub const KB: u64 = 1024;
pub const MB: u64 = KB * 1024;
pub const GB: u64 = MB * 1024;
pub const TB: u64 = GB * 1024;
pub const PB: u64 = TB * 1024;
pub const EB: u64 = PB * 1024;

/// Shared counters for one mirror run.
#[derive(Debug)]
pub struct MirrorStats {
    start: Instant,

    pub objects_scanned: AtomicU64,
    pub objects_copied: AtomicU64,
    pub copy_errors: AtomicU64,
    pub objects_skipped: AtomicU64,
    pub objects_filtered: AtomicU64,
    pub dry_run_copies: AtomicU64,
    pub dry_run_deletes: AtomicU64,
    pub objects_deleted: AtomicU64,
    pub delete_errors: AtomicU64,

    pub get_calls: AtomicU64,
    pub copy_calls: AtomicU64,
    pub delete_calls: AtomicU64,
    pub bytes_copied: AtomicU64,
}

impl Default for MirrorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorStats {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            objects_scanned: AtomicU64::new(0),
            objects_copied: AtomicU64::new(0),
            copy_errors: AtomicU64::new(0),
            objects_skipped: AtomicU64::new(0),
            objects_filtered: AtomicU64::new(0),
            dry_run_copies: AtomicU64::new(0),
            dry_run_deletes: AtomicU64::new(0),
            objects_deleted: AtomicU64::new(0),
            delete_errors: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
            copy_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
        }
    }

    /// Count the one terminal outcome of a job.
    pub fn record(&self, outcome: &TransferOutcome) {
        let counter = match outcome {
            TransferOutcome::SkippedUnchanged => &self.objects_skipped,
            TransferOutcome::SkippedFiltered => &self.objects_filtered,
            TransferOutcome::Copied { bytes } => {
                self.bytes_copied.fetch_add(*bytes, Ordering::Relaxed);
                &self.objects_copied
            }
            TransferOutcome::DryRunWouldCopy => &self.dry_run_copies,
            TransferOutcome::Failed => &self.copy_errors,
            TransferOutcome::Deleted => &self.objects_deleted,
            TransferOutcome::DryRunWouldDelete => &self.dry_run_deletes,
            TransferOutcome::DeleteFailed => &self.delete_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_scanned(&self) {
        self.objects_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_get_call(&self) {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_copy_call(&self) {
        self.copy_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_delete_call(&self) {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            elapsed: self.elapsed(),
            objects_scanned: load(&self.objects_scanned),
            objects_copied: load(&self.objects_copied),
            copy_errors: load(&self.copy_errors),
            objects_skipped: load(&self.objects_skipped),
            objects_filtered: load(&self.objects_filtered),
            dry_run_copies: load(&self.dry_run_copies),
            dry_run_deletes: load(&self.dry_run_deletes),
            objects_deleted: load(&self.objects_deleted),
            delete_errors: load(&self.delete_errors),
            get_calls: load(&self.get_calls),
            copy_calls: load(&self.copy_calls),
            delete_calls: load(&self.delete_calls),
            bytes_copied: load(&self.bytes_copied),
        }
    }

    /// Log the report banner.
    pub fn log_stats(&self) {
        info!("{BANNER}STATS BEGIN\n{}STATS END {BANNER}", self.snapshot());
    }
}

/// Plain-value copy of [`MirrorStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    #[serde(skip)]
    pub elapsed: Duration,
    pub objects_scanned: u64,
    pub objects_copied: u64,
    pub copy_errors: u64,
    pub objects_skipped: u64,
    pub objects_filtered: u64,
    pub dry_run_copies: u64,
    pub dry_run_deletes: u64,
    pub objects_deleted: u64,
    pub delete_errors: u64,
    pub get_calls: u64,
    pub copy_calls: u64,
    pub delete_calls: u64,
    pub bytes_copied: u64,
}

impl StatsSnapshot {
    /// Errors that make the run unclean.
    pub fn error_count(&self) -> u64 {
        self.copy_errors + self.delete_errors
    }

    fn per_minute(&self, count: u64) -> f64 {
        let minutes = self.elapsed.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            count as f64 / minutes
        } else {
            0.0
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "read: {}", self.objects_scanned)?;
        writeln!(f, "copied: {}", self.objects_copied)?;
        writeln!(f, "copy errors: {}", self.copy_errors)?;
        writeln!(f, "unchanged: {}", self.objects_skipped)?;
        writeln!(f, "filtered: {}", self.objects_filtered)?;
        if self.dry_run_copies > 0 {
            writeln!(f, "dry run (not copied): {}", self.dry_run_copies)?;
        }
        if self.dry_run_deletes > 0 {
            writeln!(f, "dry run (not deleted): {}", self.dry_run_deletes)?;
        }
        if self.objects_deleted > 0 || self.delete_errors > 0 || self.delete_calls > 0 {
            writeln!(f, "deleted: {}", self.objects_deleted)?;
            writeln!(f, "delete errors: {}", self.delete_errors)?;
        }
        writeln!(f, "duration: {}", format_duration(self.elapsed))?;
        writeln!(f, "read rate: {:.1}/minute", self.per_minute(self.objects_scanned))?;
        writeln!(f, "copy rate: {:.1}/minute", self.per_minute(self.objects_copied))?;
        writeln!(f, "bytes copied: {}", format_bytes(self.bytes_copied))?;
        writeln!(f, "GET operations: {}", self.get_calls)?;
        writeln!(f, "COPY operations: {}", self.copy_calls)?;
        if self.delete_calls > 0 {
            writeln!(f, "DELETE operations: {}", self.delete_calls)?;
        }
        Ok(())
    }
}

/// `H:MM:SS`; hours are not wrapped at 24.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Largest fitting binary unit with the raw count alongside.
pub fn format_bytes(bytes: u64) -> String {
    let units = [(EB, "EB"), (PB, "PB"), (TB, "TB"), (GB, "GB"), (MB, "MB"), (KB, "KB")];
    for (size, label) in units {
        if bytes >= size {
            return format!("{:.2} {label} ({bytes} bytes)", bytes as f64 / size as f64);
        }
    }
    format!("{bytes} bytes")
}
