//! Prometheus metrics for s3mirror.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, publishes the final statistics of a run,
//! and writes the rendered exposition text for a textfile collector.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use crate::stats::StatsSnapshot;

// -- Metric name constants ----------------------------------------------------

/// Keys seen in the source listing (counter).
pub const OBJECTS_SCANNED_TOTAL: &str = "s3mirror_objects_scanned_total";

/// Keys by terminal outcome (counter). Labels: outcome.
pub const OBJECTS_TOTAL: &str = "s3mirror_objects_total";

/// Remote calls issued, retries included (counter). Labels: operation.
pub const OPERATIONS_TOTAL: &str = "s3mirror_operations_total";

/// Bytes copied to the destination (counter).
pub const BYTES_COPIED_TOTAL: &str = "s3mirror_bytes_copied_total";

/// Wall-clock duration of the last run (gauge).
pub const RUN_DURATION_SECONDS: &str = "s3mirror_run_duration_seconds";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder and return its handle.
/// Calling it again returns the handle installed the first time.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(OBJECTS_SCANNED_TOTAL, "Keys read from the source listing");
    describe_counter!(OBJECTS_TOTAL, "Keys by terminal outcome");
    describe_counter!(OPERATIONS_TOTAL, "Remote storage calls, retries included");
    describe_counter!(BYTES_COPIED_TOTAL, "Bytes copied to the destination");
    describe_gauge!(RUN_DURATION_SECONDS, "Duration of the mirror run in seconds");
}

/// Publish a run's statistics to the installed recorder.
pub fn publish(stats: &StatsSnapshot) {
    counter!(OBJECTS_SCANNED_TOTAL).absolute(stats.objects_scanned);

    let outcomes = [
        ("copied", stats.objects_copied),
        ("unchanged", stats.objects_skipped),
        ("filtered", stats.objects_filtered),
        ("failed", stats.copy_errors),
        ("dry_run_copy", stats.dry_run_copies),
        ("deleted", stats.objects_deleted),
        ("delete_failed", stats.delete_errors),
        ("dry_run_delete", stats.dry_run_deletes),
    ];
    for (outcome, count) in outcomes {
        counter!(OBJECTS_TOTAL, "outcome" => outcome).absolute(count);
    }

    counter!(OPERATIONS_TOTAL, "operation" => "get").absolute(stats.get_calls);
    counter!(OPERATIONS_TOTAL, "operation" => "copy").absolute(stats.copy_calls);
    counter!(OPERATIONS_TOTAL, "operation" => "delete").absolute(stats.delete_calls);

    counter!(BYTES_COPIED_TOTAL).absolute(stats.bytes_copied);
    gauge!(RUN_DURATION_SECONDS).set(stats.elapsed.as_secs_f64());
}

/// Write `handle`'s rendered metrics to `path`, replacing it atomically.
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> anyhow::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(handle.render().as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// -- Tests --------------------------------------------------------------------
