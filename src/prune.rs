//! Destination pruning.
//!
//! With `delete_removed` on, every destination key under the mirrored prefix
//! whose source counterpart no longer exists is deleted.

use tracing::{debug, error, info, warn};

use crate::job::{JobContext, TransferOutcome};
use crate::retry::with_retries;
use crate::storage::backend::ObjectSummary;

/// Delete-if-orphaned for one destination key.
pub struct DeleteJob {
    ctx: JobContext,
    summary: ObjectSummary,
}

impl DeleteJob {
    pub fn new(ctx: JobContext, summary: ObjectSummary) -> Self {
        Self { ctx, summary }
    }

    /// Returns `None` when the source still has the key and nothing was
    /// done.  Any outcome returned has already been recorded.
    pub async fn run(self) -> Option<TransferOutcome> {
        let outcome = self.execute().await?;
        self.ctx.stats.record(&outcome);
        if self.ctx.options.verbose {
            info!("{}: {}", self.summary.key, outcome.label());
        }
        Some(outcome)
    }

    async fn execute(&self) -> Option<TransferOutcome> {
        let options = self.ctx.options.as_ref();
        let dest_key = self.summary.key.as_str();
        let source_key = options.source_key(dest_key);

        match self
            .ctx
            .metadata(self.ctx.route.source(), &options.source_container, &source_key)
            .await
        {
            Ok(_) => {
                debug!("{dest_key}: source {source_key} still present");
                return None;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!("{dest_key}: cannot tell whether source {source_key} exists, keeping it: {err}");
                return None;
            }
        }

        if options.dry_run {
            if options.verbose {
                info!("Would have deleted {dest_key} from destination");
            }
            return Some(TransferOutcome::DryRunWouldDelete);
        }

        let stats = self.ctx.stats.as_ref();
        let destination = self.ctx.route.destination();
        let container = options.dest_container.as_str();
        let what = format!("deleteObject({container}/{dest_key})");
        let result = with_retries(self.ctx.retry_policy(), &self.ctx.cancel, &what, move |_| {
            stats.add_delete_call();
            destination.delete_object(container, dest_key)
        })
        .await;
        match result {
            Ok(()) => Some(TransferOutcome::Deleted),
            Err(err) => {
                error!("deleteObject failed for {dest_key}: {err}");
                Some(TransferOutcome::DeleteFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MirrorOptions;
    use crate::stats::MirrorStats;
    use crate::storage::route::StorageRoute;
    use crate::storage::testing::{Fault, FaultyBackend, Op};
    use crate::storage::backend::StorageBackend;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn context(backend: &Arc<FaultyBackend>, dry_run: bool) -> JobContext {
        JobContext {
            route: Arc::new(StorageRoute::shared(backend.clone())),
            options: Arc::new(MirrorOptions {
                source_container: "src".into(),
                source_prefix: "in/".into(),
                dest_container: "dst".into(),
                dest_prefix: Some("out/".into()),
                max_retries: 2,
                retry_delay: Duration::from_millis(1),
                dry_run,
                ..Default::default()
            }),
            stats: Arc::new(MirrorStats::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn entry(key: &str) -> ObjectSummary {
        ObjectSummary {
            key: key.into(),
            size: 1,
            last_modified: None,
            etag: None,
        }
    }

    #[tokio::test]
    async fn test_orphan_is_deleted() {
        let backend = Arc::new(FaultyBackend::new());
        backend.inner().insert("dst", "out/gone", "x").await;

        let ctx = context(&backend, false);
        let outcome = DeleteJob::new(ctx.clone(), entry("out/gone")).run().await;

        assert_eq!(outcome, Some(TransferOutcome::Deleted));
        assert!(!backend.inner().contains("dst", "out/gone").await);
        let snap = ctx.stats.snapshot();
        assert_eq!(snap.objects_deleted, 1);
        assert_eq!(snap.delete_calls, 1);
    }

    #[tokio::test]
    async fn test_key_with_source_is_kept() {
        let backend = Arc::new(FaultyBackend::new());
        backend.inner().insert("src", "in/kept", "x").await;
        backend.inner().insert("dst", "out/kept", "x").await;

        let outcome = DeleteJob::new(context(&backend, false), entry("out/kept")).run().await;

        assert_eq!(outcome, None);
        assert!(backend.inner().contains("dst", "out/kept").await);
        assert_eq!(backend.calls(Op::Delete), 0);
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_deleting() {
        let backend = Arc::new(FaultyBackend::new());
        backend.inner().insert("dst", "out/gone", "x").await;

        let ctx = context(&backend, true);
        let outcome = DeleteJob::new(ctx.clone(), entry("out/gone")).run().await;

        assert_eq!(outcome, Some(TransferOutcome::DryRunWouldDelete));
        assert!(backend.inner().contains("dst", "out/gone").await);
        assert_eq!(ctx.stats.snapshot().dry_run_deletes, 1);
    }

    #[tokio::test]
    async fn test_unreadable_source_keeps_destination() {
        let backend = Arc::new(FaultyBackend::new());
        backend.inner().insert("dst", "out/maybe", "x").await;
        backend.fail(Op::Metadata, "src", "in/maybe", Fault::Always);

        let outcome = DeleteJob::new(context(&backend, false), entry("out/maybe")).run().await;

        assert_eq!(outcome, None);
        assert!(backend.inner().get_metadata("dst", "out/maybe").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_failure_is_counted() {
        let backend = Arc::new(FaultyBackend::new());
        backend.inner().insert("dst", "out/stuck", "x").await;
        backend.fail(Op::Delete, "dst", "out/stuck", Fault::Always);

        let ctx = context(&backend, false);
        let outcome = DeleteJob::new(ctx.clone(), entry("out/stuck")).run().await;

        assert_eq!(outcome, Some(TransferOutcome::DeleteFailed));
        let snap = ctx.stats.snapshot();
        assert_eq!(snap.delete_errors, 1);
        assert_eq!(snap.delete_calls, 2);
        assert_eq!(snap.error_count(), 1);
    }
}
