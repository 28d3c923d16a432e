//! Mirror engine.
//!
//! Walks the source listing page by page, hands every entry to a
//! [`KeyJob`] on the bounded scheduler, optionally runs the prune pass over
//! the destination, and waits for every job before returning.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{MirrorError, StorageError};
use crate::job::{JobContext, KeyJob};
use crate::options::MirrorOptions;
use crate::prune::DeleteJob;
use crate::retry::with_retries;
use crate::scheduler::JobScheduler;
use crate::stats::{MirrorStats, StatsSnapshot};
use crate::storage::backend::{ListRequest, ObjectSummary, StorageBackend};
use crate::storage::route::StorageRoute;

/// Result of a run that was not aborted by a fatal error.
#[derive(Debug, Clone)]
pub struct MirrorSummary {
    pub stats: StatsSnapshot,
    /// Shutdown was requested before the listing was exhausted.
    pub cancelled: bool,
    /// Highest number of jobs outstanding at once.
    pub peak_in_flight: usize,
}

impl MirrorSummary {
    /// Finished without cancellation and without a failed key.
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.stats.error_count() == 0
    }
}

pub struct Mirror {
    ctx: JobContext,
}

impl Mirror {
    pub fn new(
        route: Arc<StorageRoute>,
        options: MirrorOptions,
        cancel: CancellationToken,
    ) -> Result<Self, MirrorError> {
        options.validate()?;
        Ok(Self {
            ctx: JobContext {
                route,
                options: Arc::new(options),
                stats: Arc::new(MirrorStats::new()),
                cancel,
            },
        })
    }

    /// Live counters; readable while the run is in progress.
    pub fn stats(&self) -> Arc<MirrorStats> {
        self.ctx.stats.clone()
    }

    pub async fn run(&self) -> Result<MirrorSummary, MirrorError> {
        let options = self.ctx.options.as_ref();
        info!(
            "Mirroring {}/{} -> {}/{} via {}{}",
            options.source_container,
            options.source_prefix,
            options.dest_container,
            options.dest_list_prefix(),
            self.ctx.route.describe(),
            if options.dry_run { " [dry run]" } else { "" }
        );

        let mut scheduler = JobScheduler::new(options.max_parallelism);
        let traversal = self.traverse_all(&mut scheduler).await;

        // Jobs already started run to completion even when the listing failed.
        let peak_in_flight = scheduler.peak();
        let jobs = scheduler.finish().await?;
        debug!("{jobs} jobs finished, peak {peak_in_flight} in flight");

        let completed = traversal?;
        Ok(MirrorSummary {
            stats: self.ctx.stats.snapshot(),
            cancelled: !completed || self.ctx.cancel.is_cancelled(),
            peak_in_flight,
        })
    }

    /// Copy pass, then prune pass.  `Ok(false)` means cancellation cut the
    /// traversal short.
    async fn traverse_all(&self, scheduler: &mut JobScheduler) -> Result<bool, MirrorError> {
        let options = self.ctx.options.as_ref();
        let ctx = &self.ctx;

        let finished = self
            .traverse(
                scheduler,
                ctx.route.source(),
                &options.source_container,
                &options.source_prefix,
                |summary| {
                    let job = KeyJob::new(ctx.clone(), summary);
                    async move {
                        job.run().await;
                    }
                },
            )
            .await?;
        if !finished || !options.delete_removed {
            return Ok(finished);
        }

        info!(
            "Pruning {}/{} of keys removed from the source",
            options.dest_container,
            options.dest_list_prefix()
        );
        self.traverse(
            scheduler,
            ctx.route.destination(),
            &options.dest_container,
            options.dest_list_prefix(),
            |summary| {
                let job = DeleteJob::new(ctx.clone(), summary);
                async move {
                    job.run().await;
                }
            },
        )
        .await
    }

    async fn traverse<F, Fut>(
        &self,
        scheduler: &mut JobScheduler,
        backend: &dyn StorageBackend,
        container: &str,
        prefix: &str,
        mut make_job: F,
    ) -> Result<bool, MirrorError>
    where
        F: FnMut(ObjectSummary) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let options = self.ctx.options.as_ref();
        let cancel = &self.ctx.cancel;
        let mut request = ListRequest::new(container, prefix, options.fetch_size);
        let what = format!("listObjects({container}/{prefix})");

        loop {
            if cancel.is_cancelled() {
                warn!("Cancelled, no more keys from {container} will be scheduled");
                return Ok(false);
            }

            let current = &request;
            let page = match with_retries(self.ctx.retry_policy(), cancel, &what, move |_| {
                backend.list(current)
            })
            .await
            {
                Ok(page) => page,
                Err(StorageError::Interrupted) => return Ok(false),
                Err(source) => {
                    return Err(MirrorError::Listing {
                        container: container.to_string(),
                        source,
                    })
                }
            };
            if options.verbose {
                info!("Listed {} keys from {container}", page.objects.len());
            }

            let more = request.advance(&page);
            for summary in page.objects {
                if !scheduler.spawn(cancel, make_job(summary)).await? {
                    warn!("Cancelled, no more keys from {container} will be scheduled");
                    return Ok(false);
                }
            }
            if !more {
                return Ok(true);
            }
        }
    }
}
