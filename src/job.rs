//! Per-key transfer job.
//!
//! A [`KeyJob`] takes one source listing entry from "seen" to exactly one
//! [`TransferOutcome`]: decide whether the destination already holds the
//! same content, and if not, copy the object together with its metadata and
//! access descriptor.  Failures stay local to the key.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::StorageError;
use crate::fingerprint::Fingerprint;
use crate::options::{InconclusivePolicy, MirrorOptions};
use crate::retry::{with_retries, RetryPolicy};
use crate::stats::MirrorStats;
use crate::storage::backend::{
    AccessDescriptor, CopyRequest, ObjectMetadata, ObjectSummary, StorageBackend,
};
use crate::storage::route::StorageRoute;

/// Terminal state of a copy or delete job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Destination already holds identical content.
    SkippedUnchanged,
    /// Excluded by the age filter or an inconclusive destination read.
    SkippedFiltered,
    Copied { bytes: u64 },
    DryRunWouldCopy,
    Failed,
    Deleted,
    DryRunWouldDelete,
    DeleteFailed,
}

impl TransferOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TransferOutcome::SkippedUnchanged => "unchanged",
            TransferOutcome::SkippedFiltered => "filtered",
            TransferOutcome::Copied { .. } => "copied",
            TransferOutcome::DryRunWouldCopy => "dry-run-would-copy",
            TransferOutcome::Failed => "failed",
            TransferOutcome::Deleted => "deleted",
            TransferOutcome::DryRunWouldDelete => "dry-run-would-delete",
            TransferOutcome::DeleteFailed => "delete-failed",
        }
    }
}

/// Everything a job shares with the rest of the run.
#[derive(Clone)]
pub struct JobContext {
    pub route: Arc<StorageRoute>,
    pub options: Arc<MirrorOptions>,
    pub stats: Arc<MirrorStats>,
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.options.max_retries, self.options.retry_delay)
    }

    /// Metadata lookup with retries; every attempt counts as a GET.
    pub(crate) async fn metadata(
        &self,
        backend: &dyn StorageBackend,
        container: &str,
        key: &str,
    ) -> Result<ObjectMetadata, StorageError> {
        let stats = self.stats.as_ref();
        let what = format!("getObjectMetadata({container}/{key})");
        with_retries(self.retry_policy(), &self.cancel, &what, move |_| {
            stats.add_get_call();
            backend.get_metadata(container, key)
        })
        .await
    }
}

/// Decide-and-copy for one source key.
pub struct KeyJob {
    ctx: JobContext,
    summary: ObjectSummary,
}

impl KeyJob {
    pub fn new(ctx: JobContext, summary: ObjectSummary) -> Self {
        Self { ctx, summary }
    }

    /// Run to completion and record the outcome.  Never panics on storage
    /// errors; the caller only learns the outcome.
    pub async fn run(self) -> TransferOutcome {
        self.ctx.stats.add_scanned();
        let outcome = self.execute().await;
        self.ctx.stats.record(&outcome);
        if self.ctx.options.verbose {
            info!("{}: {}", self.summary.key, outcome.label());
        } else {
            debug!("{}: {}", self.summary.key, outcome.label());
        }
        outcome
    }

    async fn execute(&self) -> TransferOutcome {
        let options = self.ctx.options.as_ref();
        let key = self.summary.key.as_str();
        let dest_key = options.dest_key(key);

        if let Some(cutoff) = options.max_age {
            match self.summary.last_modified {
                Some(modified) if modified < cutoff => {
                    if options.verbose {
                        info!(
                            "{key}: last modified {modified}, older than {}",
                            options.ctime.as_deref().unwrap_or("cutoff")
                        );
                    }
                    return TransferOutcome::SkippedFiltered;
                }
                Some(_) => {}
                None => {
                    if options.verbose {
                        info!("{key}: no last-modified time, age filter not applied");
                    }
                }
            }
        }

        // Source metadata fetched while deciding is reused for the copy.
        let mut source_metadata = None;

        let destination = self.ctx.route.destination();
        match self
            .ctx
            .metadata(destination, &options.dest_container, &dest_key)
            .await
        {
            Ok(existing) => {
                let source = match &self.summary.etag {
                    Some(tag) => Fingerprint::new(self.summary.size, tag.clone()),
                    None => match self.source_metadata().await {
                        Ok(metadata) => {
                            let fingerprint = Fingerprint::new(metadata.size, metadata.etag.clone());
                            source_metadata = Some(metadata);
                            fingerprint
                        }
                        Err(err) => return self.failed("getObjectMetadata", err),
                    },
                };
                let target = Fingerprint::new(existing.size, existing.etag);
                if source == target {
                    return TransferOutcome::SkippedUnchanged;
                }
                if source.has_composite_tag() || target.has_composite_tag() {
                    warn!("{key}: multipart etag mismatch (source {source}, destination {target}), copying anyway");
                } else if options.verbose {
                    info!("{key}: changed (source {source}, destination {target})");
                }
            }
            Err(err) if err.is_not_found() => {
                if options.verbose {
                    info!("{key}: not found at destination {dest_key}");
                }
            }
            Err(err) => return self.inconclusive(&dest_key, err),
        }

        self.copy(dest_key, source_metadata).await
    }

    async fn copy(&self, dest_key: String, source_metadata: Option<ObjectMetadata>) -> TransferOutcome {
        let options = self.ctx.options.as_ref();
        let key = self.summary.key.as_str();

        let metadata = match source_metadata {
            Some(metadata) => metadata,
            None => match self.source_metadata().await {
                Ok(metadata) => metadata,
                Err(err) => return self.failed("getObjectMetadata", err),
            },
        };
        let access = match self.source_access().await {
            Ok(access) => access,
            Err(err) if options.encrypted_destination => {
                debug!("{key}: access descriptor unreadable ({err}), using an empty one");
                AccessDescriptor::default()
            }
            Err(err) => return self.failed("getObjectAcl", err),
        };

        let bytes = metadata.size;
        let request = CopyRequest {
            source_container: options.source_container.clone(),
            source_key: key.to_string(),
            dest_container: options.dest_container.clone(),
            dest_key,
            metadata,
            access,
        };

        if options.dry_run {
            if options.verbose {
                info!("Would have copied {key} to destination: {}", request.dest_key);
            }
            return TransferOutcome::DryRunWouldCopy;
        }

        let stats = self.ctx.stats.as_ref();
        let route = self.ctx.route.as_ref();
        let request = &request;
        let what = format!("copyObject({key})");
        match with_retries(self.ctx.retry_policy(), &self.ctx.cancel, &what, move |_| {
            stats.add_copy_call();
            route.copy(request)
        })
        .await
        {
            Ok(()) => TransferOutcome::Copied { bytes },
            Err(err) => self.failed("copyObject", err),
        }
    }

    async fn source_metadata(&self) -> Result<ObjectMetadata, StorageError> {
        self.ctx
            .metadata(
                self.ctx.route.source(),
                &self.ctx.options.source_container,
                &self.summary.key,
            )
            .await
    }

    /// With `encrypted_destination` an unreadable descriptor is tolerated,
    /// so it is tried only once.
    async fn source_access(&self) -> Result<AccessDescriptor, StorageError> {
        let policy = if self.ctx.options.encrypted_destination {
            RetryPolicy::new(1, self.ctx.options.retry_delay)
        } else {
            self.ctx.retry_policy()
        };
        let stats = self.ctx.stats.as_ref();
        let source = self.ctx.route.source();
        let container = self.ctx.options.source_container.as_str();
        let key = self.summary.key.as_str();
        let what = format!("getObjectAcl({container}/{key})");
        with_retries(policy, &self.ctx.cancel, &what, move |_| {
            stats.add_get_call();
            source.get_access_descriptor(container, key)
        })
        .await
    }

    fn inconclusive(&self, dest_key: &str, err: StorageError) -> TransferOutcome {
        match self.ctx.options.on_inconclusive {
            InconclusivePolicy::Skip => {
                warn!("{}: destination {dest_key} unreadable, skipping: {err}", self.summary.key);
                TransferOutcome::SkippedFiltered
            }
            InconclusivePolicy::Fail => {
                error!("{}: destination {dest_key} unreadable: {err}", self.summary.key);
                TransferOutcome::Failed
            }
        }
    }

    fn failed(&self, op: &str, err: StorageError) -> TransferOutcome {
        error!("{op} failed for {}: {err}", self.summary.key);
        TransferOutcome::Failed
    }
}
