//! Bounded job scheduler.
//!
//! At most `max_parallel` jobs are outstanding at any time.  Submitting a
//! job waits for a free slot, which is how a fast listing is throttled down
//! to the pace of the copies.  Each job owns its semaphore permit, so the
//! slot is released however the job ends.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::errors::MirrorError;

pub struct JobScheduler {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<()>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    completed: u64,
}

/// Counts a job as in flight until dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl JobScheduler {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
            tasks: JoinSet::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            completed: 0,
        }
    }

    /// Wait for a free slot and start `job` in it.
    ///
    /// Returns `Ok(false)` without starting anything when `cancel` fires
    /// while waiting.
    pub async fn spawn<F>(&mut self, cancel: &CancellationToken, job: F) -> Result<bool, MirrorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(false),
            permit = self.semaphore.clone().acquire_owned() => permit.map_err(|err| {
                MirrorError::Scheduler(format!("job semaphore closed unexpectedly: {err}"))
            })?,
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let slot = InFlight(self.in_flight.clone());

        self.tasks.spawn(async move {
            let _permit = permit;
            let _slot = slot;
            job.await
        });
        self.drain_ready()?;
        Ok(true)
    }

    /// Reap jobs that have already finished, without waiting.
    pub fn drain_ready(&mut self) -> Result<(), MirrorError> {
        while let Some(join_result) = self.tasks.try_join_next() {
            self.reap(join_result)?;
        }
        Ok(())
    }

    /// Wait for every outstanding job.  Returns the number of jobs run.
    pub async fn finish(mut self) -> Result<u64, MirrorError> {
        while let Some(join_result) = self.tasks.join_next().await {
            self.reap(join_result)?;
        }
        Ok(self.completed)
    }

    /// Jobs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of jobs that held a slot at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn reap(&mut self, join_result: Result<(), JoinError>) -> Result<(), MirrorError> {
        join_result.map_err(|err| MirrorError::Scheduler(format!("job task panicked: {err}")))?;
        self.completed += 1;
        Ok(())
    }
}
