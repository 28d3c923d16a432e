//! Fault-injecting backend for engine and job tests.
//!
//! Wraps a [`MemoryBackend`] and lets a test make individual operations fail
//! a fixed number of times (or forever), counts calls per operation, and
//! records the highest number of calls that were in flight at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::backend::{
    AccessDescriptor, CopyRequest, ListRequest, ListingPage, ObjectBody, ObjectMetadata,
    StorageBackend, StorageFuture,
};
use super::memory::MemoryBackend;
use crate::errors::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    List,
    Metadata,
    Access,
    Copy,
    GetObject,
    PutObject,
    Delete,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// Fail the next `n` calls, then behave normally.
    Times(u32),
    /// Fail every call.
    Always,
}

pub(crate) struct FaultyBackend {
    inner: MemoryBackend,
    faults: Mutex<HashMap<(Op, String, String), Fault>>,
    calls: Mutex<HashMap<Op, u64>>,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    latency: Duration,
}

impl FaultyBackend {
    pub(crate) fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every call sleeps for `latency` before answering.
    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            inner: MemoryBackend::new(),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            latency,
        }
    }

    pub(crate) fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Make `op` on `container/key` fail.  For [`Op::List`] pass the prefix
    /// as `key`.
    pub(crate) fn fail(&self, op: Op, container: &str, key: &str, fault: Fault) {
        self.faults
            .lock()
            .unwrap()
            .insert((op, container.to_string(), key.to_string()), fault);
    }

    pub(crate) fn calls(&self, op: Op) -> u64 {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    pub(crate) fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    async fn gate(&self, op: Op, container: &str, key: &str) -> Result<(), StorageError> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut faults = self.faults.lock().unwrap();
        let slot = (op, container.to_string(), key.to_string());
        match faults.get_mut(&slot) {
            Some(Fault::Always) => Err(injected(op, container, key)),
            Some(Fault::Times(n)) if *n > 0 => {
                *n -= 1;
                Err(injected(op, container, key))
            }
            _ => Ok(()),
        }
    }
}

fn injected(op: Op, container: &str, key: &str) -> StorageError {
    StorageError::Backend(anyhow::anyhow!("injected {op:?} fault on {container}/{key}"))
}

impl StorageBackend for FaultyBackend {
    fn list<'a>(&'a self, request: &'a ListRequest) -> StorageFuture<'a, ListingPage> {
        Box::pin(async move {
            self.gate(Op::List, &request.container, &request.prefix)
                .await?;
            self.inner.list(request).await
        })
    }

    fn get_metadata<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectMetadata> {
        Box::pin(async move {
            self.gate(Op::Metadata, container, key).await?;
            self.inner.get_metadata(container, key).await
        })
    }

    fn get_access_descriptor<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> StorageFuture<'a, AccessDescriptor> {
        Box::pin(async move {
            self.gate(Op::Access, container, key).await?;
            self.inner.get_access_descriptor(container, key).await
        })
    }

    fn copy<'a>(&'a self, request: &'a CopyRequest) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Op::Copy, &request.dest_container, &request.dest_key)
                .await?;
            self.inner.copy(request).await
        })
    }

    fn get_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectBody> {
        Box::pin(async move {
            self.gate(Op::GetObject, container, key).await?;
            self.inner.get_object(container, key).await
        })
    }

    fn put_object<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        body: ObjectBody,
        metadata: &'a ObjectMetadata,
        access: &'a AccessDescriptor,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Op::PutObject, container, key).await?;
            self.inner
                .put_object(container, key, body, metadata, access)
                .await
        })
    }

    fn delete_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.gate(Op::Delete, container, key).await?;
            self.inner.delete_object(container, key).await
        })
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}
