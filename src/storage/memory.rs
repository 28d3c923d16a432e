//! In-memory storage backend.
//!
//! Objects are held in a `tokio::sync::RwLock<BTreeMap<...>>` keyed by
//! `(container, key)`, so listings come out in lexical key order for free.
//! Nothing is persisted; the backend exists for tests and dry experiments.

use bytes::Bytes;
use chrono::Utc;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::ops::Bound;

use super::backend::{
    AccessDescriptor, CopyRequest, ListRequest, ListingPage, ObjectBody, ObjectMetadata,
    ObjectSummary, StorageBackend, StorageFuture,
};
use crate::errors::StorageError;

/// A stored object: bytes plus everything the mirror replicates.
#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
    access: AccessDescriptor,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryBackend {
    /// Object store: (container, key) -> object.
    objects: tokio::sync::RwLock<BTreeMap<(String, String), StoredObject>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the quoted MD5-hex ETag for a byte slice.
    pub(crate) fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    /// Store `data` under `container/key` with default metadata.
    pub async fn insert(&self, container: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let metadata = ObjectMetadata {
            size: data.len() as u64,
            etag: Self::compute_etag(&data),
            last_modified: Some(Utc::now()),
            ..Default::default()
        };
        self.insert_with(container, key, data, metadata, AccessDescriptor::default())
            .await;
    }

    /// Store an object with explicit metadata.  The metadata is stored as
    /// given, which lets tests plant objects whose tag disagrees with their
    /// bytes.
    pub async fn insert_with(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        metadata: ObjectMetadata,
        access: AccessDescriptor,
    ) {
        self.objects.write().await.insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                data,
                metadata,
                access,
            },
        );
    }

    /// Whether `container/key` exists.
    pub async fn contains(&self, container: &str, key: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(container.to_string(), key.to_string()))
    }

    /// Number of objects in `container`.
    pub async fn len(&self, container: &str) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == container)
            .count()
    }

    async fn lookup(&self, container: &str, key: &str) -> Result<StoredObject, StorageError> {
        self.objects
            .read()
            .await
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::not_found(container, key))
    }
}

impl StorageBackend for MemoryBackend {
    fn list<'a>(&'a self, request: &'a ListRequest) -> StorageFuture<'a, ListingPage> {
        Box::pin(async move {
            let objects = self.objects.read().await;
            let container = request.container.clone();
            let start = match &request.cursor {
                Some(cursor) => Bound::Excluded((container.clone(), cursor.clone())),
                None => Bound::Included((container.clone(), request.prefix.clone())),
            };

            let mut matching = objects
                .range((start, Bound::Unbounded))
                .take_while(|((c, k), _)| *c == container && k.starts_with(&request.prefix))
                .map(|((_, key), obj)| ObjectSummary {
                    key: key.clone(),
                    size: obj.metadata.size,
                    last_modified: obj.metadata.last_modified,
                    etag: Some(obj.metadata.etag.clone()),
                });

            let page: Vec<ObjectSummary> = matching.by_ref().take(request.fetch_size.max(1)).collect();
            let is_truncated = matching.next().is_some();
            let next_cursor = if is_truncated {
                page.last().map(|o| o.key.clone())
            } else {
                None
            };

            Ok(ListingPage {
                objects: page,
                next_cursor,
                is_truncated,
            })
        })
    }

    fn get_metadata<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectMetadata> {
        Box::pin(async move { Ok(self.lookup(container, key).await?.metadata) })
    }

    fn get_access_descriptor<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> StorageFuture<'a, AccessDescriptor> {
        Box::pin(async move { Ok(self.lookup(container, key).await?.access) })
    }

    fn copy<'a>(&'a self, request: &'a CopyRequest) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let source = self
                .lookup(&request.source_container, &request.source_key)
                .await?;
            let mut metadata = request.metadata.clone();
            metadata.size = source.data.len() as u64;
            metadata.etag = Self::compute_etag(&source.data);
            self.insert_with(
                &request.dest_container,
                &request.dest_key,
                source.data,
                metadata,
                request.access.clone(),
            )
            .await;
            Ok(())
        })
    }

    fn get_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectBody> {
        Box::pin(async move { Ok(ObjectBody::from_bytes(self.lookup(container, key).await?.data)) })
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
            // Objects live in memory anyway.
            let data = body.collect().await?;
            let mut metadata = metadata.clone();
            metadata.size = data.len() as u64;
            metadata.etag = Self::compute_etag(&data);
            metadata.last_modified = Some(Utc::now());
            self.insert_with(container, key, data, metadata, access.clone())
                .await;
            Ok(())
        })
    }

    fn delete_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.objects
                .write()
                .await
                .remove(&(container.to_string(), key.to_string()));
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ── Tests ───────────────────────────────────────────────────────────
