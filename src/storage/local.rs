//! Local filesystem storage backend.
//!
//! A container is a directory resolved against a configurable root (an
//! absolute container path ignores the root).  Keys are `/`-separated paths
//! relative to the container directory.  A key ending in `/` is an S3-style
//! directory marker and maps onto the directory itself.
//!
//! Metadata and access descriptors have no native home on a plain
//! filesystem, so they are kept as JSON sidecars under
//! `{container}/.s3mirror-meta/{key}.json`.  Size, ETag and modification
//! time always come from the file itself.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.
//!
//! Listing walks the tree in key order: siblings are visited sorted by name,
//! with directories sorted as `name/`.  Subtrees that lie entirely at or
//! before the cursor, or outside the prefix, are never entered, and a page
//! stops reading as soon as it is full.

use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::backend::{
    AccessDescriptor, CopyRequest, ListRequest, ListingPage, ObjectBody, ObjectMetadata,
    ObjectSummary, StorageBackend, StorageFuture,
};
use crate::errors::StorageError;

/// Directory (inside each container) holding metadata sidecars.
const META_DIR: &str = ".s3mirror-meta";
/// Directory (inside each container) holding in-flight temp files.
const TMP_DIR: &str = ".s3mirror-tmp";
/// ETag of zero bytes, reported for directory markers.
const EMPTY_ETAG: &str = "\"d41d8cd98f00b204e9800998ecf8427e\"";

/// Sidecar contents for one object.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default)]
    metadata: ObjectMetadata,
    #[serde(default)]
    access: AccessDescriptor,
}

/// Stores objects on the local filesystem.
pub struct LocalBackend {
    /// Directory that relative container names are resolved against.
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }

    /// Resolve `container/key` to an absolute path.
    ///
    /// Rejects keys that are empty, absolute, contain `..`, or point into
    /// the backend's own bookkeeping directories.
    fn resolve(&self, container: &str, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        let mut components = Path::new(key).components().peekable();
        if let Some(Component::Normal(first)) = components.peek() {
            if is_internal(&first.to_string_lossy()) {
                return Err(invalid("reserved directory"));
            }
        }
        for component in components {
            match component {
                Component::Normal(_) => {}
                Component::CurDir => {}
                Component::ParentDir => return Err(invalid("path traversal")),
                Component::RootDir | Component::Prefix(_) => return Err(invalid("absolute key")),
            }
        }
        Ok(self.container_dir(container).join(key))
    }

    fn sidecar_path(&self, container: &str, key: &str) -> PathBuf {
        self.container_dir(container)
            .join(META_DIR)
            .join(format!("{key}.json"))
    }

    /// Generate a temp file path for atomic writes into `container`.
    fn temp_path(&self, container: &str) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.container_dir(container)
            .join(TMP_DIR)
            .join(format!("tmp-{id}"))
    }

    /// Create the parents of `final_path` and return a fresh temp path.
    fn prepare_write(&self, container: &str, final_path: &Path) -> std::io::Result<PathBuf> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.temp_path(container);
        if let Some(parent) = tmp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(tmp_path)
    }

    /// Crash-only write: temp file, fsync, rename.
    fn write_atomic(&self, container: &str, final_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let tmp_path = self.prepare_write(container, final_path)?;
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, final_path)
    }

    /// Crash-only copy of a file within the backend.
    fn copy_atomic(&self, container: &str, source: &Path, final_path: &Path) -> std::io::Result<()> {
        let tmp_path = self.prepare_write(container, final_path)?;
        let result = std::fs::copy(source, &tmp_path)
            .and_then(|_| std::fs::File::open(&tmp_path)?.sync_all())
            .and_then(|_| std::fs::rename(&tmp_path, final_path));
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }

    /// Crash-only write of a streamed body.  The temp file is removed when
    /// the stream fails or comes up short.
    async fn write_stream_atomic(
        &self,
        container: &str,
        final_path: &Path,
        body: ObjectBody,
    ) -> Result<(), StorageError> {
        let tmp_path = self.prepare_write(container, final_path)?;
        let result = stream_into(&tmp_path, final_path, body).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result
    }

    fn read_sidecar(&self, container: &str, key: &str) -> Result<Sidecar, StorageError> {
        match std::fs::read(self.sidecar_path(container, key)) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                StorageError::Backend(anyhow::anyhow!("corrupt sidecar for {container}/{key}: {e}"))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_sidecar(
        &self,
        container: &str,
        key: &str,
        metadata: &ObjectMetadata,
        access: &AccessDescriptor,
    ) -> Result<(), StorageError> {
        let sidecar = Sidecar {
            metadata: metadata.clone(),
            access: access.clone(),
        };
        let json = serde_json::to_vec_pretty(&sidecar).map_err(anyhow::Error::from)?;
        self.write_atomic(container, &self.sidecar_path(container, key), &json)?;
        Ok(())
    }

    /// Stat the object, mapping a missing file to `NotFound`.  A marker key
    /// matches a directory; any other key matches a regular file.
    fn stat(&self, container: &str, key: &str) -> Result<(PathBuf, std::fs::Metadata), StorageError> {
        let path = self.resolve(container, key)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() == is_marker(key) && (meta.is_dir() || meta.is_file()) => {
                Ok((path, meta))
            }
            Ok(_) => Err(StorageError::not_found(container, key)),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Err(StorageError::not_found(container, key))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Quoted MD5 of a file, streamed in 64 KiB chunks.
    fn file_etag(path: &Path) -> std::io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("\"{}\"", hex::encode(hasher.finalize())))
    }

    /// Write a directory marker: the directory plus its sidecar.
    fn put_marker(
        &self,
        container: &str,
        key: &str,
        metadata: &ObjectMetadata,
        access: &AccessDescriptor,
    ) -> Result<(), StorageError> {
        std::fs::create_dir_all(self.resolve(container, key)?)?;
        self.write_sidecar(container, key, metadata, access)
    }
}

async fn stream_into(tmp_path: &Path, final_path: &Path, body: ObjectBody) -> Result<(), StorageError> {
    let ObjectBody { size, stream } = body;
    let mut file = tokio::fs::File::create(tmp_path).await?;
    let reader = stream.into_async_read();
    tokio::pin!(reader);
    let written = tokio::io::copy(&mut reader, &mut file).await?;
    if written != size {
        return Err(StorageError::Backend(anyhow::anyhow!(
            "short body for {}: {written} of {size} bytes",
            final_path.display()
        )));
    }
    file.sync_all().await?;
    tokio::fs::rename(tmp_path, final_path).await?;
    Ok(())
}

fn is_internal(name: &str) -> bool {
    name == META_DIR || name == TMP_DIR
}

/// S3 "directory marker" keys end in `/`.
fn is_marker(key: &str) -> bool {
    key.ends_with('/')
}

fn modified_time(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

/// Relative path of `path` under `base`, joined with `/`.
fn key_for(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Directory to start walking from for `prefix`: the deepest complete
/// directory the prefix names.
fn walk_root(container_dir: &Path, prefix: &str) -> PathBuf {
    match prefix.rfind('/') {
        Some(idx) => container_dir.join(&prefix[..idx]),
        None => container_dir.to_path_buf(),
    }
}

/// Sort name of a walk entry; directories sort as `name/` so that every
/// key of a subtree lands where its full key would.
fn walk_name(entry: &DirEntry) -> String {
    let mut name = entry.file_name().to_string_lossy().into_owned();
    if entry.file_type().is_dir() {
        name.push('/');
    }
    name
}

fn walk_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    walk_name(a).cmp(&walk_name(b))
}

/// Whether the subtree whose keys all start with `dir_key` (ending in `/`)
/// can hold a key under `prefix` and strictly after `cursor`.
fn subtree_wanted(dir_key: &str, prefix: &str, cursor: Option<&str>) -> bool {
    let overlaps_prefix = dir_key.starts_with(prefix) || prefix.starts_with(dir_key);
    let after_cursor = match cursor {
        Some(cursor) => cursor < dir_key || cursor.starts_with(dir_key),
        None => true,
    };
    overlaps_prefix && after_cursor
}

/// One listing page read off the filesystem.
struct PageScan {
    entries: Vec<ObjectSummary>,
    truncated: bool,
    /// Walk entries looked at, directories included.
    visited: usize,
}

impl PageScan {
    fn into_page(self) -> ListingPage {
        let next_cursor = if self.truncated {
            self.entries.last().map(|o| o.key.clone())
        } else {
            None
        };
        ListingPage {
            objects: self.entries,
            next_cursor,
            is_truncated: self.truncated,
        }
    }
}

/// Read the page `request` asks for out of the container at `base`.
///
/// At most `fetch_size` files are stat'ed; one more is looked at to learn
/// whether the listing continues.
fn scan_page(base: &Path, request: &ListRequest) -> Result<PageScan, StorageError> {
    let mut scan = PageScan {
        entries: Vec::new(),
        truncated: false,
        visited: 0,
    };
    let start = walk_root(base, &request.prefix);
    if !start.is_dir() {
        return Ok(scan);
    }

    let limit = request.fetch_size.max(1);
    let prefix = request.prefix.as_str();
    let cursor = request.cursor.as_deref();
    let walker = WalkDir::new(&start)
        .follow_links(false)
        .sort_by(walk_order)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            if e.path().parent() == Some(base) && is_internal(&e.file_name().to_string_lossy()) {
                return false;
            }
            if !e.file_type().is_dir() {
                return true;
            }
            match key_for(base, e.path()) {
                Some(mut dir_key) => {
                    dir_key.push('/');
                    subtree_wanted(&dir_key, prefix, cursor)
                }
                None => false,
            }
        });

    for entry in walker {
        let entry = entry.map_err(|e| StorageError::Backend(anyhow::Error::new(e)))?;
        scan.visited += 1;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = key_for(base, entry.path()) else {
            continue;
        };
        if !key.starts_with(prefix) || cursor.is_some_and(|c| key.as_str() <= c) {
            continue;
        }
        if scan.entries.len() == limit {
            scan.truncated = true;
            break;
        }
        let meta = entry
            .metadata()
            .map_err(|e| StorageError::Backend(anyhow::Error::new(e)))?;
        scan.entries.push(ObjectSummary {
            key,
            size: meta.len(),
            last_modified: modified_time(&meta),
            etag: None,
        });
    }
    Ok(scan)
}

impl StorageBackend for LocalBackend {
    fn list<'a>(&'a self, request: &'a ListRequest) -> StorageFuture<'a, ListingPage> {
        Box::pin(async move {
            let base = self.container_dir(&request.container);
            if !base.is_dir() {
                return Err(StorageError::Backend(anyhow::anyhow!(
                    "not a directory: {}",
                    base.display()
                )));
            }

            let scan = scan_page(&base, request)?;
            debug!(
                "local list: container={} prefix='{}' returned={} visited={} truncated={}",
                request.container,
                request.prefix,
                scan.entries.len(),
                scan.visited,
                scan.truncated
            );
            Ok(scan.into_page())
        })
    }

    fn get_metadata<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectMetadata> {
        Box::pin(async move {
            let (path, meta) = self.stat(container, key)?;
            let mut metadata = self.read_sidecar(container, key)?.metadata;
            if meta.is_dir() {
                metadata.size = 0;
                metadata.etag = EMPTY_ETAG.to_string();
            } else {
                metadata.size = meta.len();
                metadata.etag = Self::file_etag(&path)?;
            }
            metadata.last_modified = modified_time(&meta);
            Ok(metadata)
        })
    }

    fn get_access_descriptor<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> StorageFuture<'a, AccessDescriptor> {
        Box::pin(async move {
            self.stat(container, key)?;
            Ok(self.read_sidecar(container, key)?.access)
        })
    }

    fn copy<'a>(&'a self, request: &'a CopyRequest) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let (src_path, src_meta) = self.stat(&request.source_container, &request.source_key)?;
            if src_meta.is_dir() || is_marker(&request.dest_key) {
                if !src_meta.is_dir() || !is_marker(&request.dest_key) {
                    return Err(StorageError::InvalidKey {
                        key: request.dest_key.clone(),
                        reason: "directory markers only copy onto directory markers".into(),
                    });
                }
                return self.put_marker(
                    &request.dest_container,
                    &request.dest_key,
                    &request.metadata,
                    &request.access,
                );
            }
            let dst_path = self.resolve(&request.dest_container, &request.dest_key)?;
            self.copy_atomic(&request.dest_container, &src_path, &dst_path)?;
            self.write_sidecar(
                &request.dest_container,
                &request.dest_key,
                &request.metadata,
                &request.access,
            )
        })
    }

    fn get_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectBody> {
        Box::pin(async move {
            let (path, meta) = self.stat(container, key)?;
            if meta.is_dir() {
                return Ok(ObjectBody::empty());
            }
            let stream = ByteStream::from_path(&path)
                .await
                .map_err(|e| StorageError::Backend(anyhow::Error::new(e)))?;
            Ok(ObjectBody::new(meta.len(), stream))
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
            let path = self.resolve(container, key)?;
            if is_marker(key) {
                if body.size != 0 {
                    return Err(StorageError::InvalidKey {
                        key: key.to_string(),
                        reason: format!("directory marker with {} bytes of content", body.size),
                    });
                }
                return self.put_marker(container, key, metadata, access);
            }
            self.write_stream_atomic(container, &path, body).await?;
            self.write_sidecar(container, key, metadata, access)
        })
    }

    fn delete_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = self.resolve(container, key)?;
            let removed = if is_marker(key) {
                // Only an empty directory goes; its contents are other keys.
                match std::fs::remove_dir(&path) {
                    Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => Ok(()),
                    other => other,
                }
            } else {
                std::fs::remove_file(&path)
            };
            for result in [removed, std::fs::remove_file(self.sidecar_path(container, key))] {
                match result {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{AclGrant, AclGrantee};
    use bytes::Bytes;

    fn test_backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let backend = LocalBackend::new(dir.path()).expect("failed to create backend");
        (dir, backend)
    }

    async fn put(backend: &LocalBackend, container: &str, key: &str, body: &str) {
        backend
            .put_object(
                container,
                key,
                ObjectBody::from_bytes(body.to_string()),
                &ObjectMetadata::default(),
                &AccessDescriptor::default(),
            )
            .await
            .unwrap();
    }

    fn keys(page: &ListingPage) -> Vec<&str> {
        page.objects.iter().map(|o| o.key.as_str()).collect()
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (_dir, backend) = test_backend();
        put(&backend, "bucket", "a/b/c/deep.txt", "nested content").await;

        let body = backend.get_object("bucket", "a/b/c/deep.txt").await.unwrap();
        assert_eq!(body.size, 14);
        assert_eq!(body.collect().await.unwrap(), Bytes::from("nested content"));
    }

    #[tokio::test]
    async fn test_short_body_leaves_no_object() {
        let (_dir, backend) = test_backend();
        let body = ObjectBody::new(100, ByteStream::from_static(b"only a few bytes"));
        let err = backend
            .put_object(
                "bucket",
                "short",
                body,
                &ObjectMetadata::default(),
                &AccessDescriptor::default(),
            )
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert!(backend.get_metadata("bucket", "short").await.unwrap_err().is_not_found());
        let tmp = backend.container_dir("bucket").join(TMP_DIR);
        assert_eq!(std::fs::read_dir(tmp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_etag_is_md5() {
        let (_dir, backend) = test_backend();
        put(&backend, "bucket", "empty", "").await;

        // Known MD5 of empty string: d41d8cd98f00b204e9800998ecf8427e
        let meta = backend.get_metadata("bucket", "empty").await.unwrap();
        assert_eq!(meta.etag, EMPTY_ETAG);
        assert_eq!(meta.size, 0);
        assert!(meta.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_metadata_missing_is_not_found() {
        let (_dir, backend) = test_backend();
        std::fs::create_dir_all(backend.container_dir("bucket")).unwrap();
        let err = backend.get_metadata("bucket", "missing").await.unwrap_err();
        assert!(err.is_not_found());
        let err = backend.get_access_descriptor("bucket", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, backend) = test_backend();
        let err = backend.get_metadata("bucket", "../escape").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
        let err = backend.get_metadata("bucket", "/etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_directory_marker_maps_to_directory() {
        let (_dir, backend) = test_backend();
        put(&backend, "bucket", "photos/", "").await;
        assert!(backend.container_dir("bucket").join("photos").is_dir());

        let meta = backend.get_metadata("bucket", "photos/").await.unwrap();
        assert_eq!(meta.size, 0);
        assert_eq!(meta.etag, EMPTY_ETAG);
        assert_eq!(backend.get_object("bucket", "photos/").await.unwrap().size, 0);

        // The directory is not a file, and a plain key never sees it.
        assert!(backend.get_metadata("bucket", "photos").await.unwrap_err().is_not_found());

        put(&backend, "bucket", "photos/a.jpg", "jpeg").await;
        let page = backend.list(&ListRequest::new("bucket", "", 10)).await.unwrap();
        assert_eq!(keys(&page), vec!["photos/a.jpg"]);

        // Deleting the marker keeps the objects underneath.
        backend.delete_object("bucket", "photos/").await.unwrap();
        assert!(backend.get_metadata("bucket", "photos/a.jpg").await.is_ok());
    }

    #[tokio::test]
    async fn test_directory_marker_with_content_rejected() {
        let (_dir, backend) = test_backend();
        let err = backend
            .put_object(
                "bucket",
                "photos/",
                ObjectBody::from_bytes("not empty"),
                &ObjectMetadata::default(),
                &AccessDescriptor::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_list_sorted_and_paginated() {
        let (_dir, backend) = test_backend();
        for key in ["src/b.txt", "src/a/z.txt", "src/a.txt", "other/x.txt"] {
            put(&backend, "bucket", key, key).await;
        }

        let mut req = ListRequest::new("bucket", "src/", 2);
        let first = backend.list(&req).await.unwrap();
        assert_eq!(keys(&first), vec!["src/a.txt", "src/a/z.txt"]);
        assert!(first.is_truncated);

        assert!(req.advance(&first));
        let second = backend.list(&req).await.unwrap();
        assert_eq!(keys(&second), vec!["src/b.txt"]);
        assert!(!second.is_truncated);
    }

    #[tokio::test]
    async fn test_list_order_matches_key_order() {
        let (_dir, backend) = test_backend();
        let mut expected = vec!["a-b", "a.txt", "a/z.txt", "a0", "ab/c", "b"];
        for key in &expected {
            put(&backend, "bucket", key, "x").await;
        }
        expected.sort();

        let page = backend.list(&ListRequest::new("bucket", "", 100)).await.unwrap();
        assert_eq!(keys(&page), expected);
    }

    #[tokio::test]
    async fn test_later_pages_skip_earlier_subtrees() {
        let (_dir, backend) = test_backend();
        for i in 0..20 {
            put(&backend, "bucket", &format!("a/{i:02}/f"), "x").await;
        }
        for i in 0..4 {
            put(&backend, "bucket", &format!("b{i}"), "x").await;
        }
        let base = backend.container_dir("bucket");

        let mut req = ListRequest::new("bucket", "", 3);
        let mut listed = Vec::new();
        loop {
            let scan = scan_page(&base, &req).unwrap();
            assert!(scan.entries.len() <= 3);
            let page = scan.into_page();
            listed.extend(page.objects.iter().map(|o| o.key.clone()));
            if !req.advance(&page) {
                break;
            }
        }
        assert_eq!(listed.len(), 24);
        assert!(listed.windows(2).all(|w| w[0] < w[1]));

        // Resuming after `a/19/f` enters only the subtree holding the
        // cursor: root, `a`, `a/19`, `a/19/f`, then `b0`..`b3`.
        req.cursor = Some("a/19/f".into());
        let scan = scan_page(&base, &req).unwrap();
        let page_keys: Vec<_> = scan.entries.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(page_keys, vec!["b0", "b1", "b2"]);
        assert!(scan.truncated);
        assert_eq!(scan.visited, 8);
    }

    #[tokio::test]
    async fn test_list_stops_reading_once_page_is_full() {
        let (_dir, backend) = test_backend();
        for i in 0..50 {
            put(&backend, "bucket", &format!("k{i:02}"), "x").await;
        }
        let base = backend.container_dir("bucket");
        let scan = scan_page(&base, &ListRequest::new("bucket", "", 5)).unwrap();
        assert!(scan.truncated);
        assert_eq!(scan.entries.len(), 5);
        // Root, five files, and the one that proves there is more.
        assert_eq!(scan.visited, 7);
    }

    #[tokio::test]
    async fn test_list_skips_internal_directories() {
        let (_dir, backend) = test_backend();
        put(&backend, "bucket", "file.txt", "x").await;

        let page = backend
            .list(&ListRequest::new("bucket", "", 100))
            .await
            .unwrap();
        assert_eq!(keys(&page), vec!["file.txt"]);
        assert_eq!(page.objects[0].size, 1);
    }

    #[tokio::test]
    async fn test_list_missing_prefix_directory_is_empty() {
        let (_dir, backend) = test_backend();
        put(&backend, "bucket", "file.txt", "x").await;
        let page = backend
            .list(&ListRequest::new("bucket", "nope/", 100))
            .await
            .unwrap();
        assert!(page.objects.is_empty());
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn test_list_missing_container_fails() {
        let (_dir, backend) = test_backend();
        assert!(backend
            .list(&ListRequest::new("absent", "", 10))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_copy_writes_sidecar() {
        let (_dir, backend) = test_backend();
        put(&backend, "src", "k.txt", "copy me").await;

        let access = AccessDescriptor {
            owner: None,
            grants: vec![AclGrant {
                grantee: AclGrantee::CanonicalUser {
                    id: "owner".into(),
                    display_name: String::new(),
                },
                permission: "FULL_CONTROL".into(),
            }],
        };
        let request = CopyRequest {
            source_container: "src".into(),
            source_key: "k.txt".into(),
            dest_container: "dst".into(),
            dest_key: "nested/k.txt".into(),
            metadata: ObjectMetadata {
                content_type: Some("text/plain".into()),
                ..Default::default()
            },
            access: access.clone(),
        };
        backend.copy(&request).await.unwrap();

        let src = backend.get_metadata("src", "k.txt").await.unwrap();
        let dst = backend.get_metadata("dst", "nested/k.txt").await.unwrap();
        assert_eq!(src.etag, dst.etag);
        assert_eq!(dst.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            backend.get_access_descriptor("dst", "nested/k.txt").await.unwrap(),
            access
        );
    }

    #[tokio::test]
    async fn test_copy_nonexistent_source() {
        let (_dir, backend) = test_backend();
        std::fs::create_dir_all(backend.container_dir("src")).unwrap();
        let request = CopyRequest {
            source_container: "src".into(),
            source_key: "missing".into(),
            dest_container: "dst".into(),
            dest_key: "missing".into(),
            metadata: ObjectMetadata::default(),
            access: AccessDescriptor::default(),
        };
        assert!(backend.copy(&request).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_sidecar() {
        let (_dir, backend) = test_backend();
        put(&backend, "bucket", "k", "data").await;
        assert!(backend.sidecar_path("bucket", "k").exists());

        backend.delete_object("bucket", "k").await.unwrap();
        assert!(!backend.sidecar_path("bucket", "k").exists());
        assert!(backend.get_metadata("bucket", "k").await.unwrap_err().is_not_found());

        // Deleting a non-existent key should succeed (idempotent).
        backend.delete_object("bucket", "k").await.unwrap();
    }
}
