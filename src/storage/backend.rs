//! Abstract storage backend trait.
//!
//! Every storage backend must implement [`StorageBackend`].  The mirror
//! engine only talks to containers through this trait, so it never needs
//! to know whether keys live in an S3 bucket, a directory tree, or memory.

use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::errors::StorageError;

/// Boxed future returned by every [`StorageBackend`] method.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

// ── Listing ────────────────────────────────────────────────────────

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Key, unique within its container.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
    /// Backend identity tag (S3 ETag).  `None` when listing does not
    /// compute it; metadata lookups always do.
    pub etag: Option<String>,
}

/// Query for one page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Container (bucket or directory) to list.
    pub container: String,
    /// Only keys starting with this prefix are returned.
    pub prefix: String,
    /// Maximum number of entries per page.
    pub fetch_size: usize,
    /// Opaque continuation cursor; `None` for the first page.
    pub cursor: Option<String>,
}

impl ListRequest {
    pub fn new(container: impl Into<String>, prefix: impl Into<String>, fetch_size: usize) -> Self {
        Self {
            container: container.into(),
            prefix: prefix.into(),
            fetch_size,
            cursor: None,
        }
    }

    /// Move the cursor past `page`.  Returns `false` when the listing is
    /// exhausted and no further request should be issued.
    pub fn advance(&mut self, page: &ListingPage) -> bool {
        if !page.is_truncated {
            return false;
        }
        match &page.next_cursor {
            Some(cursor) => {
                self.cursor = Some(cursor.clone());
                true
            }
            None => false,
        }
    }
}

/// Result of one [`ListRequest`].
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Entries in backend order (stable within the page).
    pub objects: Vec<ObjectSummary>,
    /// Cursor for the next page, if truncated.
    pub next_cursor: Option<String>,
    /// Whether more pages are available.
    pub is_truncated: bool,
}

// ── Object metadata ────────────────────────────────────────────────

/// Everything needed to recreate an object at the destination, minus its bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Size in bytes.
    pub size: u64,
    /// Quoted ETag string (e.g., `"d41d8cd98f00b204e9800998ecf8427e"`).
    pub etag: String,
    /// MIME content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Content-Encoding header value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    /// Content-Disposition header value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    /// Cache-Control header value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// User-defined metadata (`x-amz-meta-*` without the prefix).
    #[serde(default)]
    pub user_metadata: BTreeMap<String, String>,
    /// Last modification time, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

// ── Access control ─────────────────────────────────────────────────

/// Access-control state replicated alongside an object.
///
/// The default value (no owner, no grants) is the empty descriptor; a
/// backend receiving it leaves the destination's own defaults in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDescriptor {
    /// Owner of the object, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<AclOwner>,
    /// List of access grants.
    #[serde(default)]
    pub grants: Vec<AclGrant>,
}

impl AccessDescriptor {
    /// Whether this is the empty descriptor.
    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.grants.is_empty()
    }

    /// All grantees holding `permission`.
    pub fn grantees_with(&self, permission: &str) -> impl Iterator<Item = &AclGrantee> + '_ {
        let permission = permission.to_string();
        self.grants
            .iter()
            .filter(move |g| g.permission == permission)
            .map(|g| &g.grantee)
    }
}

/// Owner portion of an ACL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclOwner {
    /// Canonical user ID.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
}

/// A single ACL grant entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclGrant {
    /// The grantee receiving the permission.
    pub grantee: AclGrantee,
    /// The permission being granted (`READ`, `FULL_CONTROL`, ...).
    pub permission: String,
}

/// A grantee in an ACL grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AclGrantee {
    /// A canonical user grantee.
    CanonicalUser {
        id: String,
        #[serde(default)]
        display_name: String,
    },
    /// A group grantee.
    Group { uri: String },
    /// A grantee identified by e-mail address.
    Email { address: String },
}

impl AclGrantee {
    /// Render in the `x-amz-grant-*` header form, e.g. `id="abc"`.
    pub fn header_value(&self) -> String {
        match self {
            AclGrantee::CanonicalUser { id, .. } => format!("id=\"{id}\""),
            AclGrantee::Group { uri } => format!("uri=\"{uri}\""),
            AclGrantee::Email { address } => format!("emailAddress=\"{address}\""),
        }
    }
}

// ── Object bodies ──────────────────────────────────────────────────

/// Object contents travelling from one backend to another.
///
/// The bytes are pulled from `stream` as the destination writes them, so a
/// transfer holds at most a buffer's worth of the object in memory.
pub struct ObjectBody {
    /// Exact length of the stream in bytes.
    pub size: u64,
    pub stream: ByteStream,
}

impl ObjectBody {
    pub fn new(size: u64, stream: ByteStream) -> Self {
        Self { size, stream }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::new(data.len() as u64, ByteStream::from(data))
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Read the whole body into memory.
    pub async fn collect(self) -> Result<Bytes, StorageError> {
        let data = self
            .stream
            .collect()
            .await
            .map_err(|e| StorageError::Backend(anyhow::Error::new(e)))?
            .into_bytes();
        if data.len() as u64 != self.size {
            return Err(StorageError::Backend(anyhow::anyhow!(
                "body ended after {} of {} bytes",
                data.len(),
                self.size
            )));
        }
        Ok(data)
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody").field("size", &self.size).finish_non_exhaustive()
    }
}

// ── Copy ───────────────────────────────────────────────────────────

/// A fully resolved copy: where from, where to, and what to attach.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source_container: String,
    pub source_key: String,
    pub dest_container: String,
    pub dest_key: String,
    /// Metadata replacing whatever the destination had.
    pub metadata: ObjectMetadata,
    /// Access descriptor replacing whatever the destination had.
    pub access: AccessDescriptor,
}

// ── Trait ──────────────────────────────────────────────────────────

/// Async object storage contract.
///
/// `get_metadata` must report an absent key as
/// [`StorageError::NotFound`], never as a generic error, since the mirror
/// engine copies on not-found but refuses to copy on any other failure.
pub trait StorageBackend: Send + Sync + 'static {
    /// Return one page of keys under `request.prefix`, strictly after
    /// `request.cursor`, in a stable order.
    fn list<'a>(&'a self, request: &'a ListRequest) -> StorageFuture<'a, ListingPage>;

    /// Fetch size, identity tag and headers of one object.
    fn get_metadata<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectMetadata>;

    /// Fetch the access descriptor of one object.
    fn get_access_descriptor<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> StorageFuture<'a, AccessDescriptor>;

    /// Server-side copy within this backend, replacing metadata and ACL
    /// in the same logical operation.
    fn copy<'a>(&'a self, request: &'a CopyRequest) -> StorageFuture<'a, ()>;

    /// Open the object for reading.
    fn get_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectBody>;

    /// Write a full object, streaming `body`, with its metadata and access
    /// descriptor.
    fn put_object<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        body: ObjectBody,
        metadata: &'a ObjectMetadata,
        access: &'a AccessDescriptor,
    ) -> StorageFuture<'a, ()>;

    /// Delete one object.  Deleting an absent key succeeds.
    fn delete_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ()>;

    /// Short backend name for log lines.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(keys: &[&str], next: Option<&str>, truncated: bool) -> ListingPage {
        ListingPage {
            objects: keys
                .iter()
                .map(|k| ObjectSummary {
                    key: k.to_string(),
                    size: 1,
                    last_modified: None,
                    etag: None,
                })
                .collect(),
            next_cursor: next.map(str::to_string),
            is_truncated: truncated,
        }
    }

    #[test]
    fn test_advance_moves_cursor() {
        let mut req = ListRequest::new("bucket", "src/", 2);
        assert!(req.advance(&page(&["src/a", "src/b"], Some("src/b"), true)));
        assert_eq!(req.cursor.as_deref(), Some("src/b"));
    }

    #[test]
    fn test_advance_stops_on_last_page() {
        let mut req = ListRequest::new("bucket", "", 2);
        assert!(!req.advance(&page(&["a"], None, false)));
        assert_eq!(req.cursor, None);
    }

    #[test]
    fn test_advance_stops_without_cursor() {
        let mut req = ListRequest::new("bucket", "", 2);
        assert!(!req.advance(&page(&["a", "b"], None, true)));
    }

    #[test]
    fn test_empty_access_descriptor() {
        assert!(AccessDescriptor::default().is_empty());
        let acl = AccessDescriptor {
            owner: None,
            grants: vec![AclGrant {
                grantee: AclGrantee::Group {
                    uri: "http://acs.amazonaws.com/groups/global/AllUsers".into(),
                },
                permission: "READ".into(),
            }],
        };
        assert!(!acl.is_empty());
        let readers: Vec<_> = acl.grantees_with("READ").map(|g| g.header_value()).collect();
        assert_eq!(
            readers,
            vec!["uri=\"http://acs.amazonaws.com/groups/global/AllUsers\"".to_string()]
        );
    }

    #[tokio::test]
    async fn test_object_body_collect() {
        let body = ObjectBody::from_bytes("abc");
        assert_eq!(body.size, 3);
        assert_eq!(body.collect().await.unwrap(), Bytes::from("abc"));

        let short = ObjectBody::new(10, ByteStream::from_static(b"abc"));
        assert!(short.collect().await.is_err());
    }

    #[test]
    fn test_metadata_sidecar_json_shape() {
        let meta = ObjectMetadata {
            size: 3,
            etag: "\"abc\"".into(),
            content_type: Some("text/plain".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("cache_control"));
        let back: ObjectMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
