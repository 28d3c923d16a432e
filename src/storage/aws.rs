//! AWS S3 storage backend.
//!
//! Containers are S3 bucket names; keys map one-to-one onto object keys.
//! Copies within S3 are server-side `CopyObject` calls with
//! `MetadataDirective=REPLACE`, so metadata and ACL grants land in the same
//! request as the data.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless the config
//! supplies an explicit key pair.

use aws_sdk_s3::types::{MetadataDirective, ServerSideEncryption, Type};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, info};

use super::backend::{
    AccessDescriptor, AclGrant, AclGrantee, AclOwner, CopyRequest, ListRequest, ListingPage,
    ObjectBody, ObjectMetadata, ObjectSummary, StorageBackend, StorageFuture,
};
use crate::config::AwsStorageConfig;
use crate::errors::StorageError;

/// Characters left unescaped in a `CopySource` header: unreserved plus `/`.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// ACL permissions expressible as `x-amz-grant-*` headers on writes.
const GRANT_FULL_CONTROL: &str = "FULL_CONTROL";
const GRANT_READ: &str = "READ";
const GRANT_READ_ACP: &str = "READ_ACP";
const GRANT_WRITE_ACP: &str = "WRITE_ACP";

/// Backend that talks to S3 (or an S3-compatible endpoint).
pub struct AwsBackend {
    /// AWS S3 SDK client.
    client: Client,
    /// Request `AES256` server-side encryption on every write.
    server_side_encryption: bool,
}

impl AwsBackend {
    /// Build a client from `config`.
    pub async fn new(config: &AwsStorageConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if !config.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&config.endpoint_url);
        }

        // If explicit credentials are provided, inject them as static credentials.
        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "s3mirror-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style)
            .build();

        info!(
            "AWS backend initialized: region={} endpoint='{}' sse={}",
            config.region, config.endpoint_url, config.server_side_encryption
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            server_side_encryption: config.server_side_encryption,
        })
    }

    /// Map an AWS SDK error to a storage error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> StorageError {
        StorageError::Backend(anyhow::anyhow!("AWS S3 {context}: {err}"))
    }

    /// `bucket/key` with the key percent-encoded, as `CopySource` expects.
    fn copy_source(bucket: &str, key: &str) -> String {
        format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE))
    }

    /// Comma-joined grantee list for one permission, or `None`.
    fn grant_header(access: &AccessDescriptor, permission: &str) -> Option<String> {
        let grantees: Vec<String> = access
            .grantees_with(permission)
            .map(AclGrantee::header_value)
            .collect();
        if grantees.is_empty() {
            None
        } else {
            Some(grantees.join(", "))
        }
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn to_grantee(grantee: &aws_sdk_s3::types::Grantee) -> Option<AclGrantee> {
    match grantee.r#type() {
        Type::CanonicalUser => Some(AclGrantee::CanonicalUser {
            id: grantee.id()?.to_string(),
            display_name: grantee.display_name().unwrap_or_default().to_string(),
        }),
        Type::Group => Some(AclGrantee::Group {
            uri: grantee.uri()?.to_string(),
        }),
        Type::AmazonCustomerByEmail => Some(AclGrantee::Email {
            address: grantee.email_address()?.to_string(),
        }),
        _ => None,
    }
}

impl StorageBackend for AwsBackend {
    fn list<'a>(&'a self, request: &'a ListRequest) -> StorageFuture<'a, ListingPage> {
        Box::pin(async move {
            debug!(
                "AWS list_objects_v2: bucket={} prefix='{}' cursor={:?}",
                request.container, request.prefix, request.cursor
            );

            let max_keys = i32::try_from(request.fetch_size).unwrap_or(i32::MAX);
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&request.container)
                .prefix(&request.prefix)
                .max_keys(max_keys)
                .set_continuation_token(request.cursor.clone())
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("list_objects_v2", e.into_service_error()))?;

            let objects = resp
                .contents()
                .iter()
                .filter_map(|obj| {
                    Some(ObjectSummary {
                        key: obj.key()?.to_string(),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: obj.last_modified().and_then(to_chrono),
                        etag: obj.e_tag().map(str::to_string),
                    })
                })
                .collect();

            let is_truncated = resp.is_truncated() == Some(true);
            Ok(ListingPage {
                objects,
                next_cursor: resp.next_continuation_token().map(str::to_string),
                is_truncated,
            })
        })
    }

    fn get_metadata<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectMetadata> {
        Box::pin(async move {
            debug!("AWS head_object: bucket={} key={}", container, key);

            let resp = self
                .client
                .head_object()
                .bucket(container)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        StorageError::not_found(container, key)
                    } else {
                        Self::map_sdk_error("head_object", service_err)
                    }
                })?;

            Ok(ObjectMetadata {
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                etag: resp.e_tag().unwrap_or_default().to_string(),
                content_type: resp.content_type().map(str::to_string),
                content_encoding: resp.content_encoding().map(str::to_string),
                content_disposition: resp.content_disposition().map(str::to_string),
                cache_control: resp.cache_control().map(str::to_string),
                user_metadata: resp
                    .metadata()
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default(),
                last_modified: resp.last_modified().and_then(to_chrono),
            })
        })
    }

    fn get_access_descriptor<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> StorageFuture<'a, AccessDescriptor> {
        Box::pin(async move {
            debug!("AWS get_object_acl: bucket={} key={}", container, key);

            let resp = self
                .client
                .get_object_acl()
                .bucket(container)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        StorageError::not_found(container, key)
                    } else {
                        Self::map_sdk_error("get_object_acl", service_err)
                    }
                })?;

            let owner = resp.owner().map(|o| AclOwner {
                id: o.id().unwrap_or_default().to_string(),
                display_name: o.display_name().unwrap_or_default().to_string(),
            });
            let grants = resp
                .grants()
                .iter()
                .filter_map(|g| {
                    Some(AclGrant {
                        grantee: to_grantee(g.grantee()?)?,
                        permission: g.permission()?.as_str().to_string(),
                    })
                })
                .collect();

            Ok(AccessDescriptor { owner, grants })
        })
    }

    fn copy<'a>(&'a self, request: &'a CopyRequest) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            debug!(
                "AWS copy_object: src={}/{} dst={}/{}",
                request.source_container, request.source_key, request.dest_container, request.dest_key
            );

            let meta = &request.metadata;
            let mut builder = self
                .client
                .copy_object()
                .bucket(&request.dest_container)
                .key(&request.dest_key)
                .copy_source(Self::copy_source(&request.source_container, &request.source_key))
                .metadata_directive(MetadataDirective::Replace)
                .set_content_type(meta.content_type.clone())
                .set_content_encoding(meta.content_encoding.clone())
                .set_content_disposition(meta.content_disposition.clone())
                .set_cache_control(meta.cache_control.clone())
                .set_metadata(Some(meta.user_metadata.clone().into_iter().collect()))
                .set_grant_full_control(Self::grant_header(&request.access, GRANT_FULL_CONTROL))
                .set_grant_read(Self::grant_header(&request.access, GRANT_READ))
                .set_grant_read_acp(Self::grant_header(&request.access, GRANT_READ_ACP))
                .set_grant_write_acp(Self::grant_header(&request.access, GRANT_WRITE_ACP));
            if self.server_side_encryption {
                builder = builder.server_side_encryption(ServerSideEncryption::Aes256);
            }

            builder.send().await.map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.meta().code() == Some("NoSuchKey") {
                    StorageError::not_found(&request.source_container, &request.source_key)
                } else {
                    Self::map_sdk_error("copy_object", service_err)
                }
            })?;
            Ok(())
        })
    }

    fn get_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ObjectBody> {
        Box::pin(async move {
            debug!("AWS get_object: bucket={} key={}", container, key);

            let resp = self
                .client
                .get_object()
                .bucket(container)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        StorageError::not_found(container, key)
                    } else {
                        Self::map_sdk_error("get_object", service_err)
                    }
                })?;

            let size = resp.content_length().unwrap_or(0).max(0) as u64;
            Ok(ObjectBody::new(size, resp.body))
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
            debug!(
                "AWS put_object: bucket={} key={} size={}",
                container, key, body.size
            );

            let content_length = i64::try_from(body.size)
                .map_err(|_| Self::map_sdk_error("put_object", format!("{} bytes is too large", body.size)))?;
            let mut builder = self
                .client
                .put_object()
                .bucket(container)
                .key(key)
                .content_length(content_length)
                .body(body.stream)
                .set_content_type(metadata.content_type.clone())
                .set_content_encoding(metadata.content_encoding.clone())
                .set_content_disposition(metadata.content_disposition.clone())
                .set_cache_control(metadata.cache_control.clone())
                .set_metadata(Some(metadata.user_metadata.clone().into_iter().collect()))
                .set_grant_full_control(Self::grant_header(access, GRANT_FULL_CONTROL))
                .set_grant_read(Self::grant_header(access, GRANT_READ))
                .set_grant_read_acp(Self::grant_header(access, GRANT_READ_ACP))
                .set_grant_write_acp(Self::grant_header(access, GRANT_WRITE_ACP));
            if self.server_side_encryption {
                builder = builder.server_side_encryption(ServerSideEncryption::Aes256);
            }

            builder
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e.into_service_error()))?;
            Ok(())
        })
    }

    fn delete_object<'a>(&'a self, container: &'a str, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            debug!("AWS delete_object: bucket={} key={}", container, key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(container)
                .key(key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e.into_service_error()))?;
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "aws"
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_source_plain_key() {
        assert_eq!(
            AwsBackend::copy_source("bucket", "dir/file.txt"),
            "bucket/dir/file.txt"
        );
    }

    #[test]
    fn test_copy_source_encodes_special_chars() {
        assert_eq!(
            AwsBackend::copy_source("bucket", "key with spaces+plus.txt"),
            "bucket/key%20with%20spaces%2Bplus.txt"
        );
    }

    #[test]
    fn test_grant_header_joins_grantees() {
        let access = AccessDescriptor {
            owner: None,
            grants: vec![
                AclGrant {
                    grantee: AclGrantee::CanonicalUser {
                        id: "abc".into(),
                        display_name: "me".into(),
                    },
                    permission: GRANT_READ.into(),
                },
                AclGrant {
                    grantee: AclGrantee::Group {
                        uri: "http://acs.amazonaws.com/groups/global/AllUsers".into(),
                    },
                    permission: GRANT_READ.into(),
                },
                AclGrant {
                    grantee: AclGrantee::CanonicalUser {
                        id: "abc".into(),
                        display_name: "me".into(),
                    },
                    permission: GRANT_FULL_CONTROL.into(),
                },
            ],
        };
        assert_eq!(
            AwsBackend::grant_header(&access, GRANT_READ).as_deref(),
            Some("id=\"abc\", uri=\"http://acs.amazonaws.com/groups/global/AllUsers\"")
        );
        assert_eq!(
            AwsBackend::grant_header(&access, GRANT_FULL_CONTROL).as_deref(),
            Some("id=\"abc\"")
        );
        assert_eq!(AwsBackend::grant_header(&access, GRANT_WRITE_ACP), None);
    }

    #[test]
    fn test_grant_header_empty_descriptor() {
        assert_eq!(
            AwsBackend::grant_header(&AccessDescriptor::default(), GRANT_READ),
            None
        );
    }

    #[test]
    fn test_to_chrono() {
        let dt = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        let converted = to_chrono(&dt).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }
}
