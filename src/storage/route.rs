//! Source/destination pairing.
//!
//! A mirror run reads from one backend and writes to another, which may be
//! the same backend.  [`StorageRoute`] hides that difference from the
//! engine: when both sides share a backend a copy is a single server-side
//! `copy` call; otherwise the source body is streamed into the destination
//! without being buffered whole.  Either way the caller sees one logical
//! copy.

use std::sync::Arc;

use super::backend::{CopyRequest, StorageBackend};
use crate::errors::StorageError;

/// How copies travel between the two sides.
enum Transport {
    /// Both sides live on one backend.
    ServerSide(Arc<dyn StorageBackend>),
    /// The sides live on different backends.
    Streamed {
        source: Arc<dyn StorageBackend>,
        destination: Arc<dyn StorageBackend>,
    },
}

/// The pair of backends a mirror run operates on.
pub struct StorageRoute {
    transport: Transport,
}

impl StorageRoute {
    /// Source and destination containers live on the same backend.
    pub fn shared(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            transport: Transport::ServerSide(backend),
        }
    }

    /// Source and destination containers live on different backends.
    pub fn between(source: Arc<dyn StorageBackend>, destination: Arc<dyn StorageBackend>) -> Self {
        Self {
            transport: Transport::Streamed {
                source,
                destination,
            },
        }
    }

    /// Backend holding the source container.
    pub fn source(&self) -> &dyn StorageBackend {
        match &self.transport {
            Transport::ServerSide(backend) => backend.as_ref(),
            Transport::Streamed { source, .. } => source.as_ref(),
        }
    }

    /// Backend holding the destination container.
    pub fn destination(&self) -> &dyn StorageBackend {
        match &self.transport {
            Transport::ServerSide(backend) => backend.as_ref(),
            Transport::Streamed { destination, .. } => destination.as_ref(),
        }
    }

    /// Perform one logical copy.
    pub async fn copy(&self, request: &CopyRequest) -> Result<(), StorageError> {
        match &self.transport {
            Transport::ServerSide(backend) => backend.copy(request).await,
            Transport::Streamed {
                source,
                destination,
            } => {
                let body = source
                    .get_object(&request.source_container, &request.source_key)
                    .await?;
                destination
                    .put_object(
                        &request.dest_container,
                        &request.dest_key,
                        body,
                        &request.metadata,
                        &request.access,
                    )
                    .await
            }
        }
    }

    /// Human-readable description for the startup log line.
    pub fn describe(&self) -> String {
        match &self.transport {
            Transport::ServerSide(backend) => format!("{} (server-side copy)", backend.name()),
            Transport::Streamed {
                source,
                destination,
            } => format!("{} -> {} (streamed copy)", source.name(), destination.name()),
        }
    }
}
