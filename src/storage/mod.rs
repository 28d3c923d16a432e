//! Object storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where objects
//! physically live.  Implementations include local directory trees,
//! AWS S3 (and S3-compatible endpoints), and an in-memory store.
//! [`route::StorageRoute`] pairs a source backend with a destination one.

pub mod aws;
pub mod backend;
pub mod local;
pub mod memory;
pub mod route;

#[cfg(test)]
pub(crate) mod testing;
