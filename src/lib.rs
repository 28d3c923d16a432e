//! s3mirror library: incremental object-storage mirroring.
//!
//! This crate copies every object under a source prefix to a destination
//! container whenever the destination copy is missing or differs in size
//! or identity tag.  It provides pluggable storage backends, the per-key
//! transfer job, a bounded scheduler, run statistics, and the engine that
//! ties them together.

pub mod config;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod job;
pub mod metrics;
pub mod options;
pub mod prune;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod storage;

pub use engine::{Mirror, MirrorSummary};
pub use errors::{MirrorError, StorageError};
pub use options::MirrorOptions;
