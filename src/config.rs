//! Configuration loading and types for s3mirror.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct.  Every field has a default, so an empty file (or
//! no file at all) is a valid configuration.  Command-line flags are
//! applied on top by the binary.

use serde::Deserialize;
use std::path::Path;

use crate::errors::MirrorError;
use crate::options::InconclusivePolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Defaults for the mirror run itself.
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// Backend holding the source container.
    #[serde(default)]
    pub source: StorageConfig,

    /// Backend holding the destination container.  When absent the source
    /// backend is used for both sides and copies stay server-side.
    #[serde(default)]
    pub destination: Option<StorageConfig>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Run defaults; each one can be overridden on the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Attempts per remote operation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum number of keys processed concurrently.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,

    /// Listing page size.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Pause between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub verbose: bool,

    /// Only copy objects modified within this age (`7`, `7d`, `12h`, ...).
    #[serde(default)]
    pub ctime: Option<String>,

    #[serde(default)]
    pub encrypted_destination: bool,

    #[serde(default)]
    pub delete_removed: bool,

    /// `skip` or `fail` when the destination cannot be read.
    #[serde(default)]
    pub on_inconclusive: InconclusivePolicy,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_parallelism: default_max_parallelism(),
            fetch_size: default_fetch_size(),
            retry_delay_ms: default_retry_delay_ms(),
            dry_run: false,
            verbose: false,
            ctime: None,
            encrypted_destination: false,
            delete_removed: false,
            on_inconclusive: InconclusivePolicy::Skip,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// The run's counters are always published to the Prometheus recorder;
/// `metrics_file` additionally writes them out in text exposition format
/// for a node-exporter textfile collector.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Where to write the rendered metrics after the run.
    #[serde(default)]
    pub metrics_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_file: None,
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `aws`, `local` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// AWS S3 configuration.
    #[serde(default)]
    pub aws: AwsStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            aws: AwsStorageConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Directory whose subdirectories are containers.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// AWS S3 configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsStorageConfig {
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
    /// Request `AES256` server-side encryption on writes.
    #[serde(default)]
    pub server_side_encryption: bool,
}

impl Default for AwsStorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: String::new(),
            use_path_style: false,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            server_side_encryption: false,
        }
    }
}

impl Config {
    /// Reject values that cannot produce a working run.
    pub fn validate(&self) -> Result<(), MirrorError> {
        if self.mirror.max_retries == 0 {
            return Err(MirrorError::Config("mirror.max_retries must be at least 1".into()));
        }
        if self.mirror.max_parallelism == 0 {
            return Err(MirrorError::Config(
                "mirror.max_parallelism must be at least 1".into(),
            ));
        }
        if self.mirror.fetch_size == 0 {
            return Err(MirrorError::Config("mirror.fetch_size must be at least 1".into()));
        }
        self.source.validate("source")?;
        if let Some(destination) = &self.destination {
            destination.validate("destination")?;
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(MirrorError::Config(format!(
                "logging.format must be text or json, got {other:?}"
            ))),
        }
    }
}

impl StorageConfig {
    fn validate(&self, section: &str) -> Result<(), MirrorError> {
        match self.backend.as_str() {
            "aws" | "memory" => Ok(()),
            "local" if self.local.root_dir.is_empty() => Err(MirrorError::Config(format!(
                "{section}.local.root_dir must not be empty"
            ))),
            "local" => Ok(()),
            other => Err(MirrorError::Config(format!(
                "{section}.backend must be aws, local or memory, got {other:?}"
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_parallelism() -> usize {
    100
}

fn default_fetch_size() -> usize {
    1000
}

fn default_retry_delay_ms() -> u64 {
    10
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_storage_backend() -> String {
    "aws".to_string()
}

fn default_storage_root() -> String {
    "./data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
