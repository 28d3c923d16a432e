//! s3mirror -- incremental mirroring between object stores.
//!
//! Crash-only design: a run keeps no state of its own, so an interrupted run
//! is recovered by simply running again.  SIGTERM/SIGINT stop new keys from
//! being scheduled and let in-flight copies finish; the statistics report is
//! logged either way.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use s3mirror::config::{load_config, Config, LoggingConfig, StorageConfig};
use s3mirror::errors::MirrorError;
use s3mirror::options::{InconclusivePolicy, Location, MirrorOptions};
use s3mirror::storage::aws::AwsBackend;
use s3mirror::storage::backend::StorageBackend;
use s3mirror::storage::local::LocalBackend;
use s3mirror::storage::memory::MemoryBackend;
use s3mirror::storage::route::StorageRoute;
use s3mirror::Mirror;

const EXIT_ERRORS: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// Command-line arguments for s3mirror.
#[derive(Parser, Debug)]
#[command(
    name = "s3mirror",
    version,
    about = "Mirror objects between S3 buckets and local directory trees"
)]
struct Cli {
    /// Source as <container>[/<prefix>].
    source: String,

    /// Destination as <container>[/<prefix>].
    destination: String,

    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Decide what would be copied without changing the destination.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Log the decision taken for every key.
    #[arg(short, long)]
    verbose: bool,

    /// Attempts per remote operation.
    #[arg(short = 'r', long)]
    max_retries: Option<u32>,

    /// Maximum number of keys processed concurrently.
    #[arg(short = 'm', long = "max-connections")]
    max_connections: Option<usize>,

    /// Listing page size.
    #[arg(short, long)]
    fetch_size: Option<usize>,

    /// Only copy objects modified within this age (7, 7d, 12h, 30m, 45s).
    #[arg(short = 'C', long)]
    ctime: Option<String>,

    /// Tolerate unreadable access control lists on the source.
    #[arg(short = 'E', long)]
    encrypted_destination: bool,

    /// Delete destination keys that no longer exist in the source.
    #[arg(short = 'X', long)]
    delete_removed: bool,

    /// Source prefix (overrides the one in SOURCE).
    #[arg(short, long)]
    prefix: Option<String>,

    /// Destination prefix (overrides the one in DESTINATION).
    #[arg(short, long)]
    dest_prefix: Option<String>,

    /// What to do when a destination key cannot be read.
    #[arg(long, value_enum)]
    on_inconclusive: Option<InconclusivePolicy>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("s3mirror: cannot load {}: {err:#}", path.display());
                return ExitCode::from(EXIT_FATAL);
            }
        },
        None => Config::default(),
    };

    init_tracing(&config.logging);

    match run(&cli, &config).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: &Cli, config: &Config) -> anyhow::Result<ExitCode> {
    config.validate()?;
    let options = build_options(cli, config)?;

    let source = build_backend(&config.source).await?;
    let route = match &config.destination {
        Some(destination) => StorageRoute::between(source, build_backend(destination).await?),
        None => StorageRoute::shared(source),
    };

    let metrics = if config.observability.metrics {
        let handle = s3mirror::metrics::init_metrics()?;
        s3mirror::metrics::describe_metrics();
        Some(handle)
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let mirror = Mirror::new(Arc::new(route), options, cancel)?;
    let result = mirror.run().await;

    let stats = mirror.stats();
    stats.log_stats();
    if let Some(handle) = metrics {
        s3mirror::metrics::publish(&stats.snapshot());
        if let Some(path) = &config.observability.metrics_file {
            match s3mirror::metrics::write_textfile(handle, Path::new(path)) {
                Ok(()) => info!("Metrics written to {path}"),
                Err(err) => warn!("Cannot write metrics to {path}: {err:#}"),
            }
        }
    }

    let summary = result?;
    let code = if summary.cancelled {
        warn!("Run cancelled before every key was scheduled");
        ExitCode::from(EXIT_CANCELLED)
    } else if summary.stats.error_count() > 0 {
        warn!("{} keys failed", summary.stats.error_count());
        ExitCode::from(EXIT_ERRORS)
    } else {
        ExitCode::SUCCESS
    };
    Ok(code)
}

/// Merge file configuration and command-line flags.  Flags win.
fn build_options(cli: &Cli, config: &Config) -> Result<MirrorOptions, MirrorError> {
    let mut source = Location::parse(&cli.source)?;
    let mut destination = Location::parse(&cli.destination)?;
    if let Some(prefix) = &cli.prefix {
        source.prefix = prefix.clone();
    }
    if let Some(prefix) = &cli.dest_prefix {
        destination.prefix = prefix.clone();
    }

    let defaults = &config.mirror;
    let options = MirrorOptions {
        max_retries: cli.max_retries.unwrap_or(defaults.max_retries),
        max_parallelism: cli.max_connections.unwrap_or(defaults.max_parallelism),
        fetch_size: cli.fetch_size.unwrap_or(defaults.fetch_size),
        retry_delay: Duration::from_millis(defaults.retry_delay_ms),
        dry_run: cli.dry_run || defaults.dry_run,
        verbose: cli.verbose || defaults.verbose,
        encrypted_destination: cli.encrypted_destination || defaults.encrypted_destination,
        delete_removed: cli.delete_removed || defaults.delete_removed,
        on_inconclusive: cli.on_inconclusive.unwrap_or(defaults.on_inconclusive),
        ..MirrorOptions::new(source, destination)
    };

    match cli.ctime.as_ref().or(defaults.ctime.as_ref()) {
        Some(ctime) => options.with_ctime(ctime, Utc::now()),
        None => Ok(options),
    }
}

async fn build_backend(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config.backend.as_str() {
        "aws" => {
            let backend = AwsBackend::new(&config.aws).await?;
            info!(
                "AWS storage backend initialized: region={} endpoint='{}'",
                config.aws.region, config.aws.endpoint_url
            );
            Ok(Arc::new(backend))
        }
        "local" => {
            let backend = LocalBackend::new(&config.local.root_dir)?;
            info!("Local storage backend initialized at {}", config.local.root_dir);
            Ok(Arc::new(backend))
        }
        "memory" => {
            info!("Memory storage backend initialized");
            Ok(Arc::new(MemoryBackend::new()))
        }
        other => anyhow::bail!("unknown storage backend {other:?}"),
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, finishing in-flight copies");
        },
        _ = terminate => {
            info!("Received SIGTERM, finishing in-flight copies");
        },
    }
}
