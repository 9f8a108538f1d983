//! OpenEndpoint server binary.
//!
//! # Usage
//!
//! ```text
//! openep serve --config openep.json
//! openep version
//! openep release
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `OPENEP_SERVER_HOST` | Bind host |
//! | `OPENEP_SERVER_PORT` | Bind port |
//! | `OPENEP_STORAGE_DATA_DIR` | Volume directory |
//! | `OPENEP_AUTH_ACCESS_KEY` | Root access key |
//! | `OPENEP_AUTH_SECRET_KEY` | Root secret key |
//! | `OPENEP_LOG_LEVEL` | Log level filter (overridden by `RUST_LOG`) |
//!
//! Exit codes: 0 success, 1 configuration error, 2 runtime error,
//! 130 interrupted by SIGINT.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use openep_core::OpenEpConfig;
use openep_pipeline::StoragePlane;

/// Exit code for a configuration error.
const EXIT_CONFIG: u8 = 1;

/// Exit code for a runtime error.
const EXIT_RUNTIME: u8 = 2;

/// Exit code after a SIGINT-triggered shutdown.
const EXIT_SIGINT: u8 = 130;

/// Interval between status log lines while serving.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "openep", about = "S3-compatible object storage", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the storage server.
    Serve {
        /// Path to a JSON configuration file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Print the version and exit.
    Version,
    /// Package the current executable into a release archive under dist/.
    Release,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => run_serve(config.as_deref()),
        Command::Version => {
            println!("openep {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Command::Release => run_release(),
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
    Ok(())
}

fn run_serve(config_path: Option<&str>) -> ExitCode {
    let config = match OpenEpConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("configuration error: {e}");
        return ExitCode::from(EXIT_CONFIG);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            return ExitCode::from(EXIT_RUNTIME);
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::from(EXIT_SIGINT),
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

/// Boot the storage plane and run until SIGINT, logging stats periodically.
async fn serve(config: OpenEpConfig) -> Result<()> {
    info!(
        host = %config.server.host,
        port = config.server.port,
        region = %config.region,
        "starting OpenEndpoint"
    );

    let plane = StoragePlane::bootstrap(&config)?;
    plane.start();

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    status.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, draining background work");
                break;
            }
            _ = status.tick() => {
                let engine = plane.service.engine_stats();
                let dedup = plane.service.dedup_stats();
                info!(
                    volumes = engine.volume_count,
                    sealed = engine.sealed_count,
                    live_needles = engine.live_needles,
                    bytes_written = engine.bytes_written,
                    dedup_entries = dedup.entries,
                    dedup_hits = dedup.dedup_hits,
                    "status"
                );
            }
        }
    }

    plane.shutdown().await?;
    info!("shutdown complete");
    Ok(())
}

/// Package the running executable into `dist/` with a checksum file.
fn run_release() -> ExitCode {
    match build_release_archive() {
        Ok(path) => {
            println!("release artifact written to {path}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("release failed: {e}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

fn build_release_archive() -> Result<String> {
    let exe = std::env::current_exe().context("cannot locate current executable")?;
    let name = format!(
        "openep-{}-{}-{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    std::fs::create_dir_all("dist").context("cannot create dist directory")?;
    let target = format!("dist/{name}");
    std::fs::copy(&exe, &target).with_context(|| format!("cannot copy executable to {target}"))?;

    let bytes = std::fs::read(&target).context("cannot read release artifact")?;
    let digest = hex::encode(Sha256::digest(&bytes));
    std::fs::write(format!("{target}.sha256"), format!("{digest}  {name}\n"))
        .context("cannot write checksum file")?;

    Ok(target)
}
