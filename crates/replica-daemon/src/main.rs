//! replica-sync: two-replica directory synchronizer.
//!
//! `serve` exposes directories on this machine to sync clients.
//! `sync` reconciles a local directory with a directory on a server.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use replica_core::{LocalReplica, Replica, RoundReport, sync_round};
use replica_daemon::{NativeFs, ReconnectConfig, RemoteReplica, ReplicaServer};

#[derive(Parser, Debug)]
#[command(name = "replica-sync")]
#[command(about = "Version-vector directory sync between two machines")]
struct Args {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve replica roots to sync clients
    Serve {
        /// Address to listen on for incoming connections
        #[arg(short, long, default_value = "0.0.0.0:8080", env = "REPLICA_SYNC_LISTEN")]
        listen: String,

        /// Exit after the first connection finishes
        #[arg(long)]
        once: bool,
    },

    /// Synchronize a local directory with one on a server
    Sync {
        /// Server address (e.g. ws://host:8080)
        #[arg(short, long, env = "REPLICA_SYNC_REMOTE")]
        remote: String,

        /// Directory on the server
        #[arg(long, env = "REPLICA_SYNC_REMOTE_ROOT")]
        remote_root: String,

        /// Local directory
        #[arg(short, long, env = "REPLICA_SYNC_LOCAL")]
        local: PathBuf,

        /// Repeat every N seconds instead of exiting after one round
        #[arg(long, env = "REPLICA_SYNC_INTERVAL")]
        interval: Option<u64>,

        /// Connection attempts before a round gives up
        #[arg(long, default_value_t = 5, env = "REPLICA_SYNC_RETRIES")]
        retries: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,replica_core=debug,replica_daemon=debug"
    } else {
        "info,replica_core=info,replica_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Serve { listen, once } => serve(&listen, once).await,
        Command::Sync {
            remote,
            remote_root,
            local,
            interval,
            retries,
        } => {
            let config = ReconnectConfig {
                max_attempts: Some(retries.max(1)),
                ..Default::default()
            };
            sync(&remote, &remote_root, local, interval, &config).await
        }
    }
}

async fn serve(listen: &str, once: bool) -> Result<()> {
    let server = ReplicaServer::bind(listen).await?;

    if once {
        return server.serve_once().await;
    }

    info!("Server running. Press Ctrl+C to stop.");
    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}

async fn sync(
    remote: &str,
    remote_root: &str,
    local: PathBuf,
    interval: Option<u64>,
    config: &ReconnectConfig,
) -> Result<()> {
    if !local.is_dir() {
        bail!("Local root {} is not a directory", local.display());
    }
    info!("Local root: {}", local.display());
    info!("Remote: {} ({})", remote, remote_root);

    let Some(secs) = interval else {
        let report = run_round(remote, remote_root, &local, config).await?;
        if !report.conflicts().is_empty() {
            warn!("{} conflict(s) left for manual resolution", report.conflicts().len());
        }
        return Ok(());
    };

    info!("Syncing every {}s. Press Ctrl+C to stop.", secs);
    loop {
        if let Err(e) = run_round(remote, remote_root, &local, config).await {
            error!("Round failed: {:#}", e);
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                return Ok(());
            }
        }
    }
}

/// One round over a fresh connection.
async fn run_round(
    remote: &str,
    remote_root: &str,
    local: &Path,
    config: &ReconnectConfig,
) -> Result<RoundReport> {
    let remote = RemoteReplica::connect(remote, remote_root, config).await?;
    let local = LocalReplica::new("local", NativeFs::new(local.to_path_buf()));

    let result = sync_round(&local, &remote).await;

    if let Err(e) = remote.shutdown().await {
        warn!("Failed to close remote session: {}", e);
    }
    Ok(result?)
}
