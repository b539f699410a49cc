//! adbounty-daemon - bounty lifecycle and escrow coordinator.
//!
//! Startup order: tracing, configuration, ledger, collaborators,
//! coordinator, socket, sweeper, accept loop. Shutdown is cooperative: the
//! ctrl-c handler flips the shared shutdown flag, the accept loop and
//! sweeper drain, and outstanding posting/settlement tasks are awaited
//! before exit so no payout instruction is lost to a fast restart.
//!
//! Without integration endpoints configured, the daemon wires the stub
//! collaborators: funding fails closed (no registered proof means create
//! requests are refused), posting and settlement log and succeed.

use std::path::PathBuf;
use std::sync::Arc;

use adbounty_core::config::CoordinatorConfig;
use adbounty_core::escrow::{EscrowLedger, MemoryLedger};
use adbounty_daemon::collaborators::{LogOnlyPoster, LogOnlySettlement, StaticFunding};
use adbounty_daemon::coordinator::Coordinator;
use adbounty_daemon::ledger_store::SqliteLedger;
use adbounty_daemon::server;
use adbounty_daemon::state::{CoordinatorHandle, SharedHandle};
use adbounty_daemon::sweeper;
use anyhow::Context;
use clap::Parser;
use tokio::net::UnixListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// AdBounty coordinator daemon.
#[derive(Parser, Debug)]
#[command(name = "adbounty-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the coordinator configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the Unix socket (overrides the config file).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Path to the SQLite ledger database (overrides the config file).
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log filter, e.g. `info` or `adbounty_daemon=debug`.
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_filter.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }

    let ledger: Arc<dyn EscrowLedger> = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "opening SQLite ledger");
            Arc::new(SqliteLedger::open(path).context("opening ledger database")?)
        }
        None => {
            warn!("no database configured; ledger is in-memory and will not survive a restart");
            Arc::new(MemoryLedger::new())
        }
    };

    // Stub collaborators; integrations replace these at their trait seams.
    let funding = Arc::new(StaticFunding::new());
    warn!("funding source is the fail-closed stub; create requests need registered proofs");
    let coordinator = Coordinator::new(
        config.clone(),
        ledger,
        funding,
        Arc::new(LogOnlyPoster),
        Arc::new(LogOnlySettlement),
    );
    let handle: SharedHandle = Arc::new(CoordinatorHandle::new(coordinator));

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)
            .with_context(|| format!("removing stale socket {}", config.socket_path.display()))?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("binding {}", config.socket_path.display()))?;
    info!(
        socket = %config.socket_path.display(),
        validator = ?config.validator,
        "adbounty coordinator listening"
    );

    let sweeper_task = sweeper::spawn(handle.clone());

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            signal_handle.request_shutdown();
        }
    });

    server::serve(handle.clone(), listener)
        .await
        .context("protocol server failed")?;

    sweeper_task.await.ok();
    handle.coordinator().quiesce().await;

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path).ok();
    }
    info!("shutdown complete");
    Ok(())
}
