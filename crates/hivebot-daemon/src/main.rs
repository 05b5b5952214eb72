//! Hivebot Daemon
//!
//! The daemon supervises subbot session worker processes and serves the
//! gRPC API to operator tooling.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use hivebot_daemon::gateway::EventGateway;
use hivebot_daemon::launch::LaunchCoordinator;
use hivebot_daemon::notify::{LogNotifier, NotifierBridge};
use hivebot_daemon::quota::{QuotaConfig, QuotaEnforcer};
use hivebot_daemon::server::{GrpcServer, ServerConfig};
use hivebot_daemon::storage::Database;
use hivebot_daemon::supervisor::{
    FsSessionIndex, RestartPolicy, SubbotSupervisor, SupervisorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "hivebot-daemon")]
#[command(version, about = "Hivebot daemon - subbot session supervisor")]
struct Args {
    /// TCP bind address
    #[arg(long, default_value = "127.0.0.1:50071", env = "HIVEBOT_ADDR")]
    addr: SocketAddr,

    /// Database file path
    #[arg(long, env = "HIVEBOT_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Base directory for the database and per-subbot session storage
    #[arg(long, env = "HIVEBOT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to the session worker binary
    #[arg(long, default_value = "hivebot-worker", env = "HIVEBOT_WORKER_BIN")]
    worker_bin: PathBuf,

    /// Extra argument passed through to the worker (repeatable)
    #[arg(long = "worker-arg")]
    worker_args: Vec<String>,

    /// Maximum simultaneously active subbots across all owners
    #[arg(long, default_value_t = 50, env = "HIVEBOT_MAX_ACTIVE")]
    max_active: u32,

    /// Maximum simultaneously active subbots per owner
    #[arg(long, default_value_t = 5, env = "HIVEBOT_MAX_PER_OWNER")]
    max_per_owner: u32,

    /// Automatic restarts before a crashed subbot stays stopped
    #[arg(long, default_value_t = 3, env = "HIVEBOT_MAX_RESTARTS")]
    max_restarts: u32,

    /// Base restart delay in seconds
    #[arg(long, default_value_t = 5, env = "HIVEBOT_RESTART_BASE_SECS")]
    restart_base_secs: u64,

    /// Restart delay ceiling in seconds
    #[arg(long, default_value_t = 60, env = "HIVEBOT_RESTART_CEILING_SECS")]
    restart_ceiling_secs: u64,

    /// Seconds to wait for graceful worker shutdown before SIGKILL
    #[arg(long, default_value_t = 5, env = "HIVEBOT_TERMINATE_TIMEOUT")]
    terminate_timeout: u64,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "HIVEBOT_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "HIVEBOT_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("hivebot_daemon={}", args.log_level);
    hivebot_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        max_active = args.max_active,
        max_per_owner = args.max_per_owner,
        "Starting hivebot-daemon"
    );

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let sessions_dir = data_dir.join("sessions");
    std::fs::create_dir_all(&sessions_dir)?;

    // Initialize database
    let db = if let Some(path) = &args.db_path {
        info!(path = %path.display(), "Opening database");
        Database::open(path).await?
    } else {
        let default_path = data_dir.join("daemon.db");
        info!(path = %default_path.display(), "Opening database (default path)");
        Database::open(&default_path).await?
    };

    let gateway = Arc::new(EventGateway::new());
    let session_index = Arc::new(FsSessionIndex::new(sessions_dir.clone()));

    let supervisor = Arc::new(SubbotSupervisor::new(
        db.clone(),
        Arc::clone(&gateway),
        session_index,
        SupervisorConfig {
            worker_bin: args.worker_bin,
            worker_args: args.worker_args,
            sessions_dir: sessions_dir.clone(),
            restart: RestartPolicy {
                max_restarts: args.max_restarts,
                base: Duration::from_secs(args.restart_base_secs),
                ceiling: Duration::from_secs(args.restart_ceiling_secs),
            },
            terminate_timeout: Duration::from_secs(args.terminate_timeout),
        },
    ));

    let quota = QuotaEnforcer::new(
        db.clone(),
        QuotaConfig {
            max_active: args.max_active,
            max_per_owner: args.max_per_owner,
        },
    );
    let coordinator = Arc::new(LaunchCoordinator::new(
        db.clone(),
        quota,
        Arc::clone(&supervisor),
        sessions_dir,
    ));

    // Private delivery of QR/pairing artifacts to requesters.
    let notifier_bridge = Arc::new(NotifierBridge::new(db.clone(), Arc::new(LogNotifier)));
    notifier_bridge.install(&gateway).await;

    let config = ServerConfig::tcp(args.addr);
    let server = GrpcServer::new(config, db, coordinator, supervisor, gateway);

    // Serve until shutdown signal
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Notify systemd that the daemon is ready to serve (unix only).
    // The `true` parameter unsets $NOTIFY_SOCKET so worker processes
    // don't accidentally notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!(addr = %args.addr, "gRPC server ready");

    tokio::select! {
        result = server.serve_tcp(args.addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    info!("Daemon stopped");
    Ok(())
}

/// Default data directory: ~/.hivebot
fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".hivebot"))
}
