//! kubeyardd — the Kubeyard daemon.
//!
//! Assembles the orchestrator in one process:
//! - State store (redb)
//! - Cloud collaborators (the built-in `sandbox` backend)
//! - Cluster manager
//! - Garbage collector and status reconciler sweeps
//!
//! # Usage
//!
//! ```text
//! kubeyardd run --config /etc/kubeyard/kubeyard.toml --data-dir /var/lib/kubeyard
//! kubeyardd check-config --config /etc/kubeyard/kubeyard.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kubeyard_cloud::{CloudServices, SimulatedCloud, StaticConfigStore};
use kubeyard_core::ServiceConfig;
use kubeyard_orchestrator::ClusterManager;
use kubeyard_reconcile::{GarbageCollector, StatusReconciler, SweepScheduler};
use kubeyard_state::{ClusterState, StateStore};

const DEFAULT_LOG_FILTER: &str = "info,kubeyard=debug";

#[derive(Parser)]
#[command(name = "kubeyardd", about = "Kubeyard cluster orchestrator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process simulated cloud.
    Sandbox,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator and its background sweeps until Ctrl-C.
    Run {
        /// Service configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/kubeyard")]
        data_dir: PathBuf,

        /// Cloud backend the collaborators talk to.
        #[arg(long, value_enum, default_value_t = Backend::Sandbox)]
        backend: Backend,
    },
    /// Parse a configuration file and print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            data_dir,
            backend,
        } => run(config.as_deref(), data_dir, backend).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServiceConfig> {
    match path {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(ServiceConfig::default()),
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(Some(path))?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

async fn build_cloud(backend: Backend, config: &ServiceConfig) -> CloudServices {
    match backend {
        Backend::Sandbox => {
            let cloud = Arc::new(SimulatedCloud::sandbox().await);
            CloudServices::simulated(cloud, Arc::new(StaticConfigStore::from(config)))
        }
    }
}

async fn run(config: Option<&Path>, data_dir: PathBuf, backend: Backend) -> anyhow::Result<()> {
    info!("Kubeyard daemon starting");
    let config = load_config(config)?;

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("kubeyard.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let cloud = build_cloud(backend, &config).await;
    info!(?backend, "cloud collaborators ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeps_config = config.sweeps.clone();
    let manager = ClusterManager::new(store.clone(), cloud.clone(), config, shutdown_rx);

    let live = store
        .list_clusters()?
        .into_iter()
        .filter(|c| !c.is_removed())
        .collect::<Vec<_>>();
    let running = live
        .iter()
        .filter(|c| c.state == ClusterState::Running)
        .count();
    let gc_pending = live.iter().filter(|c| c.gc_pending).count();
    info!(clusters = live.len(), running, gc_pending, "cluster inventory loaded");

    // ── Start background sweeps ────────────────────────────────

    let gc = GarbageCollector::new(store.clone(), manager.teardown_workflow().clone());
    let reconciler = StatusReconciler::new(store, cloud.vms.clone());
    let scheduler = SweepScheduler::from_config(&sweeps_config, gc, reconciler);
    scheduler.start().await;

    // ── Wait for shutdown ──────────────────────────────────────

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; shutting down");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    scheduler.stop().await;

    info!("Kubeyard daemon stopped");
    Ok(())
}
