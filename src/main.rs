use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use module_orchestrator::cluster::ConfigMapConfigSource;
use module_orchestrator::config::Config;
use module_orchestrator::context::RunContext;
use module_orchestrator::hooks::ProcessRunner;
use module_orchestrator::orchestrator::Orchestrator;
use module_orchestrator::registry::ModuleRegistry;
use module_orchestrator::release::{self, ConfigMapStorage, HelmCli};

#[derive(Debug, Parser)]
#[command(version, about = "Reconcile chart modules against the cluster")]
struct Cli {
    /// Run every module once and exit; non-zero exit if any module failed.
    #[arg(long)]
    once: bool,

    /// Seconds between orchestration runs.
    #[arg(long, env = "ORCHESTRATOR_INTERVAL", default_value_t = 60)]
    interval: u64,

    /// Do not run `helm init` on startup.
    #[arg(long, env = "ORCHESTRATOR_SKIP_BACKEND_INIT")]
    skip_backend_init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("ORCHESTRATOR_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = Config::load();
    tracing::info!(
        modules_dir = %cfg.modules_dir().display(),
        temp_dir = %cfg.temp_dir.display(),
        tiller_namespace = %cfg.tiller_namespace,
        "starting module orchestrator"
    );

    let mut ctx = RunContext::new(cfg.temp_dir.clone());
    let registry = ModuleRegistry::build(&cfg.modules_dir(), &mut ctx.values).await?;

    let kube = kube::Client::try_default().await?;
    tracing::info!("kubernetes client created");

    let helm = HelmCli::new(
        cfg.helm_bin.clone(),
        cfg.tiller_namespace.clone(),
        ConfigMapStorage::new(kube.clone(), &cfg.tiller_namespace),
    );
    if !cli.skip_backend_init {
        let placement =
            release::tiller::fetch_placement(&kube, &cfg.namespace, &cfg.deployment).await?;
        helm.init(&cfg.service_account, &placement).await?;
    }

    let cluster = ConfigMapConfigSource::new(kube, &cfg.namespace, cfg.config_map.clone());
    let mut orchestrator = Orchestrator::new(
        registry,
        ctx,
        Box::new(helm),
        Box::new(ProcessRunner),
        Box::new(cluster),
    );

    if cli.once {
        let report = orchestrator.run_once().await?;
        if !report.is_success() {
            anyhow::bail!("modules failed: {}", report.failed_modules().join(", "));
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    tokio::spawn(async move {
        let received = shutdown_signal().await;
        tracing::info!(signal = received, "shutdown signal received, stopping after the current run");
        let _ = shutdown_tx.send(());
    });

    orchestrator
        .run(Duration::from_secs(cli.interval), shutdown_rx)
        .await;

    tracing::info!("module orchestrator stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM and name the one that arrived.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => "SIGINT",
        () = terminate => "SIGTERM",
    }
}
