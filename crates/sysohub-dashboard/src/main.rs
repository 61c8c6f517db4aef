//! sysohub dashboard daemon

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use eyre::WrapErr;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sysohub_dashboard::ingest::{run_ingest, run_publisher};
use sysohub_dashboard::system::{ServiceMonitor, SystemSampler};
use sysohub_dashboard::{AppState, DashboardSettings, create_router};
use sysohub_exec::LocalExecutor;
use sysohub_telemetry::{MqttTarget, RetryingConnector};

#[derive(Parser)]
#[command(name = "sysohub-dashboard")]
#[command(about = "Gateway telemetry dashboard", long_about = None)]
struct Args {
    /// Path to dashboard.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let settings = DashboardSettings::locate(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.daemon.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bind = settings.daemon.bind.clone();
    let target = MqttTarget::new(settings.broker.settings());
    let policy = settings.broker.backoff();

    let monitor = ServiceMonitor::new(Arc::new(LocalExecutor::new()), settings.services.clone());
    let state = Arc::new(AppState::new(settings, monitor, SystemSampler::new()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connector = RetryingConnector::new(policy).with_shutdown(shutdown_rx.clone());

    let publisher = tokio::spawn(run_publisher(state.clone(), shutdown_rx.clone()));
    let ingest = tokio::spawn(run_ingest(state.clone(), connector, target, shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .wrap_err_with(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "dashboard listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(publisher, ingest);
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown requested");
}
