//! sysohub CLI
//!
//! Sets up, updates, purges, backs up and inspects the gateway on this host

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use eyre::eyre;
use kameo::actor::{ActorRef, Spawn};
use kameo::error::SendError;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use sysohub_core::{
    AlwaysConfirm, ConfigFileSource, ConfirmationStrategy, Converge, ConvergeMode, CoreError,
    HttpDownloader, MiniJinjaRenderer, OsProvider, ReconcilerActor, ReconcilerArgs, ReportState,
    RuntimeContext, Snapshot, SystemdProvider, TearDown, ensure_elevated,
};
use sysohub_exec::LocalExecutor;

mod progress;
mod prompt;

use progress::with_progress;
use prompt::InteractivePrompt;

#[derive(Parser)]
#[command(name = "sysohub")]
#[command(about = "Idempotent setup of the sysohub IoT gateway", long_about = None)]
struct Cli {
    /// Gateway configuration (default: ~/sysohub/config/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Template directory (default: ~/sysohub/templates)
    #[arg(long, global = true)]
    templates: Option<PathBuf>,

    /// Log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and configure every subsystem, then reboot
    Setup {
        /// Skip the final reboot
        #[arg(long)]
        no_reboot: bool,
    },
    /// Upgrade OS packages and reconverge installed subsystems
    Update {
        /// Reconverge without asking per subsystem
        #[arg(short, long)]
        yes: bool,
    },
    /// Remove everything setup installed, then reboot
    Purge {
        /// Skip the final reboot
        #[arg(long)]
        no_reboot: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Archive the installation directory into ~/backups
    Backup,
    /// Show enabled/running state of every managed service
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    ensure_elevated()?;

    let mut ctx = RuntimeContext::detect()?;
    if let Some(config) = &cli.config {
        ctx = ctx.with_config_path(config);
    }
    let templates = cli.templates.clone().unwrap_or_else(|| ctx.templates_dir.clone());

    let os: Arc<dyn OsProvider> = Arc::new(SystemdProvider::new(Arc::new(LocalExecutor::new())));
    let confirmation: Arc<dyn ConfirmationStrategy> = match &cli.command {
        Commands::Update { yes: false } => Arc::new(InteractivePrompt),
        _ => Arc::new(AlwaysConfirm),
    };

    let (event_tx, mut events) = broadcast::channel(256);
    let actor = ReconcilerActor::spawn(ReconcilerArgs {
        ctx: ctx.clone(),
        source: Arc::new(ConfigFileSource),
        os: os.clone(),
        renderer: Arc::new(MiniJinjaRenderer::from_dir(&templates)),
        downloader: Arc::new(HttpDownloader::new()?),
        confirmation,
        event_tx,
    });

    match cli.command {
        Commands::Setup { no_reboot } => {
            let report = with_progress(&mut events, converge(&actor, ConvergeMode::Setup)).await?;
            println!(
                "Setup complete: {} subsystem(s), {} restart(s)",
                report.subsystems.len(),
                report.restarts()
            );
            finish(os.as_ref(), no_reboot).await?;
        }
        Commands::Update { .. } => {
            let report = with_progress(&mut events, converge(&actor, ConvergeMode::Update)).await?;
            let skipped = report.subsystems.iter().filter(|s| s.skipped).count();
            println!(
                "Update complete: {} changed, {} skipped",
                report.subsystems.iter().filter(|s| s.any_changed).count(),
                skipped
            );
        }
        Commands::Purge { no_reboot, yes } => {
            if !yes && !prompt::ask("Remove every gateway component from this host? [y/N] ")? {
                println!("Aborted");
                return Ok(());
            }
            let tear_down = async { reply(actor.ask(TearDown).await) };
            let report = with_progress(&mut events, tear_down).await?;
            println!(
                "Purge complete: {} unit(s), {} file(s) moved aside, \
                 {} package(s), {} artifact(s) removed",
                report.units_removed.len(),
                report.files_moved.len(),
                report.packages_removed,
                report.artifacts_removed
            );
            finish(os.as_ref(), no_reboot).await?;
        }
        Commands::Backup => {
            let report = reply(actor.ask(Snapshot).await)?;
            println!(
                "Backup written to {} ({} bytes)",
                report.archive.display(),
                report.bytes
            );
        }
        Commands::Status { json } => {
            let report = reply(actor.ask(ReportState).await)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{:<22} {:<20} STATE", "SUBSYSTEM", "SERVICE");
                for row in &report.services {
                    println!("{:<22} {:<20} {}", row.subsystem, row.name, row.state);
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn converge(
    actor: &ActorRef<ReconcilerActor>,
    mode: ConvergeMode,
) -> Result<sysohub_core::ConvergeReport> {
    reply(actor.ask(Converge { mode }).await)
}

/// Surface the handler's own error; anything else means the actor is gone
fn reply<M, T>(result: std::result::Result<T, SendError<M, CoreError>>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(SendError::HandlerError(e)) => Err(e.into()),
        Err(_) => Err(eyre!("reconciler is not running")),
    }
}

async fn finish(os: &dyn OsProvider, no_reboot: bool) -> Result<()> {
    if no_reboot {
        println!("Reboot skipped; some changes take effect only after a reboot");
        return Ok(());
    }
    println!("Rebooting...");
    os.reboot().await?;
    Ok(())
}
