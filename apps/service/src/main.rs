use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};

use speedgist::config::{self, Config};
use speedgist::orchestrator::{CycleOutcome, CycleSchedule, CycleScheduler, RunCoordinator, RunLock};
use speedgist::wiring::LiveFactory;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Config file, defaults to ~/.config/speedgist/config.toml
    #[arg(short, long, env = "SPEEDGIST_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Wait for the first scheduled run instead of testing at startup
    #[arg(long, conflicts_with = "once")]
    no_startup_run: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let config_path = config::resolve_config_path(cli.config.as_deref())?;
    let config = Config::from_config(Some(&config_path))
        .with_context(|| format!("load config from {}", config_path.display()))?;
    debug!("Loaded config:\n{}", config);

    let coordinator = RunCoordinator::new(LiveFactory::new(config_path), RunLock::new());

    let schedule = config.schedule.trim();
    if cli.once || schedule.is_empty() {
        info!("No schedule configured, running a single cycle.");
        return match coordinator.trigger().await? {
            CycleOutcome::ConfigUnavailable => anyhow::bail!("config became unreadable"),
            outcome => {
                info!("Cycle finished: {:?}", outcome);
                Ok(())
            }
        };
    }

    let schedule = CycleSchedule::parse(schedule)?;

    if !cli.no_startup_run {
        info!("Running initial test on startup...");
        coordinator.trigger();
    }

    let scheduler = CycleScheduler::new(coordinator.clone()).start(schedule);
    info!("Service started. Waiting for scheduled tasks.");

    wait_for_shutdown(&coordinator).await;
    scheduler.abort();
    info!("Shutting down");
    Ok(())
}

/// Block until SIGINT/SIGTERM. SIGUSR1 triggers an immediate cycle.
#[cfg(unix)]
async fn wait_for_shutdown(coordinator: &RunCoordinator<LiveFactory>) {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sigterm), Ok(mut sigusr1)) =
        (signal(SignalKind::terminate()), signal(SignalKind::user_defined1()))
    else {
        error!("Failed to install signal handlers, only Ctrl+C will stop the service");
        let _ = tokio::signal::ctrl_c().await;
        return;
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received");
                return;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received");
                return;
            }
            _ = sigusr1.recv() => {
                info!("Manual trigger received");
                coordinator.trigger();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_coordinator: &RunCoordinator<LiveFactory>) {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to listen for Ctrl+C");
    }
    info!("Ctrl+C received");
}
