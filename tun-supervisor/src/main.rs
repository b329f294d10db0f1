// Tunnel supervisor daemon

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tun_supervisor::{
    config::load_config,
    supervisor::Supervisor,
    system::HostSystem,
    types::{Config, TerminationMode},
};

#[derive(Parser)]
#[command(name = "tun-supervisor")]
#[command(about = "Builds, launches and supervises a privileged tunnel process", long_about = None)]
struct Args {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Control flow is strictly sequential; one thread is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .thread_name("tun-supervisor")
        .enable_time()
        .enable_io()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.general.log_level),
    )
    .init();

    log::info!("Starting tun-supervisor");
    log::info!(
        "Tunnel: {} ({})",
        config.tunnel.name,
        config.tunnel.binary_path().display()
    );
    log::info!(
        "Interface: {} {} (neighbor {} -> {})",
        config.interface.name,
        config.interface.address,
        config.interface.peer_address,
        config.interface.peer_lladdr
    );
    match config.general.termination {
        TerminationMode::ByName => {
            log::info!("Termination: all processes named '{}'", config.tunnel.name)
        }
        TerminationMode::ByHandle => log::info!("Termination: launched pid, name as fallback"),
    }

    // Install handlers before setup so an early Ctrl-C is queued, not fatal
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to set up SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to set up SIGINT handler")?;

    let interrupt = async move {
        tokio::select! {
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
            _ = sigint.recv() => log::info!("Received SIGINT"),
        }
    };

    let system = HostSystem::new(config.general.use_sudo);
    let mut supervisor = Supervisor::new(system, config);

    let report = supervisor.run(interrupt).await;

    for outcome in report.failures() {
        log::debug!("Failed during setup: {}", outcome.step);
    }

    log::info!("Shutdown complete");
    Ok(())
}
